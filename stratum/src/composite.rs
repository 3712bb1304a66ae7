use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use platform::client::PlatformClient;
use platform::graph::{CollectionRef, ExprGraph, ImageRef, RegionRef, TableRef};
use platform::value::Value;

use crate::datasets::DatasetSpec;
use crate::error::{Error, Result};
use crate::harmonics::add_harmonics;
use crate::settings::{CompositeMode, CompositeOptions};

/// One aggregation-window layout: how many `period_unit`s each window spans
/// and the anchor date of every window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timing {
    pub period: u32,
    pub period_unit: &'static str,
    pub dates: Vec<String>,
}

/// Derive the aggregation windows from the distinct calendar years present
/// in the source series. Annual mode anchors one window per year at Jan 1;
/// seasonal mode anchors at the season's first month and spans the season's
/// month count.
pub fn aggregation_timing(dates: &[String], options: &CompositeOptions) -> Result<Timing> {
    let years: BTreeSet<&str> = dates
        .iter()
        .filter_map(|date| date.split('-').next())
        .collect();

    let timing = match options.composite_mode {
        CompositeMode::Annual => Timing {
            period: 1,
            period_unit: "year",
            dates: years.iter().map(|y| format!("{}-01-01", y)).collect(),
        },
        CompositeMode::Seasonal => {
            // validate() has already required a non-empty consecutive season
            let first_month = *options
                .season
                .first()
                .ok_or_else(|| Error::Config("seasonal mode requires a season".to_string()))?;
            Timing {
                period: options.season.len() as u32,
                period_unit: "month",
                dates: years
                    .iter()
                    .map(|y| format!("{}-{:02}-01", y, first_month))
                    .collect(),
            }
        }
    };

    Ok(timing)
}

/// Build the time-aggregated multi-band composite for one dataset within the
/// AOI footprint. Pure graph construction except for one evaluation: the
/// source series' date list, which decides the aggregation windows.
pub async fn build_composite(
    graph: &mut ExprGraph,
    client: &Arc<dyn PlatformClient>,
    dataset: &DatasetSpec,
    aoi: TableRef,
    start_date: &str,
    end_date: &str,
    options: &CompositeOptions,
) -> Result<ImageRef> {
    options.validate()?;

    let region = RegionRef(graph.invoke("Table.geometry", [("table", aoi.into())]));
    let mut collection = dataset.load(graph, region, start_date, end_date);

    if options.multi_poly {
        // Mask every image to the exact per-feature footprints. A plain AOI
        // clip would let values bleed between non-contiguous reference
        // polygons sharing a loose bounding box.
        let ones = graph.invoke("Image.constant", [("value", 1i64.into())]);
        let painted = graph.invoke(
            "Image.paint",
            [("image", ones.into()), ("features", aoi.into())],
        );
        let inverted = graph.invoke("Image.not", [("image", painted.into())]);
        let mask = graph.invoke("Image.selfMask", [("image", inverted.into())]);
        collection = CollectionRef(graph.invoke(
            "Collection.updateMask",
            [("collection", collection.into()), ("mask", mask.into())],
        ));
    }

    if !options.indices.is_empty() {
        let indices: Value = options.indices.iter().map(String::as_str).collect();
        collection = CollectionRef(graph.invoke(
            "Collection.addIndices",
            [("collection", collection.into()), ("indices", indices.into())],
        ));
    }
    if options.add_tassel_cap {
        collection = CollectionRef(graph.invoke(
            "Collection.addTasselCap",
            [("collection", collection.into())],
        ));
    }

    let dates_node = graph.invoke("Collection.dates", [("collection", collection.into())]);
    let dates_value = client.evaluate(graph, dates_node).await?;
    let dates: Vec<String> = dates_value
        .try_list()
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.try_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if dates.is_empty() {
        return Err(Error::Config(format!(
            "no images in {}..{} for the requested dataset",
            start_date, end_date
        )));
    }

    let timing = aggregation_timing(&dates, options)?;
    debug!(windows = timing.dates.len(), period = timing.period, unit = timing.period_unit, "aggregation windows");

    let aggregated = graph.invoke(
        "Collection.aggregateTime",
        [
            ("collection", collection.into()),
            ("reducer", options.reducer.as_str().into()),
            ("period", timing.period.into()),
            ("period_unit", timing.period_unit.into()),
            (
                "dates",
                timing
                    .dates
                    .iter()
                    .map(String::as_str)
                    .collect::<Value>()
                    .into(),
            ),
        ],
    );
    let mut composite = graph.invoke("Collection.toBands", [("collection", aggregated.into())]);

    // One window: stacking injected a 2-char collection index prefix on
    // every band, strip it. Several windows: keep the index and prefix a
    // 't' so band names stay unique per window. Downstream band selection
    // relies on exactly this rule.
    if timing.dates.len() > 1 {
        composite = graph.invoke(
            "Image.prefixBandNames",
            [("image", composite.into()), ("prefix", "t".into())],
        );
    } else {
        composite = graph.invoke(
            "Image.stripBandPrefix",
            [("image", composite.into()), ("count", 2i64.into())],
        );
    }

    if options.add_harmonics {
        // fit on the unaggregated series, not the composited windows
        let harmonics = add_harmonics(graph, collection, &options.harmonics_options);
        composite = graph.invoke(
            "Image.addBands",
            [("image", composite.into()), ("bands", harmonics.into())],
        );
    }

    // Auxiliary layers go last. Outside their valid domain a pixel becomes
    // 0 rather than staying masked; zero is a meaningful value for both.
    if options.add_jrc_water {
        let with_water = graph.invoke("Image.addSurfaceWater", [("image", composite.into())]);
        composite = graph.invoke(
            "Image.unmask",
            [("image", with_water.into()), ("value", 0i64.into())],
        );
    }
    if options.add_topography {
        let with_topo = graph.invoke("Image.addTopography", [("image", composite.into())]);
        composite = graph.invoke(
            "Image.unmask",
            [("image", with_topo.into()), ("value", 0i64.into())],
        );
    }

    let clipped = graph.invoke(
        "Image.clip",
        [("image", composite.into()), ("geometry", region.into())],
    );

    info!(dataset = %dataset.label(), windows = timing.dates.len(), "composite graph built");

    Ok(ImageRef(clipped))
}

/// Composite several datasets over the same AOI and window layout, prefixing
/// every band with its dataset label before merging, so merged stacks stay
/// unambiguous.
pub async fn build_merged_composite(
    graph: &mut ExprGraph,
    client: &Arc<dyn PlatformClient>,
    datasets: &[DatasetSpec],
    aoi: TableRef,
    start_date: &str,
    end_date: &str,
    options: &CompositeOptions,
) -> Result<ImageRef> {
    assert!(!datasets.is_empty());

    let mut merged: Option<ImageRef> = None;
    for dataset in datasets {
        let composite =
            build_composite(graph, client, dataset, aoi, start_date, end_date, options).await?;
        let prefixed = ImageRef(graph.invoke(
            "Image.prefixBandNames",
            [
                ("image", composite.into()),
                ("prefix", format!("{}_", dataset.label()).into()),
            ],
        ));
        merged = Some(match merged {
            None => prefixed,
            Some(base) => ImageRef(graph.invoke(
                "Image.addBands",
                [("image", base.into()), ("bands", prefixed.into())],
            )),
        });
    }

    Ok(merged.expect("datasets is non-empty"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform::client::LambdaClient;
    use platform::ops::OpLib;

    fn client_with_dates(dates: &[&str]) -> Arc<dyn PlatformClient> {
        let mut client = LambdaClient::default();
        let dates: Vec<Value> = dates.iter().map(|d| Value::from(*d)).collect();
        client.add_handler("Collection.dates", move |_, _| {
            Ok(Value::List(dates.clone()))
        });
        Arc::new(client)
    }

    fn aoi(graph: &mut ExprGraph) -> TableRef {
        TableRef(graph.invoke("Table.load", [("asset", "projects/x/aoi".into())]))
    }

    fn node_ops(graph: &ExprGraph) -> Vec<&str> {
        graph.nodes().iter().map(|node| node.op.as_str()).collect()
    }

    #[tokio::test]
    async fn annual_mode_builds_one_window_per_year() -> anyhow::Result<()> {
        let mut graph = ExprGraph::new();
        let client = client_with_dates(&[
            "2020-03-01 10:05:00",
            "2020-07-14 10:05:00",
            "2021-06-11 10:05:00",
        ]);
        let aoi = aoi(&mut graph);

        build_composite(
            &mut graph,
            &client,
            &"Sentinel2".parse()?,
            aoi,
            "2020-01-01",
            "2021-12-31",
            &CompositeOptions::default(),
        )
        .await?;

        let agg = graph
            .nodes()
            .iter()
            .find(|node| node.op == "Collection.aggregateTime")
            .unwrap();
        let dates = agg.args[4].1.as_const().unwrap().as_list().to_vec();
        assert_eq!(
            dates,
            vec![Value::from("2020-01-01"), Value::from("2021-01-01")]
        );
        assert_eq!(agg.args[3].1.as_const().unwrap().as_str(), "year");

        // two windows: band names get the t prefix
        assert!(node_ops(&graph).contains(&"Image.prefixBandNames"));

        graph.validate(&OpLib::standard())?;
        Ok(())
    }

    #[tokio::test]
    async fn single_window_strips_band_prefixes() -> anyhow::Result<()> {
        let mut graph = ExprGraph::new();
        let client = client_with_dates(&["2021-02-01 10:05:00", "2021-11-19 10:05:00"]);
        let aoi = aoi(&mut graph);

        build_composite(
            &mut graph,
            &client,
            &"Landsat8".parse()?,
            aoi,
            "2021-01-01",
            "2021-12-31",
            &CompositeOptions::default(),
        )
        .await?;

        let ops = node_ops(&graph);
        assert!(ops.contains(&"Image.stripBandPrefix"));
        assert!(!ops.contains(&"Image.prefixBandNames"));
        Ok(())
    }

    #[tokio::test]
    async fn seasonal_mode_anchors_windows_at_season_start() -> anyhow::Result<()> {
        let mut graph = ExprGraph::new();
        let client = client_with_dates(&["2020-06-11 10:05:00", "2021-07-04 10:05:00"]);
        let aoi = aoi(&mut graph);

        let options = CompositeOptions {
            composite_mode: CompositeMode::Seasonal,
            season: vec![6, 7, 8],
            ..Default::default()
        };
        build_composite(
            &mut graph,
            &client,
            &"Sentinel2".parse()?,
            aoi,
            "2020-01-01",
            "2021-12-31",
            &options,
        )
        .await?;

        let agg = graph
            .nodes()
            .iter()
            .find(|node| node.op == "Collection.aggregateTime")
            .unwrap();
        assert_eq!(agg.args[2].1.as_const().unwrap().as_int(), 3);
        assert_eq!(agg.args[3].1.as_const().unwrap().as_str(), "month");
        let dates = agg.args[4].1.as_const().unwrap().as_list().to_vec();
        assert_eq!(
            dates,
            vec![Value::from("2020-06-01"), Value::from("2021-06-01")]
        );
        Ok(())
    }

    #[tokio::test]
    async fn seasonal_without_season_is_a_config_error() -> anyhow::Result<()> {
        let mut graph = ExprGraph::new();
        let client = client_with_dates(&["2020-06-11 10:05:00"]);
        let aoi = aoi(&mut graph);

        let options = CompositeOptions {
            composite_mode: CompositeMode::Seasonal,
            ..Default::default()
        };
        let err = build_composite(
            &mut graph,
            &client,
            &"Sentinel2".parse()?,
            aoi,
            "2020-01-01",
            "2020-12-31",
            &options,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        Ok(())
    }

    #[tokio::test]
    async fn multi_poly_masks_to_feature_footprints() -> anyhow::Result<()> {
        let mut graph = ExprGraph::new();
        let client = client_with_dates(&["2021-02-01 10:05:00"]);
        let aoi = aoi(&mut graph);

        let options = CompositeOptions {
            multi_poly: true,
            ..Default::default()
        };
        build_composite(
            &mut graph,
            &client,
            &"Sentinel2".parse()?,
            aoi,
            "2021-01-01",
            "2021-12-31",
            &options,
        )
        .await?;

        let ops = node_ops(&graph);
        for op in ["Image.paint", "Image.not", "Image.selfMask", "Collection.updateMask"] {
            assert!(ops.contains(&op), "missing {}", op);
        }
        Ok(())
    }

    #[tokio::test]
    async fn auxiliary_layers_are_added_last_and_unmask_zero() -> anyhow::Result<()> {
        let mut graph = ExprGraph::new();
        let client = client_with_dates(&["2021-02-01 10:05:00"]);
        let aoi = aoi(&mut graph);

        let options = CompositeOptions {
            add_jrc_water: true,
            add_topography: true,
            ..Default::default()
        };
        let composite = build_composite(
            &mut graph,
            &client,
            &"Sentinel2".parse()?,
            aoi,
            "2021-01-01",
            "2021-12-31",
            &options,
        )
        .await?;

        let ops = node_ops(&graph);
        let water = ops.iter().position(|op| *op == "Image.addSurfaceWater").unwrap();
        let topo = ops.iter().position(|op| *op == "Image.addTopography").unwrap();
        assert!(water < topo);

        // each auxiliary layer is followed by unmask-with-zero
        let unmasks: Vec<_> = graph
            .nodes()
            .iter()
            .filter(|node| node.op == "Image.unmask")
            .collect();
        assert_eq!(unmasks.len(), 2);
        for unmask in unmasks {
            assert_eq!(unmask.args[1].1.as_const().unwrap().as_int(), 0);
        }

        // the returned image is the AOI clip
        assert_eq!(graph.by_id(composite.node()).unwrap().op, "Image.clip");
        Ok(())
    }

    #[tokio::test]
    async fn harmonics_fit_the_unaggregated_series() -> anyhow::Result<()> {
        let mut graph = ExprGraph::new();
        let client = client_with_dates(&["2021-02-01 10:05:00"]);
        let aoi = aoi(&mut graph);

        let options = CompositeOptions::resolve(serde_json::json!({
            "addHarmonics": true,
            "harmonicsOptions": {"nir": {"start": 1, "end": 365}},
        }))?;
        build_composite(
            &mut graph,
            &client,
            &"Sentinel2".parse()?,
            aoi,
            "2021-01-01",
            "2021-12-31",
            &options,
        )
        .await?;

        let fit = graph
            .nodes()
            .iter()
            .find(|node| node.op == "Collection.harmonicRegression")
            .unwrap();
        // the fit consumes the collection, not the composited image
        let target = fit.args[0].1.as_node().unwrap();
        let target_op = &graph.by_id(target).unwrap().op;
        assert!(target_op.starts_with("Dataset.") || target_op.starts_with("Collection."));

        graph.validate(&OpLib::standard())?;
        Ok(())
    }

    #[tokio::test]
    async fn empty_series_is_rejected() -> anyhow::Result<()> {
        let mut graph = ExprGraph::new();
        let client = client_with_dates(&[]);
        let aoi = aoi(&mut graph);

        let err = build_composite(
            &mut graph,
            &client,
            &"Sentinel2".parse()?,
            aoi,
            "2021-01-01",
            "2021-12-31",
            &CompositeOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        Ok(())
    }

    #[tokio::test]
    async fn merged_composite_prefixes_each_dataset() -> anyhow::Result<()> {
        let mut graph = ExprGraph::new();
        let client = client_with_dates(&["2021-02-01 10:05:00"]);
        let aoi = aoi(&mut graph);

        let datasets = vec!["Sentinel2".parse()?, "Landsat8".parse()?];
        build_merged_composite(
            &mut graph,
            &client,
            &datasets,
            aoi,
            "2021-01-01",
            "2021-12-31",
            &CompositeOptions::default(),
        )
        .await?;

        let prefixes: Vec<String> = graph
            .nodes()
            .iter()
            .filter(|node| node.op == "Image.prefixBandNames")
            .map(|node| node.args[1].1.as_const().unwrap().as_str().to_string())
            .collect();
        assert!(prefixes.contains(&"Sentinel2_".to_string()));
        assert!(prefixes.contains(&"Landsat8_".to_string()));

        graph.validate(&OpLib::standard())?;
        Ok(())
    }
}
