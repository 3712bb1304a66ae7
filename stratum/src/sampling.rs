use tracing::warn;

use platform::graph::{Arg, ExprGraph, ImageRef, NodeId, RegionRef, TableRef};
use platform::value::Value;

use crate::error::{Error, Result};

/// Default points per class when no explicit allocation is given.
pub const DEFAULT_POINTS_PER_CLASS: u32 = 100;

/// Oversampling factor for polygon-sourced reference sampling; the surplus
/// is cut back to the requested count by the random tiebreak column.
const OVERSAMPLE: u32 = 2;

/// Sample allocation for stratified sampling straight off a classified
/// raster band: either one count for every class, or an explicit per-class
/// allocation.
#[derive(Clone, Debug, Default)]
pub struct StratifiedSpec {
    pub n_points: Option<u32>,
    pub class_values: Option<Vec<i64>>,
    pub class_points: Option<Vec<u32>>,
}

impl StratifiedSpec {
    pub fn validate(&self) -> Result<()> {
        check_paired(self.class_values.as_deref(), self.class_points.as_deref())
    }

    fn points_per_class(&self) -> u32 {
        match self.n_points {
            Some(n) => n,
            None => {
                if self.class_values.is_none() {
                    warn!(
                        "defaulting to equal allocation of {} points per class",
                        DEFAULT_POINTS_PER_CLASS
                    );
                }
                DEFAULT_POINTS_PER_CLASS
            }
        }
    }
}

/// class_values and class_points are codependent: both or neither, and of
/// equal length. Checked before any remote expression is built.
pub fn check_paired(class_values: Option<&[i64]>, class_points: Option<&[u32]>) -> Result<()> {
    match (class_values, class_points) {
        (None, None) => Ok(()),
        (Some(values), Some(points)) => {
            if values.len() != points.len() {
                Err(Error::Config(format!(
                    "class_values and class_points are of unequal length: {:?} {:?}",
                    values, points
                )))
            } else {
                Ok(())
            }
        }
        _ => Err(Error::Config(
            "class_values and class_points are codependent, provide both or neither".to_string(),
        )),
    }
}

/// Stratified random sample keyed off a classified raster band.
pub fn stratified_from_image(
    graph: &mut ExprGraph,
    image: ImageRef,
    class_band: &str,
    region: RegionRef,
    scale: u32,
    seed: i64,
    spec: &StratifiedSpec,
) -> Result<TableRef> {
    spec.validate()?;

    let mut args = vec![
        ("image", Arg::from(image)),
        ("class_band", class_band.into()),
        ("region", region.into()),
        ("scale", scale.into()),
        ("seed", seed.into()),
        ("num_points", spec.points_per_class().into()),
        ("drop_nulls", true.into()),
        ("tile_scale", 16i64.into()),
        ("geometries", true.into()),
    ];
    if let Some(values) = spec.class_values.as_ref() {
        args.push((
            "class_values",
            values.iter().copied().collect::<Value>().into(),
        ));
    }
    if let Some(points) = spec.class_points.as_ref() {
        args.push((
            "class_points",
            points.iter().copied().collect::<Value>().into(),
        ));
    }

    Ok(TableRef(graph.invoke("Image.stratifiedSample", args)))
}

/// Stratified sample points generated from reference polygons or points,
/// with the image's band values extracted onto every point.
///
/// Per declared class: reference features are filtered to the class value;
/// if the reference geometry is polygonal, random points are oversampled
/// within the matched footprint, otherwise the supplied points are used
/// directly. Either way the image is sampled onto the points and the set is
/// cut back to the requested count via a random tiebreak column. The
/// polygon/point decision happens at evaluation time, from the reference
/// collection's actual geometry type.
#[allow(clippy::too_many_arguments)]
pub fn stratified_from_reference(
    graph: &mut ExprGraph,
    image: ImageRef,
    reference: TableRef,
    class_band: &str,
    scale: u32,
    crs: Option<&str>,
    seed: i64,
    class_values: &[i64],
    class_points: &[u32],
) -> Result<TableRef> {
    check_paired(Some(class_values), Some(class_points))?;
    if class_values.is_empty() {
        return Err(Error::Config("class_values must not be empty".to_string()));
    }

    let geom_type = graph.invoke("Table.geometryType", [("table", reference.into())]);
    let is_polygonal = graph.invoke(
        "List.contains",
        [
            ("list", ["Polygon", "MultiPolygon"].into_iter().collect::<Value>().into()),
            ("value", geom_type.into()),
        ],
    );

    let mut merged: Option<NodeId> = None;
    for (&class_value, &n_points) in class_values.iter().zip(class_points.iter()) {
        let filtered = graph.invoke(
            "Table.filterEq",
            [
                ("table", reference.into()),
                ("property", class_band.into()),
                ("value", class_value.into()),
            ],
        );

        // polygon branch: oversample random points inside the matched
        // footprint, tag them with the class value
        let footprint = graph.invoke("Table.geometry", [("table", filtered.into())]);
        let random_pts = graph.invoke(
            "Table.randomPoints",
            [
                ("region", footprint.into()),
                ("count", (n_points * OVERSAMPLE).into()),
                ("seed", seed.into()),
                ("max_error", 0.001.into()),
            ],
        );
        let tagged = graph.invoke(
            "Table.setProperty",
            [
                ("table", random_pts.into()),
                ("property", class_band.into()),
                ("value", class_value.into()),
            ],
        );
        let from_polys = extract_and_limit(graph, image, tagged, scale, crs, seed, n_points);

        // point branch: the reference features already are the sample
        let from_points = extract_and_limit(graph, image, filtered, scale, crs, seed, n_points);

        let chosen = graph.invoke(
            "Algorithms.If",
            [
                ("condition", is_polygonal.into()),
                ("then", from_polys.into()),
                ("else", from_points.into()),
            ],
        );

        merged = Some(match merged {
            None => chosen,
            Some(base) => graph.invoke(
                "Table.merge",
                [("left", base.into()), ("right", chosen.into())],
            ),
        });
    }

    // final property schema: the image bands plus the class band
    let band_names = graph.invoke("Image.bandNames", [("image", image.into())]);
    let properties = graph.invoke(
        "List.add",
        [("list", band_names.into()), ("value", class_band.into())],
    );
    let selected = graph.invoke(
        "Table.selectProperties",
        [
            ("table", merged.expect("class_values is non-empty").into()),
            ("properties", properties.into()),
        ],
    );

    Ok(TableRef(selected))
}

fn extract_and_limit(
    graph: &mut ExprGraph,
    image: ImageRef,
    points: NodeId,
    scale: u32,
    crs: Option<&str>,
    seed: i64,
    n_points: u32,
) -> NodeId {
    let mut args = vec![
        ("image", Arg::from(image)),
        ("collection", points.into()),
        ("scale", scale.into()),
        ("tile_scale", 16i64.into()),
        ("geometries", true.into()),
    ];
    if let Some(crs) = crs {
        args.push(("projection", crs.into()));
    }
    let sampled = graph.invoke("Image.sampleRegions", args);
    let with_random = graph.invoke(
        "Table.randomColumn",
        [("table", sampled.into()), ("seed", seed.into())],
    );
    graph.invoke(
        "Table.limit",
        [
            ("table", with_random.into()),
            ("count", n_points.into()),
            ("sort_by", "random".into()),
        ],
    )
}

/// Partition points into train/test sets by a uniform random draw against a
/// fixed 0.8 threshold. Stable for a fixed seed and input set; cardinality
/// is probabilistic, not an exact 80/20 quota. The random column is
/// stripped from both outputs.
pub fn split_train_test(
    graph: &mut ExprGraph,
    points: TableRef,
    seed: i64,
) -> (TableRef, TableRef) {
    let with_random = graph.invoke(
        "Table.randomColumn",
        [
            ("table", points.into()),
            ("name", "random".into()),
            ("seed", seed.into()),
        ],
    );
    let train = graph.invoke(
        "Table.filterLt",
        [
            ("table", with_random.into()),
            ("property", "random".into()),
            ("value", 0.8.into()),
        ],
    );
    let test = graph.invoke(
        "Table.filterGte",
        [
            ("table", with_random.into()),
            ("property", "random".into()),
            ("value", 0.8.into()),
        ],
    );

    let strip = |graph: &mut ExprGraph, table: NodeId| {
        graph.invoke(
            "Table.removeProperties",
            [
                ("table", table.into()),
                ("properties", ["random"].into_iter().collect::<Value>().into()),
            ],
        )
    };
    let train = strip(graph, train);
    let test = strip(graph, test);

    (TableRef(train), TableRef(test))
}

/// Standardize the four point properties external collection tools expect:
/// LON, LAT, a plot id and a sample id, both ids derived from the
/// platform-assigned feature id. A global offset prefixes the ids so point
/// sets merged across several AOIs stay unique.
pub fn format_points(
    graph: &mut ExprGraph,
    table: TableRef,
    global_offset: Option<u32>,
) -> TableRef {
    let mut args = vec![("table", Arg::from(table))];
    if let Some(offset) = global_offset {
        args.push(("prefix", format!("{}_", offset).into()));
    }
    TableRef(graph.invoke("Table.formatPoints", args))
}
