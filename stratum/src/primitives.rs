use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use platform::client::{ClientError, PlatformClient};
use platform::export::ImageExportParams;
use platform::graph::{Arg, CollectionRef, ExprGraph, ImageRef, NodeId, RegionRef, TableRef};
use platform::value::Value;
use platform::worker::EvalPool;

use crate::error::{Error, Result};

/// Binary label property written onto training points: 1 for the class
/// being modeled, 0 for everything else.
const BINARY_PROPERTY: &str = "PRIM";

/// Fixed classifier configuration shared by the screening pass and the
/// retrain pass.
const TREES: u32 = 100;
const MIN_LEAF_POPULATION: u32 = 1;
const BAG_FRACTION: f64 = 0.7;
const CLASSIFIER_SEED: i64 = 51515;

/// How many features survive the screening pass, ties permitting.
const FEATURE_BUDGET: usize = 20;

/// One binary probability classifier result for a single class value.
#[derive(Clone, Debug)]
pub struct Primitive {
    pub class_value: i64,
    pub probability: ImageRef,
    pub importance: BTreeMap<String, f64>,
    pub oob_error: f64,
    pub schema: Vec<String>,
}

/// An ordered collection of primitives sharing one input stack and training
/// source. Exactly one primitive per distinct training label, ordered
/// ascending by class value; assemblage maps band position to output pixel
/// value, so this order is load-bearing.
#[derive(Debug)]
pub struct Primitives {
    graph: ExprGraph,
    prims: Vec<Primitive>,
    region: RegionRef,
    loaded: Option<CollectionRef>,
    size: usize,
}

/// Keep the `budget` highest-importance features. The cutoff is the
/// `budget`-th-ranked importance value, not a strict top-K slice: every
/// feature tied with the boundary value survives, so the result can exceed
/// `budget`. With fewer features than the budget, all of them survive.
pub fn top_features(importance: &BTreeMap<String, f64>, budget: usize) -> Vec<String> {
    assert!(budget > 0);

    if importance.is_empty() {
        return Vec::new();
    }

    let mut values: Vec<f64> = importance.values().copied().collect();
    values.sort_by(f64::total_cmp);
    let cutoff = if values.len() >= budget {
        values[values.len() - budget]
    } else {
        values[0]
    };

    importance
        .iter()
        .filter(|(_, value)| **value >= cutoff)
        .map(|(name, _)| name.clone())
        .collect()
}

fn parse_explain(value: &Value) -> Result<(BTreeMap<String, f64>, f64)> {
    let malformed =
        |what: &str| Error::Client(ClientError::MalformedReply(format!("explain: {}", what)));

    let dict = value.try_dict().ok_or_else(|| malformed("not a dict"))?;
    let importance = dict
        .get("importance")
        .and_then(Value::try_dict)
        .ok_or_else(|| malformed("missing importance"))?;
    let importance: BTreeMap<String, f64> = importance
        .iter()
        .map(|(name, score)| {
            score
                .try_float()
                .map(|score| (name.clone(), score))
                .ok_or_else(|| malformed("non-numeric importance"))
        })
        .collect::<Result<_>>()?;
    let oob_error = dict
        .get("outOfBagErrorEstimate")
        .and_then(Value::try_float)
        .ok_or_else(|| malformed("missing outOfBagErrorEstimate"))?;

    Ok((importance, oob_error))
}

fn parse_schema(value: &Value) -> Result<Vec<String>> {
    value
        .try_list()
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.try_str().map(str::to_string))
                .collect()
        })
        .ok_or_else(|| Error::Client(ClientError::MalformedReply("schema: not a list".into())))
}

/// Per-class state carried between the screening evaluation and the
/// retrain pass.
struct ClassPlan {
    class_value: i64,
    samples: TableRef,
    classifier: NodeId,
    explain_all: NodeId,
}

impl Primitives {
    /// Train one binary probability primitive per distinct class label in
    /// the training data.
    ///
    /// Graph construction is local and sequential; the remote evaluations
    /// (the expensive part) fan out through `pool`, since per-class steps
    /// share only read access to the stack and training set.
    pub async fn train(
        client: &Arc<dyn PlatformClient>,
        pool: EvalPool,
        input_stack_asset: &str,
        training_assets: &[String],
        class_property: &str,
    ) -> Result<Primitives> {
        assert!(!training_assets.is_empty());

        let mut graph = ExprGraph::new();
        let stack = ImageRef(graph.invoke("Image.load", [("asset", input_stack_asset.into())]));
        let region = RegionRef(graph.invoke("Image.geometry", [("image", stack.into())]));

        if training_assets.len() > 1 {
            info!(count = training_assets.len(), "merging training datasets");
        }
        let mut training = TableRef(graph.invoke(
            "Table.load",
            [("asset", training_assets[0].as_str().into())],
        ));
        for asset in &training_assets[1..] {
            let next = graph.invoke("Table.load", [("asset", asset.as_str().into())]);
            training = TableRef(graph.invoke(
                "Table.merge",
                [("left", training.into()), ("right", next.into())],
            ));
        }

        let labels = Self::distinct_labels(client, &graph, training, class_property).await?;
        match labels.len() {
            0 => {
                return Err(Error::Training(format!(
                    "no class labels found in property '{}'",
                    class_property
                )))
            }
            1 => warn!(
                label = labels[0],
                "training data contains a single class; ensemble will be degenerate"
            ),
            n => info!(classes = n, "training primitives"),
        }

        // Screening pass: binarize and train on all stack bands, one plan
        // per class.
        let band_names = graph.invoke("Image.bandNames", [("image", stack.into())]);
        let plans: Vec<ClassPlan> = labels
            .iter()
            .map(|&class_value| {
                let samples = Self::binarize(&mut graph, training, class_property, class_value);
                let classifier = Self::classifier(&mut graph);
                let model_all = graph.invoke(
                    "Classifier.train",
                    [
                        ("classifier", classifier.into()),
                        ("features", samples.into()),
                        ("class_property", BINARY_PROPERTY.into()),
                        ("input_properties", band_names.into()),
                    ],
                );
                let explain_all = graph.invoke("Model.explain", [("model", model_all.into())]);
                ClassPlan {
                    class_value,
                    samples,
                    classifier,
                    explain_all,
                }
            })
            .collect();

        let screen_roots: Vec<NodeId> = plans.iter().map(|plan| plan.explain_all).collect();
        let screen_replies = pool.evaluate_many(client, &graph, &screen_roots).await;

        // Retrain pass: restrict each model to its highest-importance
        // features, score the stack in probability mode.
        let mut retrain_roots: Vec<NodeId> = Vec::with_capacity(plans.len() * 2);
        let mut scored: Vec<(i64, ImageRef)> = Vec::with_capacity(plans.len());
        for (plan, reply) in plans.iter().zip(screen_replies) {
            let (importance_all, _oob_all) = parse_explain(&reply?)?;
            let selected = top_features(&importance_all, FEATURE_BUDGET);
            if selected.is_empty() {
                return Err(Error::Training(format!(
                    "screening model for class {} reported no features",
                    plan.class_value
                )));
            }

            let model = graph.invoke(
                "Classifier.train",
                [
                    ("classifier", plan.classifier.into()),
                    ("features", plan.samples.into()),
                    ("class_property", BINARY_PROPERTY.into()),
                    (
                        "input_properties",
                        selected.iter().map(String::as_str).collect::<Value>().into(),
                    ),
                ],
            );
            let explain = graph.invoke("Model.explain", [("model", model.into())]);
            let schema = graph.invoke("Model.schema", [("model", model.into())]);
            retrain_roots.push(explain);
            retrain_roots.push(schema);

            let probability = graph.invoke(
                "Image.classify",
                [
                    ("image", stack.into()),
                    ("model", model.into()),
                    ("output_name", "Probability".into()),
                ],
            );
            scored.push((plan.class_value, ImageRef(probability)));
        }

        let retrain_replies = pool.evaluate_many(client, &graph, &retrain_roots).await;
        let mut replies = retrain_replies.into_iter();

        let mut prims = Vec::with_capacity(scored.len());
        for (class_value, probability) in scored {
            let explain = replies.next().expect("one explain reply per class")?;
            let schema = replies.next().expect("one schema reply per class")?;
            let (importance, oob_error) = parse_explain(&explain)?;
            prims.push(Primitive {
                class_value,
                probability,
                importance,
                oob_error,
                schema: parse_schema(&schema)?,
            });
        }

        let size = prims.len();
        Ok(Primitives {
            graph,
            prims,
            region,
            loaded: None,
            size,
        })
    }

    /// Rehydrate an ensemble from a previously exported primitives image
    /// collection. Training metadata is not recoverable; the result can be
    /// assembled and exported but carries no metrics.
    pub async fn from_collection(
        client: &Arc<dyn PlatformClient>,
        asset_id: &str,
    ) -> Result<Primitives> {
        let mut graph = ExprGraph::new();
        let collection =
            CollectionRef(graph.invoke("Collection.fromAsset", [("asset", asset_id.into())]));
        let region = RegionRef(graph.invoke(
            "Collection.geometry",
            [("collection", collection.into())],
        ));

        let size_node = graph.invoke("Collection.size", [("collection", collection.into())]);
        let size = client
            .evaluate(&graph, size_node)
            .await?
            .try_int()
            .ok_or_else(|| {
                Error::Client(ClientError::MalformedReply("collection size".into()))
            })?;
        if size == 0 {
            return Err(Error::Training(format!(
                "primitives collection is empty: {}",
                asset_id
            )));
        }

        Ok(Primitives {
            graph,
            prims: Vec::new(),
            region,
            loaded: Some(collection),
            size: size as usize,
        })
    }

    async fn distinct_labels(
        client: &Arc<dyn PlatformClient>,
        graph: &ExprGraph,
        training: TableRef,
        class_property: &str,
    ) -> Result<Vec<i64>> {
        let mut probe = graph.clone();
        let distinct = probe.invoke(
            "Table.aggregateDistinct",
            [("table", training.into()), ("property", class_property.into())],
        );

        let reply = client.evaluate(&probe, distinct).await?;
        let values = reply
            .try_list()
            .ok_or_else(|| Error::Client(ClientError::MalformedReply("distinct labels".into())))?;

        // coerce to integers, then sort ascending so ensemble order is
        // reproducible regardless of encounter order in the table
        let mut labels: Vec<i64> = values.iter().filter_map(Value::try_label).collect();
        if labels.len() != values.len() {
            return Err(Error::Training("class labels must be numeric".to_string()));
        }
        labels.sort_unstable();
        labels.dedup();
        Ok(labels)
    }

    /// Relabel the full typology into a binary set for one class: matching
    /// points become 1, everything else 0, all points preserved. Balance is
    /// whatever the natural class prevalence is; nothing is resampled.
    fn binarize(
        graph: &mut ExprGraph,
        training: TableRef,
        class_property: &str,
        class_value: i64,
    ) -> TableRef {
        let matching = graph.invoke(
            "Table.filterEq",
            [
                ("table", training.into()),
                ("property", class_property.into()),
                ("value", class_value.into()),
            ],
        );
        let prim = graph.invoke(
            "Table.setProperty",
            [
                ("table", matching.into()),
                ("property", BINARY_PROPERTY.into()),
                ("value", 1i64.into()),
            ],
        );
        let rest = graph.invoke(
            "Table.filterNeq",
            [
                ("table", training.into()),
                ("property", class_property.into()),
                ("value", class_value.into()),
            ],
        );
        let non_prim = graph.invoke(
            "Table.setProperty",
            [
                ("table", rest.into()),
                ("property", BINARY_PROPERTY.into()),
                ("value", 0i64.into()),
            ],
        );
        TableRef(graph.invoke(
            "Table.merge",
            [("left", prim.into()), ("right", non_prim.into())],
        ))
    }

    fn classifier(graph: &mut ExprGraph) -> NodeId {
        graph.invoke(
            "Classifier.randomForest",
            [
                ("trees", TREES.into()),
                ("min_leaf_population", MIN_LEAF_POPULATION.into()),
                ("bag_fraction", BAG_FRACTION.into()),
                ("seed", CLASSIFIER_SEED.into()),
                ("output_mode", "PROBABILITY".into()),
            ],
        )
    }

    pub fn primitives(&self) -> &[Primitive] {
        &self.prims
    }
    pub fn len(&self) -> usize {
        self.size
    }
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
    pub fn graph(&self) -> &ExprGraph {
        &self.graph
    }
    pub fn graph_mut(&mut self) -> &mut ExprGraph {
        &mut self.graph
    }
    pub fn region(&self) -> RegionRef {
        self.region
    }

    /// Merge the per-class probability surfaces into one labeled raster:
    /// stack in ensemble order, take the per-pixel argmax band index (ties
    /// resolve to the lowest index), add 1 to turn the 0-based index into a
    /// 1-based class label.
    ///
    /// `remap_to` positionally remaps the sequential labels `1..=N` onto
    /// caller-chosen class codes; its length must equal the ensemble size.
    pub fn assemble(&mut self, remap_to: Option<&[i64]>) -> Result<ImageRef> {
        let stacked = match self.loaded {
            Some(collection) => self
                .graph
                .invoke("Collection.toBands", [("collection", collection.into())]),
            None => {
                let probabilities: Vec<NodeId> = self
                    .prims
                    .iter()
                    .map(|prim| prim.probability.node())
                    .collect();
                let collection = self.graph.invoke(
                    "Collection.fromImages",
                    [("images", Arg::Nodes(probabilities))],
                );
                self.graph
                    .invoke("Collection.toBands", [("collection", collection.into())])
            }
        };

        let array = self.graph.invoke("Image.toArray", [("image", stacked.into())]);
        let argmax = self.graph.invoke("Image.arrayArgmax", [("image", array.into())]);
        let flattened = self.graph.invoke(
            "Image.arrayFlatten",
            [
                ("image", argmax.into()),
                (
                    "labels",
                    Value::List(vec![["classification"].into_iter().collect()]).into(),
                ),
            ],
        );
        let shifted = self.graph.invoke(
            "Image.add",
            [("image", flattened.into()), ("value", 1i64.into())],
        );
        let mut classified = self.graph.invoke(
            "Image.rename",
            [
                ("image", shifted.into()),
                ("names", ["LANDCOVER"].into_iter().collect::<Value>().into()),
            ],
        );

        if let Some(remap_to) = remap_to {
            if remap_to.len() != self.size {
                return Err(Error::Config(format!(
                    "remap_to has {} entries for {} primitives",
                    remap_to.len(),
                    self.size
                )));
            }
            let sequential: Value = (1..=self.size as i64).collect();
            classified = self.graph.invoke(
                "Image.remap",
                [
                    ("image", classified.into()),
                    ("from", sequential.into()),
                    ("to", remap_to.iter().copied().collect::<Value>().into()),
                ],
            );
        }

        Ok(ImageRef(classified))
    }

    /// Submit one image export per primitive into a freshly created image
    /// collection. Fire-and-forget: task submission is the end of our
    /// responsibility.
    pub async fn export_to_asset(
        &self,
        client: &Arc<dyn PlatformClient>,
        collection_asset_id: &str,
        scale: Option<u32>,
        crs: Option<String>,
    ) -> Result<()> {
        assert!(
            self.loaded.is_none(),
            "exporting a rehydrated ensemble would copy it onto itself"
        );

        info!(collection = collection_asset_id, "creating primitives collection");
        client.create_collection(collection_asset_id).await?;

        for prim in self.prims.iter() {
            let description = format!("Primitive{}", prim.class_value);
            let asset_id = format!("{}/{}", collection_asset_id, description);
            let params = ImageExportParams::to_asset(&description, &asset_id)
                .region(self.region)
                .scale(scale)
                .crs(crs.clone())
                .max_pixels(10_000_000_000_000);
            let task = client
                .export_image(&self.graph, prim.probability.node(), &params)
                .await?;
            info!(%task, asset = asset_id.as_str(), "export started (asset)");
        }

        Ok(())
    }

    /// Export the stacked probability bands as a single drive file.
    pub async fn export_to_drive(
        &mut self,
        client: &Arc<dyn PlatformClient>,
        description: &str,
        folder: &str,
        file_name_prefix: &str,
        scale: Option<u32>,
        crs: Option<String>,
    ) -> Result<()> {
        let probabilities: Vec<NodeId> = self
            .prims
            .iter()
            .map(|prim| prim.probability.node())
            .collect();
        let collection = match self.loaded {
            Some(collection) => collection.node(),
            None => self.graph.invoke(
                "Collection.fromImages",
                [("images", Arg::Nodes(probabilities))],
            ),
        };
        let stacked = self
            .graph
            .invoke("Collection.toBands", [("collection", collection.into())]);

        let params = ImageExportParams::to_drive(description, folder, file_name_prefix)
            .region(self.region)
            .scale(scale)
            .crs(crs);
        let task = client.export_image(&self.graph, stacked, &params).await?;
        info!(%task, folder, prefix = file_name_prefix, "export started (drive)");

        Ok(())
    }
}
