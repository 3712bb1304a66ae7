use hashbrown::hash_map::{Entry, Values};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// What an operator produces, and what its node-valued arguments must
/// produce. `Value` covers server-side scalars, lists and dictionaries;
/// `Any` is reserved for conditionals whose branches decide the kind.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Kind {
    Image,
    Collection,
    Table,
    Region,
    Model,
    Value,
    Any,
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Kind::Image => "Image",
            Kind::Collection => "Collection",
            Kind::Table => "Table",
            Kind::Region => "Region",
            Kind::Model => "Model",
            Kind::Value => "Value",
            Kind::Any => "Any",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpInput {
    pub name: String,
    pub required: bool,
    pub kind: Kind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpSpec {
    pub name: String,
    pub output: Kind,
    pub inputs: Vec<OpInput>,
}

impl OpSpec {
    pub fn new(name: &str, output: Kind) -> Self {
        Self {
            name: name.to_string(),
            output,
            inputs: Vec::new(),
        }
    }

    pub fn arg(mut self, name: &str, kind: Kind) -> Self {
        self.inputs.push(OpInput {
            name: name.to_string(),
            required: true,
            kind,
        });
        self
    }

    pub fn opt(mut self, name: &str, kind: Kind) -> Self {
        self.inputs.push(OpInput {
            name: name.to_string(),
            required: false,
            kind,
        });
        self
    }
}

/// Catalog of remote operators known to this client. Graph validation
/// resolves every node's operator name here before submission.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct OpLib {
    ops: HashMap<String, OpSpec>,
}

impl OpLib {
    pub fn get(&self, name: &str) -> Option<&OpSpec> {
        self.ops.get(name)
    }

    pub fn add(&mut self, spec: OpSpec) {
        match self.ops.entry(spec.name.clone()) {
            Entry::Occupied(_) => panic!("Operator {} already exists", spec.name),
            Entry::Vacant(entry) => {
                entry.insert(spec);
            }
        }
    }

    pub fn merge(&mut self, other: OpLib) {
        for (_, spec) in other.ops {
            self.add(spec);
        }
    }

    pub fn iter(&self) -> Values<'_, String, OpSpec> {
        self.ops.values()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Every operator the domain layer constructs. The pixel-level
    /// semantics behind these names (cloud masking, index formulas,
    /// harmonic fitting, forest training) live entirely on the platform.
    pub fn standard() -> Self {
        use Kind::*;

        let mut lib = OpLib::default();
        let specs = [
            // loading
            OpSpec::new("Dataset.load", Collection)
                .arg("name", Value)
                .arg("region", Region)
                .arg("start", Value)
                .arg("end", Value),
            OpSpec::new("Collection.load", Collection)
                .arg("asset", Value)
                .arg("region", Region)
                .arg("start", Value)
                .arg("end", Value),
            OpSpec::new("Collection.fromAsset", Collection).arg("asset", Value),
            OpSpec::new("Image.load", Image).arg("asset", Value),
            OpSpec::new("Table.load", Table).arg("asset", Value),
            // collection transforms
            OpSpec::new("Collection.updateMask", Collection)
                .arg("collection", Collection)
                .arg("mask", Image),
            OpSpec::new("Collection.addIndices", Collection)
                .arg("collection", Collection)
                .arg("indices", Value),
            OpSpec::new("Collection.addTasselCap", Collection).arg("collection", Collection),
            OpSpec::new("Collection.aggregateTime", Collection)
                .arg("collection", Collection)
                .arg("reducer", Value)
                .arg("period", Value)
                .arg("period_unit", Value)
                .arg("dates", Value),
            OpSpec::new("Collection.harmonicRegression", Image)
                .arg("collection", Collection)
                .arg("band", Value)
                .arg("doy_start", Value)
                .arg("doy_end", Value),
            OpSpec::new("Collection.toBands", Image).arg("collection", Collection),
            OpSpec::new("Collection.fromImages", Collection).arg("images", Image),
            OpSpec::new("Collection.dates", Value).arg("collection", Collection),
            OpSpec::new("Collection.size", Value).arg("collection", Collection),
            OpSpec::new("Collection.geometry", Region).arg("collection", Collection),
            // image algebra
            OpSpec::new("Image.constant", Image).arg("value", Value),
            OpSpec::new("Image.paint", Image)
                .arg("image", Image)
                .arg("features", Table),
            OpSpec::new("Image.not", Image).arg("image", Image),
            OpSpec::new("Image.selfMask", Image).arg("image", Image),
            OpSpec::new("Image.addBands", Image)
                .arg("image", Image)
                .arg("bands", Image),
            OpSpec::new("Image.rename", Image)
                .arg("image", Image)
                .arg("names", Value),
            OpSpec::new("Image.prefixBandNames", Image)
                .arg("image", Image)
                .arg("prefix", Value),
            OpSpec::new("Image.stripBandPrefix", Image)
                .arg("image", Image)
                .arg("count", Value),
            OpSpec::new("Image.unmask", Image)
                .arg("image", Image)
                .arg("value", Value),
            OpSpec::new("Image.clip", Image)
                .arg("image", Image)
                .arg("geometry", Region),
            OpSpec::new("Image.addTopography", Image).arg("image", Image),
            OpSpec::new("Image.addSurfaceWater", Image).arg("image", Image),
            OpSpec::new("Image.bandNames", Value).arg("image", Image),
            OpSpec::new("Image.geometry", Region).arg("image", Image),
            OpSpec::new("Image.toArray", Image).arg("image", Image),
            OpSpec::new("Image.arrayArgmax", Image).arg("image", Image),
            OpSpec::new("Image.arrayFlatten", Image)
                .arg("image", Image)
                .arg("labels", Value),
            OpSpec::new("Image.add", Image)
                .arg("image", Image)
                .arg("value", Value),
            OpSpec::new("Image.remap", Image)
                .arg("image", Image)
                .arg("from", Value)
                .arg("to", Value),
            OpSpec::new("Image.classify", Image)
                .arg("image", Image)
                .arg("model", Model)
                .opt("output_name", Value),
            OpSpec::new("Image.stratifiedSample", Table)
                .arg("image", Image)
                .arg("class_band", Value)
                .arg("region", Region)
                .arg("scale", Value)
                .arg("seed", Value)
                .arg("num_points", Value)
                .opt("class_values", Value)
                .opt("class_points", Value)
                .opt("drop_nulls", Value)
                .opt("tile_scale", Value)
                .opt("geometries", Value),
            OpSpec::new("Image.sampleRegions", Table)
                .arg("image", Image)
                .arg("collection", Table)
                .arg("scale", Value)
                .opt("projection", Value)
                .opt("tile_scale", Value)
                .opt("geometries", Value),
            // table operations
            OpSpec::new("Table.merge", Table)
                .arg("left", Table)
                .arg("right", Table),
            OpSpec::new("Table.filterEq", Table)
                .arg("table", Table)
                .arg("property", Value)
                .arg("value", Value),
            OpSpec::new("Table.filterNeq", Table)
                .arg("table", Table)
                .arg("property", Value)
                .arg("value", Value),
            OpSpec::new("Table.filterLt", Table)
                .arg("table", Table)
                .arg("property", Value)
                .arg("value", Value),
            OpSpec::new("Table.filterGte", Table)
                .arg("table", Table)
                .arg("property", Value)
                .arg("value", Value),
            OpSpec::new("Table.setProperty", Table)
                .arg("table", Table)
                .arg("property", Value)
                .arg("value", Value),
            OpSpec::new("Table.selectProperties", Table)
                .arg("table", Table)
                .arg("properties", Value),
            OpSpec::new("Table.removeProperties", Table)
                .arg("table", Table)
                .arg("properties", Value),
            OpSpec::new("Table.randomColumn", Table)
                .arg("table", Table)
                .opt("name", Value)
                .arg("seed", Value),
            OpSpec::new("Table.limit", Table)
                .arg("table", Table)
                .arg("count", Value)
                .opt("sort_by", Value),
            OpSpec::new("Table.aggregateDistinct", Value)
                .arg("table", Table)
                .arg("property", Value),
            OpSpec::new("Table.geometry", Region).arg("table", Table),
            OpSpec::new("Table.geometryType", Value).arg("table", Table),
            OpSpec::new("Table.randomPoints", Table)
                .arg("region", Region)
                .arg("count", Value)
                .arg("seed", Value)
                .opt("max_error", Value),
            OpSpec::new("Table.formatPoints", Table)
                .arg("table", Table)
                .opt("prefix", Value),
            // classifier and model
            OpSpec::new("Classifier.randomForest", Model)
                .arg("trees", Value)
                .arg("min_leaf_population", Value)
                .arg("bag_fraction", Value)
                .arg("seed", Value)
                .arg("output_mode", Value),
            OpSpec::new("Classifier.train", Model)
                .arg("classifier", Model)
                .arg("features", Table)
                .arg("class_property", Value)
                .arg("input_properties", Value),
            OpSpec::new("Model.explain", Value).arg("model", Model),
            OpSpec::new("Model.schema", Value).arg("model", Model),
            // control flow and list helpers
            OpSpec::new("Algorithms.If", Any)
                .arg("condition", Value)
                .arg("then", Any)
                .arg("else", Any),
            OpSpec::new("List.contains", Value)
                .arg("list", Value)
                .arg("value", Value),
            OpSpec::new("List.add", Value)
                .arg("list", Value)
                .arg("value", Value),
            OpSpec::new("Geometry.bounds", Region).arg("geometry", Region),
        ];

        for spec in specs {
            lib.add(spec);
        }
        lib
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_resolves_core_operators() {
        let lib = OpLib::standard();
        for name in [
            "Dataset.load",
            "Collection.aggregateTime",
            "Collection.harmonicRegression",
            "Image.stratifiedSample",
            "Image.arrayArgmax",
            "Classifier.randomForest",
            "Classifier.train",
            "Model.explain",
            "Algorithms.If",
        ] {
            assert!(lib.get(name).is_some(), "missing operator {}", name);
        }
    }

    #[test]
    fn spec_builder_marks_optional_inputs() {
        let lib = OpLib::standard();
        let sample = lib.get("Image.stratifiedSample").unwrap();
        let class_values = sample
            .inputs
            .iter()
            .find(|input| input.name == "class_values")
            .unwrap();
        assert!(!class_values.required);
        assert_eq!(sample.output, Kind::Table);
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn duplicate_operator_panics() {
        let mut lib = OpLib::standard();
        lib.add(OpSpec::new("Model.explain", Kind::Value));
    }
}
