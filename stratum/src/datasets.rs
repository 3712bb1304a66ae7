use std::str::FromStr;

use strum_macros::{Display, EnumIter, EnumString};

use platform::graph::{CollectionRef, ExprGraph, RegionRef};

use crate::error::Error;

/// The catalog datasets the platform can serve directly. Cloud masking and
/// band harmonization for each sensor happen platform-side when the
/// collection is loaded.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, EnumString, EnumIter)]
pub enum DatasetName {
    Landsat5,
    Landsat7,
    Landsat8,
    Sentinel1,
    Sentinel1Asc,
    Sentinel1Desc,
    Sentinel2,
    #[strum(serialize = "MODIS")]
    Modis,
    #[strum(serialize = "VIIRS")]
    Viirs,
}

/// A dataset reference: a catalog name, or an external image-collection
/// asset path. Any string containing `/` is treated as an asset path and
/// passed through unexamined.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum DatasetSpec {
    Named(DatasetName),
    Asset(String),
}

impl FromStr for DatasetSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(name) = DatasetName::from_str(s) {
            return Ok(DatasetSpec::Named(name));
        }
        if s.contains('/') {
            return Ok(DatasetSpec::Asset(s.to_string()));
        }
        Err(Error::Dataset(s.to_string()))
    }
}

impl DatasetSpec {
    /// Band-prefix label for merged multi-dataset composites; asset paths
    /// swap `/` for `_` so the label stays a valid band-name fragment.
    pub fn label(&self) -> String {
        match self {
            DatasetSpec::Named(name) => name.to_string(),
            DatasetSpec::Asset(path) => path.replace('/', "_"),
        }
    }

    /// Append the time-bounded collection load for this dataset.
    pub fn load(
        &self,
        graph: &mut ExprGraph,
        region: RegionRef,
        start_date: &str,
        end_date: &str,
    ) -> CollectionRef {
        let node = match self {
            DatasetSpec::Named(name) => graph.invoke(
                "Dataset.load",
                [
                    ("name", name.to_string().into()),
                    ("region", region.into()),
                    ("start", start_date.into()),
                    ("end", end_date.into()),
                ],
            ),
            DatasetSpec::Asset(path) => graph.invoke(
                "Collection.load",
                [
                    ("asset", path.as_str().into()),
                    ("region", region.into()),
                    ("start", start_date.into()),
                    ("end", end_date.into()),
                ],
            ),
        };
        CollectionRef(node)
    }
}
