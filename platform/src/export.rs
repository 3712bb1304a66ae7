use serde::{Deserialize, Serialize};

use crate::graph::RegionRef;
use common::id_type;

id_type!(TaskId);

/// Where an export job writes its result. Both targets are fire-and-forget:
/// submission returns a task id and the job's outcome stays with the
/// platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportDestination {
    Asset { asset_id: String },
    Drive { folder: String, file_name_prefix: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageExportParams {
    pub description: String,
    pub destination: ExportDestination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<RegionRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs_transform: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pixels: Option<u64>,
}

impl ImageExportParams {
    pub fn to_asset(description: &str, asset_id: &str) -> Self {
        Self {
            description: description.to_string(),
            destination: ExportDestination::Asset {
                asset_id: asset_id.to_string(),
            },
            region: None,
            scale: None,
            crs: None,
            crs_transform: None,
            max_pixels: None,
        }
    }

    pub fn to_drive(description: &str, folder: &str, file_name_prefix: &str) -> Self {
        Self {
            description: description.to_string(),
            destination: ExportDestination::Drive {
                folder: folder.to_string(),
                file_name_prefix: file_name_prefix.to_string(),
            },
            region: None,
            scale: None,
            crs: None,
            crs_transform: None,
            max_pixels: None,
        }
    }

    pub fn region(mut self, region: RegionRef) -> Self {
        self.region = Some(region);
        self
    }
    pub fn scale(mut self, scale: Option<u32>) -> Self {
        self.scale = scale;
        self
    }
    pub fn crs(mut self, crs: Option<String>) -> Self {
        self.crs = crs;
        self
    }
    pub fn max_pixels(mut self, max_pixels: u64) -> Self {
        self.max_pixels = Some(max_pixels);
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableExportParams {
    pub description: String,
    pub destination: ExportDestination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectors: Option<Vec<String>>,
}

impl TableExportParams {
    pub fn to_asset(description: &str, asset_id: &str) -> Self {
        Self {
            description: description.to_string(),
            destination: ExportDestination::Asset {
                asset_id: asset_id.to_string(),
            },
            selectors: None,
        }
    }

    pub fn to_drive(description: &str, folder: &str, file_name_prefix: &str) -> Self {
        Self {
            description: description.to_string(),
            destination: ExportDestination::Drive {
                folder: folder.to_string(),
                file_name_prefix: file_name_prefix.to_string(),
            },
            selectors: None,
        }
    }

    pub fn selectors(mut self, selectors: Vec<String>) -> Self {
        self.selectors = Some(selectors);
        self
    }
}
