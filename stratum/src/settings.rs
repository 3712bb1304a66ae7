use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{Error, Result};

/// Where a settings document comes from: an inline JSON mapping or a JSON
/// file on disk.
#[derive(Clone, Debug)]
pub enum SettingsSource {
    Inline(serde_json::Value),
    File(PathBuf),
}

impl From<&str> for SettingsSource {
    fn from(path: &str) -> Self {
        SettingsSource::File(PathBuf::from(path))
    }
}

impl From<PathBuf> for SettingsSource {
    fn from(path: PathBuf) -> Self {
        SettingsSource::File(path)
    }
}

impl From<serde_json::Value> for SettingsSource {
    fn from(value: serde_json::Value) -> Self {
        SettingsSource::Inline(value)
    }
}

#[derive(
    Clone, Copy, PartialEq, Eq, Debug, Default, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CompositeMode {
    #[default]
    Annual,
    Seasonal,
}

/// Day-of-year window bounding a harmonic fit for one band.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DoyWindow {
    pub start: u32,
    pub end: u32,
}

fn default_reducer() -> String {
    "mean".to_string()
}

/// The recognized composite options, with defaults. A settings document may
/// carry keys for other composite variants; anything unrecognized is
/// ignored so one document can be shared across variants.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompositeOptions {
    #[serde(default)]
    pub indices: Vec<String>,
    #[serde(default)]
    pub composite_mode: CompositeMode,
    #[serde(default)]
    pub season: Vec<u32>,
    #[serde(default = "default_reducer")]
    pub reducer: String,
    #[serde(default, rename = "addTopography")]
    pub add_topography: bool,
    #[serde(default, rename = "addJRCWater")]
    pub add_jrc_water: bool,
    #[serde(default, rename = "addTasselCap")]
    pub add_tassel_cap: bool,
    #[serde(default, rename = "addHarmonics")]
    pub add_harmonics: bool,
    #[serde(default, rename = "harmonicsOptions")]
    pub harmonics_options: BTreeMap<String, DoyWindow>,
    #[serde(default)]
    pub multi_poly: bool,
}

impl Default for CompositeOptions {
    fn default() -> Self {
        Self {
            indices: Vec::new(),
            composite_mode: CompositeMode::default(),
            season: Vec::new(),
            reducer: default_reducer(),
            add_topography: false,
            add_jrc_water: false,
            add_tassel_cap: false,
            add_harmonics: false,
            harmonics_options: BTreeMap::new(),
            multi_poly: false,
        }
    }
}

impl CompositeOptions {
    /// Resolve a settings source into validated options.
    pub fn resolve<S: Into<SettingsSource>>(source: S) -> Result<Self> {
        let value = match source.into() {
            SettingsSource::Inline(value) => {
                if !value.is_object() {
                    return Err(Error::Config(format!(
                        "settings must be a JSON mapping, got: {}",
                        value
                    )));
                }
                value
            }
            SettingsSource::File(path) => common::read_json(&path)
                .map_err(|e| Error::Config(format!("could not load settings: {}", e)))?,
        };

        let options: CompositeOptions = serde_json::from_value(value)
            .map_err(|e| Error::Config(format!("malformed settings: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.composite_mode == CompositeMode::Seasonal {
            if self.season.is_empty() {
                return Err(Error::Config(
                    "season is required when composite_mode is 'seasonal'".to_string(),
                ));
            }
            for month in self.season.iter() {
                if !(1..=12).contains(month) {
                    return Err(Error::Config(format!("invalid season month: {}", month)));
                }
            }
            for pair in self.season.windows(2) {
                if pair[1] != pair[0] + 1 {
                    return Err(Error::Config(format!(
                        "season months must be consecutive, got: {:?}",
                        self.season
                    )));
                }
            }
        }

        if self.add_harmonics && self.harmonics_options.is_empty() {
            return Err(Error::Config(
                "harmonicsOptions is required when addHarmonics is set".to_string(),
            ));
        }
        for (band, window) in self.harmonics_options.iter() {
            if window.start < 1 || window.end > 366 || window.start > window.end {
                return Err(Error::Config(format!(
                    "invalid day-of-year window for band {}: {}..{}",
                    band, window.start, window.end
                )));
            }
        }

        Ok(())
    }
}
