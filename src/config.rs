use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub packing: PackingConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackingConfig {
    /// Material used for shapes whose fill color has no mapping.
    pub default_material: String,
    pub tolerance: f64,
    /// Spacing the nester keeps between parts.
    pub spacing: f64,
    pub rotations: u32,
    pub partial_solutions: bool,
    /// Kerf margin used when measuring consumed area.
    pub utilization_margin: f64,
    /// Upper bound for the doubling phase of the max-copies search.
    pub max_copies_limit: u32,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            default_material: "0.1mm-white-letterpaper".to_string(),
            tolerance: 5.0,
            spacing: 10.0,
            rotations: 2,
            partial_solutions: true,
            utilization_margin: 20.0,
            max_copies_limit: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub material_db: PathBuf,
    pub color_db: PathBuf,
    pub output_dir: PathBuf,
    pub preview_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            material_db: PathBuf::from("mat-data.txt"),
            color_db: PathBuf::from("colordict2.json"),
            output_dir: PathBuf::from("cuts"),
            preview_dir: PathBuf::from("previews"),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.packing;
        if p.spacing < 0.0 || p.tolerance < 0.0 || p.utilization_margin < 0.0 {
            return Err(Error::Config(
                "spacing, tolerance and utilization_margin must be non-negative".to_string(),
            ));
        }
        if p.rotations == 0 {
            return Err(Error::Config("rotations must be at least 1".to_string()));
        }
        if p.max_copies_limit == 0 {
            return Err(Error::Config("max_copies_limit must be non-zero".to_string()));
        }
        if p.default_material.is_empty() {
            return Err(Error::Config("default_material must not be empty".to_string()));
        }
        Ok(())
    }
}
