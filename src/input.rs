//! # Input Configuration Module
//!
//! Configuration parsing and validation for cmipflux runs. A configuration
//! file names the archive to process, the intermediate directory used as a
//! cache, the output table and the options of both aggregation paths.
//!
//! ## Configuration Structure
//!
//! - **index** or **archive_dir**: an archive index CSV, or a directory to scan
//! - **intermediate_dir**: where weight grids, per-file tables and point
//!   extractions are kept between runs
//! - **output**: the combined result table (`.csv` or `.parquet`)
//! - **variables** / **experiment**: what the weighted aggregator selects
//! - **coordinates** / **point_variables**: what the point extractor selects
//! - **report**: optional report steps, see [`crate::report`]
//!
//! ## Example Usage
//!
//! ```rust
//! use cmipflux::input::PipelineConfig;
//!
//! let json = r#"
//! {
//!   "index": "archive.csv",
//!   "intermediate_dir": "work",
//!   "output": "global.csv"
//! }"#;
//! let config = PipelineConfig::from_json(json)?;
//! assert_eq!(config.variables, vec!["gpp", "npp", "rh"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::points::DEFAULT_POINT_VARIABLES;
use crate::report::{ReportConfig, ReportPipeline, ReportStepConfig};
use crate::resolve::DEFAULT_EXPERIMENT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Variables the weighted aggregator selects unless configured otherwise.
pub const DEFAULT_VARIABLES: [&str; 3] = ["gpp", "npp", "rh"];

/// Errors raised while loading or checking a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete configuration of a cmipflux run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Archive index CSV
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<PathBuf>,
    /// Directory scanned for CMOR-named files when no index is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_dir: Option<PathBuf>,
    /// Cache directory for derived files
    #[serde(default = "default_intermediate_dir")]
    pub intermediate_dir: PathBuf,
    /// Result table
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// Grid tool executable
    #[serde(default = "default_tool")]
    pub tool: String,
    #[serde(default = "default_variables")]
    pub variables: Vec<String>,
    #[serde(default = "default_experiment")]
    pub experiment: String,
    /// Delete per-file mean tables after concatenation
    #[serde(default)]
    pub cleanup: bool,
    /// Coordinate table for point extraction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<PathBuf>,
    #[serde(default = "default_point_variables")]
    pub point_variables: Vec<String>,
    /// Recompute point groups whose cached entry is a failure
    #[serde(default)]
    pub retry_failed: bool,
    /// Reuse existing land area grids
    #[serde(default = "default_true")]
    pub reuse_weights: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportConfig>,
}

fn default_intermediate_dir() -> PathBuf {
    PathBuf::from("intermediate")
}

fn default_output() -> PathBuf {
    PathBuf::from("output.csv")
}

fn default_tool() -> String {
    "cdo".to_string()
}

fn default_variables() -> Vec<String> {
    DEFAULT_VARIABLES.iter().map(|v| v.to_string()).collect()
}

fn default_experiment() -> String {
    DEFAULT_EXPERIMENT.to_string()
}

fn default_point_variables() -> Vec<String> {
    DEFAULT_POINT_VARIABLES.iter().map(|v| v.to_string()).collect()
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            index: None,
            archive_dir: None,
            intermediate_dir: default_intermediate_dir(),
            output: default_output(),
            tool: default_tool(),
            variables: default_variables(),
            experiment: default_experiment(),
            cleanup: false,
            coordinates: None,
            point_variables: default_point_variables(),
            retry_failed: false,
            reuse_weights: true,
            report: None,
        }
    }
}

impl PipelineConfig {
    /// Loads a configuration file, YAML for `.yaml`/`.yml` and JSON otherwise.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use cmipflux::input::PipelineConfig;
    ///
    /// let config = PipelineConfig::from_file("cmipflux.yaml")?;
    /// println!("Selecting {:?}", config.variables);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        if is_yaml(path) {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json_str)?)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml_str)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Checks the configuration itself, without touching the file system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.index, &self.archive_dir) {
            (None, None) => {
                return Err(ConfigError::Invalid(
                    "either 'index' or 'archive_dir' is required".to_string(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "'index' and 'archive_dir' are mutually exclusive".to_string(),
                ));
            }
            _ => {}
        }
        if self.variables.is_empty() {
            return Err(ConfigError::Invalid("'variables' is empty".to_string()));
        }
        if self.point_variables.is_empty() {
            return Err(ConfigError::Invalid(
                "'point_variables' is empty".to_string(),
            ));
        }
        if self.experiment.trim().is_empty() {
            return Err(ConfigError::Invalid("'experiment' is empty".to_string()));
        }
        if self.tool.trim().is_empty() {
            return Err(ConfigError::Invalid("'tool' is empty".to_string()));
        }
        if let Some(report) = &self.report {
            ReportPipeline::from_config(report)
                .map_err(|e| ConfigError::Invalid(format!("report: {}", e)))?;
        }
        Ok(())
    }

    /// Lists the input paths that do not exist. An empty list means every
    /// configured input is in place.
    pub fn missing_inputs(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if let Some(index) = &self.index
            && !index.is_file()
        {
            missing.push(format!("index file {}", index.display()));
        }
        if let Some(dir) = &self.archive_dir
            && !dir.is_dir()
        {
            missing.push(format!("archive directory {}", dir.display()));
        }
        if let Some(coordinates) = &self.coordinates
            && !coordinates.is_file()
        {
            missing.push(format!("coordinate table {}", coordinates.display()));
        }
        missing
    }

    /// Template for the weighted aggregator.
    pub fn global_template() -> Self {
        PipelineConfig {
            index: Some(PathBuf::from("archive.csv")),
            intermediate_dir: PathBuf::from("intermediate"),
            output: PathBuf::from("global_means.csv"),
            cleanup: true,
            ..Default::default()
        }
    }

    /// Template for the point extractor.
    pub fn points_template() -> Self {
        PipelineConfig {
            archive_dir: Some(PathBuf::from("/data/CMIP6")),
            intermediate_dir: PathBuf::from("intermediate"),
            output: PathBuf::from("points.csv"),
            coordinates: Some(PathBuf::from("sites.csv")),
            ..Default::default()
        }
    }

    /// Template with a report section.
    pub fn report_template() -> Self {
        PipelineConfig {
            report: Some(ReportConfig {
                name: Some("carbon budget".to_string()),
                steps: vec![
                    ReportStepConfig::DropFailures,
                    ReportStepConfig::CarbonUnits {
                        models: vec!["CanESM5".to_string()],
                    },
                    ReportStepConfig::AnnualTotal,
                    ReportStepConfig::ConsistencyFilter {
                        variables: default_variables(),
                    },
                ],
                extracts_dir: Some(PathBuf::from("extracts")),
            }),
            ..Self::global_template()
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}
