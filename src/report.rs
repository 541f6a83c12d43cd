//! # Report Stage
//!
//! Post-processing of the aggregated tables before they are handed on for
//! cross-model comparison.
//!
//! ## Built-in Steps
//! - **CarbonUnits**: CO2 to carbon mass (× 12/44) for models reporting CO2
//! - **AnnualTotal**: flux rates to Pg C per year using the land area
//! - **CoordinateLabels**: `45.25N_120.5W` style labels to `Latitude`/`Longitude`
//! - **ConsistencyFilter**: keeps models reporting every required variable
//! - **Percentage**: one variable as a percentage of another
//! - **DropFailures**: removes failure marker rows
//!
//! Steps are chained in a [`ReportPipeline`], built by hand or from a
//! [`ReportConfig`] inside the pipeline configuration:
//!
//! ```yaml
//! report:
//!   steps:
//!     - type: carbon_units
//!       models: [CanESM5]
//!     - type: annual_total
//! ```

use crate::error::ProcessingError;
use crate::output::write_csv;
use log::{debug, info, warn};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Molar mass ratio of carbon to CO2.
pub const CARBON_PER_CO2: f64 = 12.0 / 44.0;
/// Seconds in a 365 day year.
pub const SECONDS_PER_YEAR: f64 = 31_536_000.0;
/// Kilograms to petagrams.
pub const KG_TO_PG: f64 = 1e-12;
/// Units of the flux rates [`AnnualTotal`] converts.
pub const RATE_UNITS: &str = "kg m-2 s-1";
/// Units written by [`AnnualTotal`].
pub const ANNUAL_UNITS: &str = "PgC yr-1";

/// Columns that identify a value apart from its variable, in the order they
/// are matched by [`Percentage`].
const MATCH_COLUMNS: [&str; 11] = [
    "model",
    "experiment",
    "ensemble",
    "grid",
    "time",
    "datetime",
    "year",
    "month",
    "Latitude",
    "Longitude",
    "source",
];

/// Result type for report operations
pub type ReportResult<T> = Result<T, ReportError>;

/// Errors that can occur in the report stage
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Column '{0}' not found in DataFrame")]
    ColumnNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A transformation of a result table
pub trait ReportStep {
    /// Process the DataFrame and return the transformed result
    fn process(&self, df: DataFrame) -> ReportResult<DataFrame>;

    fn name(&self) -> &str;

    fn description(&self) -> &str;
}

/// Report settings as found in the pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Optional name for the report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Steps to execute in order
    #[serde(default)]
    pub steps: Vec<ReportStepConfig>,
    /// Directory receiving one CSV per variable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracts_dir: Option<PathBuf>,
}

/// Configuration of one report step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportStepConfig {
    /// Convert CO2 mass to carbon mass for the listed models
    CarbonUnits { models: Vec<String> },
    /// Convert flux rates to yearly totals
    AnnualTotal,
    /// Split a site label into coordinates
    CoordinateLabels { column: String },
    /// Keep models reporting all variables
    ConsistencyFilter { variables: Vec<String> },
    /// Express `variable` relative to `reference`
    Percentage { variable: String, reference: String },
    /// Remove failure markers
    DropFailures,
}

/// Pipeline that chains report steps together
pub struct ReportPipeline {
    steps: Vec<Box<dyn ReportStep>>,
    name: String,
}

impl ReportPipeline {
    pub fn new() -> Self {
        Self {
            name: "Unnamed Report".to_string(),
            steps: Vec::new(),
        }
    }

    pub fn with_name(name: String) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Create a report pipeline from configuration
    pub fn from_config(config: &ReportConfig) -> ReportResult<Self> {
        let mut pipeline = Self::with_name(
            config
                .name
                .clone()
                .unwrap_or_else(|| "Configured Report".to_string()),
        );
        for step in &config.steps {
            pipeline.add_step(create_step(step)?);
        }
        Ok(pipeline)
    }

    pub fn add_step(&mut self, step: Box<dyn ReportStep>) {
        self.steps.push(step);
    }

    /// Execute every step in order on a DataFrame
    pub fn execute(&self, mut df: DataFrame) -> ReportResult<DataFrame> {
        debug!(
            "Executing report '{}' with {} steps",
            self.name,
            self.steps.len()
        );

        for (i, step) in self.steps.iter().enumerate() {
            debug!(
                "Executing step {} '{}' - input shape: {:?}",
                i + 1,
                step.name(),
                df.shape()
            );
            df = step.process(df)?;
            debug!("Step '{}' completed - output shape: {:?}", step.name(), df.shape());
        }

        Ok(df)
    }
}

impl Default for ReportPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper function to create a step from configuration
pub fn create_step(config: &ReportStepConfig) -> ReportResult<Box<dyn ReportStep>> {
    match config {
        ReportStepConfig::CarbonUnits { models } => Ok(Box::new(CarbonUnits::new(models.clone()))),
        ReportStepConfig::AnnualTotal => Ok(Box::new(AnnualTotal)),
        ReportStepConfig::CoordinateLabels { column } => {
            if column.is_empty() {
                return Err(ReportError::Configuration(
                    "coordinate_labels needs a column".to_string(),
                ));
            }
            Ok(Box::new(CoordinateLabels::new(column.clone())))
        }
        ReportStepConfig::ConsistencyFilter { variables } => {
            if variables.is_empty() {
                return Err(ReportError::Configuration(
                    "consistency_filter needs at least one variable".to_string(),
                ));
            }
            Ok(Box::new(ConsistencyFilter::new(variables.clone())))
        }
        ReportStepConfig::Percentage {
            variable,
            reference,
        } => {
            if variable == reference {
                return Err(ReportError::Configuration(format!(
                    "percentage of '{}' relative to itself",
                    variable
                )));
            }
            Ok(Box::new(Percentage::new(variable.clone(), reference.clone())))
        }
        ReportStepConfig::DropFailures => Ok(Box::new(DropFailures)),
    }
}

fn require(df: &DataFrame, columns: &[&str]) -> ReportResult<()> {
    let present: Vec<&str> = df.get_column_names().iter().map(|s| s.as_str()).collect();
    match columns.iter().find(|name| !present.contains(name)) {
        Some(missing) => Err(ReportError::ColumnNotFound(missing.to_string())),
        None => Ok(()),
    }
}

/// `col(column) == values[0] || col(column) == values[1] || ...`
fn any_of(column: &str, values: &[String]) -> Expr {
    values
        .iter()
        .map(|v| col(column).eq(lit(v.as_str())))
        .reduce(|acc, expr| acc.or(expr))
        .unwrap_or_else(|| lit(false))
}

pub struct CarbonUnits {
    models: Vec<String>,
}

impl CarbonUnits {
    pub fn new(models: Vec<String>) -> Self {
        Self { models }
    }
}

impl ReportStep for CarbonUnits {
    fn process(&self, df: DataFrame) -> ReportResult<DataFrame> {
        require(&df, &["model", "value"])?;
        if self.models.is_empty() {
            return Ok(df);
        }
        debug!("Converting CO2 to carbon for {:?}", self.models);

        Ok(df
            .lazy()
            .with_columns([when(any_of("model", &self.models))
                .then(col("value") * lit(CARBON_PER_CO2))
                .otherwise(col("value"))
                .alias("value")])
            .collect()?)
    }

    fn name(&self) -> &str {
        "CarbonUnits"
    }

    fn description(&self) -> &str {
        "Converts CO2 mass to carbon mass for selected models"
    }
}

/// Multiplies flux rates by the land area and the length of a year.
///
/// Only rows in [`RATE_UNITS`] are converted; their units become
/// [`ANNUAL_UNITS`].
pub struct AnnualTotal;

impl ReportStep for AnnualTotal {
    fn process(&self, df: DataFrame) -> ReportResult<DataFrame> {
        require(&df, &["value", "units", "area"])?;
        let is_rate = col("units").eq(lit(RATE_UNITS));

        Ok(df
            .lazy()
            .with_columns([
                when(is_rate.clone())
                    .then(col("value") * col("area") * lit(SECONDS_PER_YEAR * KG_TO_PG))
                    .otherwise(col("value"))
                    .alias("value"),
                when(is_rate)
                    .then(lit(ANNUAL_UNITS))
                    .otherwise(col("units"))
                    .alias("units"),
            ])
            .collect()?)
    }

    fn name(&self) -> &str {
        "AnnualTotal"
    }

    fn description(&self) -> &str {
        "Converts flux rates to yearly totals over the land area"
    }
}

pub struct CoordinateLabels {
    column: String,
}

impl CoordinateLabels {
    pub fn new(column: String) -> Self {
        Self { column }
    }

    /// Parses `45.25N_120.5W` into `(45.25, -120.5)`.
    pub fn parse_label(label: &str) -> Option<(f64, f64)> {
        let (lat, lon) = label.trim().split_once('_')?;
        Some((signed(lat, 'N', 'S')?, signed(lon, 'E', 'W')?))
    }
}

fn signed(text: &str, positive: char, negative: char) -> Option<f64> {
    if !text.is_ascii() {
        return None;
    }
    let hemisphere = text.chars().last()?.to_ascii_uppercase();
    let magnitude: f64 = text[..text.len() - 1].parse().ok()?;
    match hemisphere {
        h if h == positive => Some(magnitude),
        h if h == negative => Some(-magnitude),
        _ => None,
    }
}

impl ReportStep for CoordinateLabels {
    fn process(&self, mut df: DataFrame) -> ReportResult<DataFrame> {
        require(&df, &[self.column.as_str()])?;

        let parsed: Vec<Option<(f64, f64)>> = df
            .column(&self.column)?
            .str()?
            .into_iter()
            .map(|label| label.and_then(Self::parse_label))
            .collect();
        let unparsed = parsed.iter().filter(|p| p.is_none()).count();
        if unparsed > 0 {
            warn!(
                "{} labels in '{}' are not coordinates",
                unparsed, self.column
            );
        }

        let latitude: Vec<Option<f64>> = parsed.iter().map(|p| p.map(|(lat, _)| lat)).collect();
        let longitude: Vec<Option<f64>> = parsed.iter().map(|p| p.map(|(_, lon)| lon)).collect();
        df.with_column(Series::new("Latitude".into(), latitude))?;
        df.with_column(Series::new("Longitude".into(), longitude))?;
        Ok(df)
    }

    fn name(&self) -> &str {
        "CoordinateLabels"
    }

    fn description(&self) -> &str {
        "Splits coordinate labels into Latitude and Longitude"
    }
}

pub struct ConsistencyFilter {
    variables: Vec<String>,
}

impl ConsistencyFilter {
    pub fn new(variables: Vec<String>) -> Self {
        Self { variables }
    }
}

impl ReportStep for ConsistencyFilter {
    fn process(&self, df: DataFrame) -> ReportResult<DataFrame> {
        require(&df, &["model", "variable"])?;

        let mut reported: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let models = df.column("model")?.str()?;
        let variables = df.column("variable")?.str()?;
        for (model, variable) in models.into_iter().zip(variables.into_iter()) {
            if let (Some(model), Some(variable)) = (model, variable) {
                reported
                    .entry(model.to_string())
                    .or_default()
                    .insert(variable.to_string());
            }
        }

        let complete: Vec<String> = reported
            .into_iter()
            .filter(|(_, found)| self.variables.iter().all(|v| found.contains(v)))
            .map(|(model, _)| model)
            .collect();
        info!(
            "{} models report all of {:?}",
            complete.len(),
            self.variables
        );

        Ok(df.lazy().filter(any_of("model", &complete)).collect()?)
    }

    fn name(&self) -> &str {
        "ConsistencyFilter"
    }

    fn description(&self) -> &str {
        "Keeps only models that report every required variable"
    }
}

/// `100 * variable / reference`, matched on the identifying columns present.
///
/// The result replaces the input table: one row per match, with `variable`
/// set to `{variable}_pct_{reference}` and `units` to `%`.
pub struct Percentage {
    variable: String,
    reference: String,
}

impl Percentage {
    pub fn new(variable: String, reference: String) -> Self {
        Self {
            variable,
            reference,
        }
    }
}

impl ReportStep for Percentage {
    fn process(&self, df: DataFrame) -> ReportResult<DataFrame> {
        require(&df, &["variable", "value"])?;
        let present: Vec<&str> = df.get_column_names().iter().map(|s| s.as_str()).collect();
        let keys: Vec<Expr> = MATCH_COLUMNS
            .iter()
            .filter(|name| present.contains(name))
            .map(|name| col(*name))
            .collect();
        if keys.is_empty() {
            return Err(ReportError::ColumnNotFound("model".to_string()));
        }

        let side = |variable: &str, alias: &str| {
            let mut columns = keys.clone();
            columns.push(col("value").alias(alias));
            df.clone()
                .lazy()
                .filter(col("variable").eq(lit(variable)))
                .select(columns)
        };

        let label = format!("{}_pct_{}", self.variable, self.reference);
        Ok(side(&self.variable, "numerator")
            .join(
                side(&self.reference, "denominator"),
                keys.clone(),
                keys.clone(),
                JoinArgs::new(JoinType::Inner),
            )
            .select(
                [
                    (col("numerator") / col("denominator") * lit(100.0)).alias("value"),
                    lit(label.as_str()).alias("variable"),
                    lit("%").alias("units"),
                ]
                .into_iter()
                .chain(keys)
                .collect::<Vec<_>>(),
            )
            .collect()?)
    }

    fn name(&self) -> &str {
        "Percentage"
    }

    fn description(&self) -> &str {
        "Expresses one variable as a percentage of another"
    }
}

/// Removes rows with `problem = true`. Tables without a `problem` column
/// pass through.
pub struct DropFailures;

impl ReportStep for DropFailures {
    fn process(&self, df: DataFrame) -> ReportResult<DataFrame> {
        if df.column("problem").is_err() {
            return Ok(df);
        }
        Ok(df
            .lazy()
            .filter(col("problem").eq(lit(false)))
            .collect()?)
    }

    fn name(&self) -> &str {
        "DropFailures"
    }

    fn description(&self) -> &str {
        "Removes failure marker rows"
    }
}

/// Writes `{dir}/{variable}.csv` for every variable of `df`. Rows without a
/// variable are skipped. Returns the written paths in variable order.
pub fn write_extracts(df: &DataFrame, dir: &Path) -> ReportResult<Vec<PathBuf>> {
    require(df, &["variable"])?;
    std::fs::create_dir_all(dir)?;

    let variables: BTreeSet<String> = df
        .column("variable")?
        .str()?
        .into_iter()
        .flatten()
        .map(|v| v.to_string())
        .collect();

    let mut written = Vec::with_capacity(variables.len());
    for variable in variables {
        let mut extract = df
            .clone()
            .lazy()
            .filter(col("variable").eq(lit(variable.as_str())))
            .collect()?;
        let path = dir.join(format!("{}.csv", variable));
        write_csv(&mut extract, &path)?;
        written.push(path);
    }

    info!("Wrote {} extracts to {}", written.len(), dir.display());
    Ok(written)
}
