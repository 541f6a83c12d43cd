//! # CLI Module
//!
//! This module provides the command-line interface for cmipflux, including:
//! - Argument parsing with clap
//! - Configuration file loading (JSON/YAML)
//! - Environment variable support with the CMIPFLUX_ prefix
//! - Merging of file, environment and command-line settings
//! - A small DSL for report steps on the command line

use crate::input::{ConfigError, PipelineConfig};
use crate::report::ReportStepConfig;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Land-area-weighted carbon flux statistics from CMIP archives
#[derive(Parser, Debug)]
#[command(name = "cmipflux")]
#[command(about = "Compute land-area-weighted carbon fluxes from CMIP archives")]
#[command(version)]
#[command(long_about = "
cmipflux turns a CMIP model archive into tables of carbon fluxes (GPP, NPP,
heterotrophic respiration) weighted by the land area of every grid cell.

FEATURES:
  • Archive indexing: scan CMOR-named NetCDF files into an index table
  • Global means: monthly land-area-weighted means per model run
  • Point extraction: yearly values at fixed sites, cached per model run
  • Reports: unit conversion, annual totals and cross-model filtering
  • Configuration files: JSON and YAML with templates

Grid arithmetic and remapping run through CDO, which must be installed.

EXAMPLES:
  # Index an archive
  cmipflux index /data/CMIP6 archive.csv

  # Global weighted means
  cmipflux global --index archive.csv -d work -o global.csv

  # Yearly values at sites
  cmipflux points --index archive.csv --coordinates sites.csv -d work -o points.csv

  # Using a config file
  cmipflux global --config cmipflux.yaml

  # Generate a template
  cmipflux template points --format yaml > cmipflux.yaml
")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode - suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format for structured data
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Configuration file path (JSON or YAML)
    #[arg(short, long, global = true, env = "CMIPFLUX_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Settings shared by the aggregation commands
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct RunArgs {
    /// Archive index CSV
    #[arg(long, env = "CMIPFLUX_INDEX", conflicts_with = "archive_dir")]
    pub index: Option<PathBuf>,

    /// Archive directory to scan instead of an index
    #[arg(long, env = "CMIPFLUX_ARCHIVE_DIR")]
    pub archive_dir: Option<PathBuf>,

    /// Directory for weight grids and cached tables
    #[arg(short = 'd', long, env = "CMIPFLUX_INTERMEDIATE_DIR")]
    pub intermediate_dir: Option<PathBuf>,

    /// Result table (.csv or .parquet)
    #[arg(short, long, env = "CMIPFLUX_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Grid tool executable
    #[arg(long, env = "CMIPFLUX_TOOL")]
    pub tool: Option<String>,

    /// Experiment to select
    #[arg(long, env = "CMIPFLUX_EXPERIMENT")]
    pub experiment: Option<String>,

    /// Regenerate land area grids even when they exist
    #[arg(long, env = "CMIPFLUX_NO_REUSE_WEIGHTS")]
    pub no_reuse_weights: bool,

    /// Validate configuration and inputs without processing
    #[arg(long)]
    pub dry_run: bool,
}

impl RunArgs {
    /// Overlays the values given on the command line or in the environment.
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(index) = &self.index {
            config.index = Some(index.clone());
            config.archive_dir = None;
        }
        if let Some(dir) = &self.archive_dir {
            config.archive_dir = Some(dir.clone());
            config.index = None;
        }
        if let Some(dir) = &self.intermediate_dir {
            config.intermediate_dir = dir.clone();
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if let Some(tool) = &self.tool {
            config.tool = tool.clone();
        }
        if let Some(experiment) = &self.experiment {
            config.experiment = experiment.clone();
        }
        if self.no_reuse_weights {
            config.reuse_weights = false;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build an archive index from a directory tree
    #[command(long_about = "
Scan a directory tree for CMOR-named NetCDF files and write an archive index.

File names must follow
  <variable>_<table>_<model>_<experiment>_<ensemble>_<grid>[_<time>].nc
Other files are skipped.

EXAMPLES:
  cmipflux index /data/CMIP6 archive.csv
")]
    Index {
        /// Directory to scan
        archive_dir: PathBuf,

        /// Index CSV to write
        output: PathBuf,
    },

    /// Compute land-area-weighted global means
    #[command(long_about = "
Compute monthly land-area-weighted means of every selected data file.

Land fraction and cell area are looked up per model, experiment, ensemble
member and grid; the land area grid is generated once and reused. Any error
aborts the run.

EXAMPLES:
  cmipflux global --index archive.csv -d work -o global.csv
  cmipflux global --config cmipflux.yaml --variables gpp,npp --cleanup
")]
    Global {
        #[command(flatten)]
        run: RunArgs,

        /// Variables to aggregate (comma separated)
        #[arg(long, value_delimiter = ',', env = "CMIPFLUX_VARIABLES")]
        variables: Vec<String>,

        /// Delete per-file tables after concatenation
        #[arg(long, env = "CMIPFLUX_CLEANUP")]
        cleanup: bool,
    },

    /// Extract yearly values at fixed coordinates
    #[command(long_about = "
Extract yearly values of the point variables and the land area at every
coordinate of a table with Latitude, Longitude and source columns.

Results are cached per model run in the intermediate directory. A run that
fails is cached as a failure marker; pass --retry-failed to compute it again.

EXAMPLES:
  cmipflux points --index archive.csv --coordinates sites.csv -d work -o points.csv
  cmipflux points --config cmipflux.yaml --retry-failed
")]
    Points {
        #[command(flatten)]
        run: RunArgs,

        /// Coordinate table
        #[arg(long, env = "CMIPFLUX_COORDINATES")]
        coordinates: Option<PathBuf>,

        /// Variables to extract (comma separated)
        #[arg(long = "variables", value_delimiter = ',', env = "CMIPFLUX_POINT_VARIABLES")]
        point_variables: Vec<String>,

        /// Recompute runs cached as failures
        #[arg(long, env = "CMIPFLUX_RETRY_FAILED")]
        retry_failed: bool,
    },

    /// Run report steps on a result table
    #[command(long_about = "
Apply report steps to a result table written by 'global' or 'points'.

Steps come from the 'report' section of the configuration, or from --step
arguments which replace it:
  carbon_units:MODEL1,MODEL2    CO2 to carbon for the listed models
  annual_total                  rates to PgC per year
  coordinate_labels:COLUMN      45.25N_120.5W labels to coordinates
  consistency_filter:VAR1,VAR2  keep models reporting every variable
  percentage:VARIABLE:REFERENCE variable as a percentage of reference
  drop_failures                 remove failure marker rows

EXAMPLES:
  cmipflux report global.csv report.csv --step annual_total
  cmipflux report points.csv report.csv --config cmipflux.yaml --extracts-dir extracts
")]
    Report {
        /// Result table to read
        input: PathBuf,

        /// Report table to write
        output: PathBuf,

        /// Report step (can be used multiple times)
        #[arg(long = "step", value_parser = parse_report_step)]
        steps: Vec<ReportStepConfig>,

        /// Write one CSV per variable to this directory
        #[arg(long, env = "CMIPFLUX_EXTRACTS_DIR")]
        extracts_dir: Option<PathBuf>,
    },

    /// Show information about a NetCDF file
    #[command(long_about = "
Inspect a NetCDF file: dimensions, variables, attributes, the CMOR facets of
its name and the dates covered by its time axis.

EXAMPLES:
  cmipflux info gpp_Lmon_CESM2_historical_r1i1p1f1_gn_185001-201412.nc
  cmipflux info sftlf_fx_CESM2_historical_r1i1p1f1_gn.nc --detailed --format json
")]
    Info {
        /// NetCDF file path
        file: PathBuf,

        /// Show global attributes
        #[arg(long)]
        detailed: bool,

        /// Show only specific variable info
        #[arg(short = 'n', long)]
        variable: Option<String>,

        /// Output format for file information
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Validate a configuration file
    #[command(long_about = "
Validate a configuration without processing anything.

Checks the file syntax, the option values, the report steps and, with
--detailed, that every configured input exists.

EXAMPLES:
  cmipflux validate cmipflux.yaml
  cmipflux validate --config cmipflux.json --detailed
")]
    Validate {
        /// Configuration file to validate
        config_file: Option<PathBuf>,

        /// Also check that inputs exist
        #[arg(long)]
        detailed: bool,
    },

    /// Generate configuration templates
    #[command(long_about = "
Generate configuration file templates.

Available templates:
• global: weighted global means from an index
• points: point extraction from a scanned archive
• report: global means followed by report steps

EXAMPLES:
  cmipflux template global
  cmipflux template points --format yaml -o points.yaml
")]
    Template {
        /// Template type to generate
        #[arg(value_enum)]
        template_type: TemplateType,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Configuration format
        #[arg(long, value_enum, default_value_t = ConfigFormat::Json)]
        format: ConfigFormat,
    },

    /// Generate shell completions
    #[command(long_about = "
Generate shell completion scripts for bash, zsh, fish and PowerShell.

EXAMPLES:
  cmipflux completions bash > ~/.bash_completion.d/cmipflux
  cmipflux completions zsh -o _cmipflux
")]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Index { .. } => "index",
            Commands::Global { .. } => "global",
            Commands::Points { .. } => "points",
            Commands::Report { .. } => "report",
            Commands::Info { .. } => "info",
            Commands::Validate { .. } => "validate",
            Commands::Template { .. } => "template",
            Commands::Completions { .. } => "completions",
        }
    }
}

#[derive(ValueEnum, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON structured output
    Json,
    /// YAML structured output
    Yaml,
    /// CSV output (where applicable)
    Csv,
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum TemplateType {
    /// Weighted global means
    Global,
    /// Point extraction
    Points,
    /// Global means with report steps
    Report,
}

impl TemplateType {
    pub fn config(&self) -> PipelineConfig {
        match self {
            TemplateType::Global => PipelineConfig::global_template(),
            TemplateType::Points => PipelineConfig::points_template(),
            TemplateType::Report => PipelineConfig::report_template(),
        }
    }
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON configuration format
    Json,
    /// YAML configuration format
    Yaml,
}

/// Renders a template in the requested format.
pub fn render_template(
    template_type: &TemplateType,
    format: &ConfigFormat,
) -> Result<String, ConfigError> {
    let config = template_type.config();
    match format {
        ConfigFormat::Json => config.to_json(),
        ConfigFormat::Yaml => config.to_yaml(),
    }
}

/// Loads the configuration file if one is given, otherwise the defaults.
/// Command-line and environment values are applied on top by the caller.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    match path {
        Some(path) => PipelineConfig::from_file(path),
        None => Ok(PipelineConfig::default()),
    }
}

/// `--verbose` selects debug, `--quiet` errors only, otherwise info.
pub fn log_level(verbose: bool, quiet: bool) -> LevelFilter {
    if quiet {
        LevelFilter::Error
    } else if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Parse a report step from a command line argument
/// Format: name[:arg[:arg]]
pub fn parse_report_step(s: &str) -> Result<ReportStepConfig, String> {
    let mut parts = s.splitn(2, ':');
    let name = parts.next().unwrap_or("").trim();
    let rest = parts.next().map(str::trim);

    let list = |text: Option<&str>| -> Result<Vec<String>, String> {
        let values: Vec<String> = text
            .unwrap_or("")
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if values.is_empty() {
            Err(format!("Step '{}' needs a comma separated list", name))
        } else {
            Ok(values)
        }
    };

    match name {
        "carbon_units" => Ok(ReportStepConfig::CarbonUnits {
            models: list(rest)?,
        }),
        "annual_total" => Ok(ReportStepConfig::AnnualTotal),
        "drop_failures" => Ok(ReportStepConfig::DropFailures),
        "coordinate_labels" => match rest {
            Some(column) if !column.is_empty() => Ok(ReportStepConfig::CoordinateLabels {
                column: column.to_string(),
            }),
            _ => Err("Coordinate labels must be in format 'coordinate_labels:column'".to_string()),
        },
        "consistency_filter" => Ok(ReportStepConfig::ConsistencyFilter {
            variables: list(rest)?,
        }),
        "percentage" => {
            let (variable, reference) = rest
                .and_then(|r| r.split_once(':'))
                .map(|(v, r)| (v.trim(), r.trim()))
                .filter(|(v, r)| !v.is_empty() && !r.is_empty())
                .ok_or("Percentage must be in format 'percentage:variable:reference'")?;
            Ok(ReportStepConfig::Percentage {
                variable: variable.to_string(),
                reference: reference.to_string(),
            })
        }
        other => Err(format!("Unknown report step '{}'", other)),
    }
}
