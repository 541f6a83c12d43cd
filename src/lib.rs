//! # cmipflux
//!
//! Land-area-weighted carbon flux statistics (GPP, NPP, heterotrophic
//! respiration) from CMIP model archives.
//!
//! ## Pipeline
//!
//! 1. [`index`]: a table of every archive file and its CMOR facets
//! 2. [`resolve`]: land fraction and cell area files per model run, joined
//!    onto the selected data files
//! 3. [`weights`]: land area grids, `areacella * sftlf / 100`
//! 4. [`aggregate`] or [`points`]: weighted global means per month, or yearly
//!    values at fixed sites
//! 5. [`report`]: unit conversions and cross-model filtering
//!
//! Grid arithmetic and remapping are delegated to an external tool (CDO)
//! through the [`tool::GridTool`] trait; arrays are read with
//! [`grid::NetCdfReader`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cmipflux::{input::PipelineConfig, run_global};
//! use cmipflux::grid::NetCdfReader;
//! use cmipflux::tool::Cdo;
//!
//! let config = PipelineConfig::from_file("cmipflux.yaml")?;
//! let means = run_global(&config, &Cdo::new(&config.tool), &NetCdfReader, false)?;
//! println!("{} monthly means", means.height());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod aggregate;
pub mod cache;
pub mod cli;
pub mod error;
pub mod grid;
pub mod index;
pub mod info;
pub mod input;
pub mod log;
pub mod output;
pub mod points;
pub mod report;
pub mod resolve;
pub mod time;
pub mod tool;
pub mod weights;

#[cfg(test)]
mod cli_tests;

use crate::aggregate::{AggregateOptions, aggregate_global};
use crate::cache::CacheLayout;
use crate::error::{ProcessingError, ProcessingResult};
use crate::grid::GridReader;
use crate::index::ArchiveIndex;
use crate::input::PipelineConfig;
use crate::output::{read_table, write_table};
use crate::points::{PointOptions, extract_points, read_coordinates};
use crate::report::{ReportConfig, ReportPipeline, ReportResult, write_extracts};
use crate::resolve::{ResolvedDataRecord, resolve_metadata, select_data};
use crate::tool::GridTool;
use ::log::info;
use polars::prelude::DataFrame;
use std::fs;
use std::path::Path;

/// Loads the archive index named by the configuration, reading the index CSV
/// or scanning the archive directory.
pub fn load_index(config: &PipelineConfig) -> ProcessingResult<ArchiveIndex> {
    match (&config.index, &config.archive_dir) {
        (Some(index), _) => {
            if !index.is_file() {
                return Err(ProcessingError::MissingInput(format!(
                    "archive index {} does not exist",
                    index.display()
                )));
            }
            ArchiveIndex::from_csv(index)
        }
        (None, Some(dir)) => ArchiveIndex::scan(dir),
        (None, None) => Err(ProcessingError::MissingInput(
            "no archive index or archive directory configured".to_string(),
        )),
    }
}

/// Resolves metadata and selects the data files of `variables`.
pub fn select_rows(
    index: &ArchiveIndex,
    variables: &[String],
    experiment: &str,
) -> ProcessingResult<DataFrame> {
    let meta = resolve_metadata(index)?;
    let selected = select_data(index, &meta, variables, experiment)?;
    info!(
        "Selected {} data files over {} metadata groups",
        selected.height(),
        meta.height()
    );
    Ok(selected)
}

/// Runs the weighted aggregator and writes the combined table to
/// `config.output`.
///
/// # Errors
///
/// Any failure of any row aborts the run, see [`aggregate_global`].
pub fn run_global(
    config: &PipelineConfig,
    tool: &dyn GridTool,
    reader: &dyn GridReader,
    show_progress: bool,
) -> ProcessingResult<DataFrame> {
    let index = load_index(config)?;
    let selected = select_rows(&index, &config.variables, &config.experiment)?;
    let rows = ResolvedDataRecord::from_frame(&selected)?;

    fs::create_dir_all(&config.intermediate_dir)?;
    let layout = CacheLayout::new(&config.intermediate_dir);
    let options = AggregateOptions {
        cleanup: config.cleanup,
        reuse_weights: config.reuse_weights,
        show_progress,
    };

    let mut means = aggregate_global(&rows, tool, reader, &layout, &options)?;
    write_table(&mut means, &config.output)?;
    Ok(means)
}

/// Runs the point extractor over `config.coordinates` and writes the
/// combined table to `config.output`.
///
/// The intermediate directory and the output's parent directory must
/// already exist. Groups that fail are
/// reported as marker rows rather than errors.
pub fn run_points(
    config: &PipelineConfig,
    tool: &dyn GridTool,
    reader: &dyn GridReader,
    show_progress: bool,
) -> ProcessingResult<DataFrame> {
    let coordinates_path = config.coordinates.as_ref().ok_or_else(|| {
        ProcessingError::MissingInput("no coordinate table configured".to_string())
    })?;
    let coordinates = read_coordinates(coordinates_path)?;
    let output_dir = config
        .output
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty());
    if let Some(parent) = output_dir.filter(|parent| !parent.is_dir()) {
        return Err(ProcessingError::MissingInput(format!(
            "output directory {} does not exist",
            parent.display()
        )));
    }

    let index = load_index(config)?;
    let selected = select_rows(&index, &config.point_variables, &config.experiment)?;

    let layout = CacheLayout::new(&config.intermediate_dir);
    let options = PointOptions {
        retry_failed: config.retry_failed,
        reuse_weights: config.reuse_weights,
        show_progress,
    };

    let mut points = extract_points(
        &selected,
        &config.point_variables,
        &coordinates,
        tool,
        reader,
        &layout,
        options,
    )?;
    write_table(&mut points, &config.output)?;
    Ok(points)
}

/// Applies the report steps to a result table and writes the outcome, plus
/// one CSV per variable when `report.extracts_dir` is set.
pub fn run_report(report: &ReportConfig, input: &Path, output: &Path) -> ReportResult<DataFrame> {
    let table = read_table(input)?;
    let pipeline = ReportPipeline::from_config(report)?;
    info!(
        "Running report '{}' with {} steps on {} rows",
        pipeline.name(),
        pipeline.len(),
        table.height()
    );

    let mut result = pipeline.execute(table)?;
    write_table(&mut result, output)?;
    if let Some(dir) = &report.extracts_dir {
        write_extracts(&result, dir)?;
    }
    Ok(result)
}
