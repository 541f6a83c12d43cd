//! # Weighted Aggregator
//!
//! Land-area-weighted spatial means of every selected data file, one value per
//! time slice.
//!
//! For each row of the selection the aggregator makes sure the land area grid
//! of its group exists, reads it together with the data field, computes
//!
//! ```text
//! mean(t) = Σ w·v(t) / Σ w
//! ```
//!
//! over the cells where both the value and the weight are finite, and writes
//! the result to `{basename}{time}Mean.csv` in the intermediate directory. The
//! per-file tables are concatenated into the returned frame.

use crate::cache::{CacheLayout, global_basename};
use crate::error::{ProcessingError, ProcessingResult};
use crate::grid::{GridField, GridReader, WeightGrid};
use crate::output::write_csv_atomic;
use crate::resolve::ResolvedDataRecord;
use crate::tool::GridTool;
use crate::weights::{MetadataPaths, WeightCache};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use ndarray::{ArrayView2, Axis, Zip};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Columns of the weighted mean table, in output order.
pub const MEAN_COLUMNS: [&str; 13] = [
    "datetime",
    "year",
    "month",
    "value",
    "units",
    "area",
    "area_units",
    "model",
    "variable",
    "domain",
    "experiment",
    "ensemble",
    "grid",
];

/// Weighted mean of one time slice of one data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedMeanRecord {
    pub datetime: String,
    pub year: i32,
    pub month: i32,
    pub value: f64,
    pub units: String,
    /// Total land area of the grid, the same for every slice of a file.
    pub area: f64,
    pub area_units: String,
    pub model: String,
    pub variable: String,
    pub domain: String,
    pub experiment: String,
    pub ensemble: String,
    pub grid: String,
}

/// Options of [`aggregate_global`].
#[derive(Debug, Clone)]
pub struct AggregateOptions {
    /// Delete the per-file mean tables once they are concatenated.
    pub cleanup: bool,
    /// Reuse existing land area grids instead of regenerating them.
    pub reuse_weights: bool,
    pub show_progress: bool,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        AggregateOptions {
            cleanup: false,
            reuse_weights: true,
            show_progress: false,
        }
    }
}

/// `Σ w·v / Σ w` over the cells where both `values` and `weights` are finite.
///
/// A cell with zero weight contributes nothing. Returns NaN when no weight is
/// left, so an all-missing slice stays distinguishable from a zero mean.
pub fn weighted_mean(values: ArrayView2<f64>, weights: ArrayView2<f64>) -> f64 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    Zip::from(&values).and(&weights).for_each(|&v, &w| {
        if v.is_finite() && w.is_finite() {
            weighted += w * v;
            total += w;
        }
    });

    if total == 0.0 { f64::NAN } else { weighted / total }
}

/// Computes the weighted mean of every time slice of `field`.
///
/// # Arguments
///
/// * `record` - The selected data file, for the identifying columns
/// * `field` - The data field, `(time, y, x)`
/// * `weights` - The land area grid, `(y, x)`
/// * `total_area` - Value stored in the `area` column of every row
///
/// # Errors
///
/// [`ProcessingError::DimensionMismatch`] when the spatial extents of the
/// field and the weights differ, or a time decoding error.
pub fn weighted_means(
    record: &ResolvedDataRecord,
    field: &GridField,
    weights: &WeightGrid,
    total_area: f64,
) -> ProcessingResult<Vec<WeightedMeanRecord>> {
    if field.spatial_shape() != weights.shape() {
        return Err(ProcessingError::DimensionMismatch {
            data: field.spatial_shape(),
            weights: weights.shape(),
        });
    }

    let dates = field.calendar_dates()?;
    if dates.len() != field.time_steps() {
        return Err(ProcessingError::InvalidGrid {
            path: PathBuf::from(&record.file),
            reason: format!(
                "{} time values for {} time steps",
                dates.len(),
                field.time_steps()
            ),
        });
    }

    let records = field
        .values
        .axis_iter(Axis(0))
        .zip(dates)
        .map(|(slice, date)| WeightedMeanRecord {
            datetime: date.to_string(),
            year: date.year,
            month: date.month as i32,
            value: weighted_mean(slice, weights.values.view()),
            units: field.units.clone(),
            area: total_area,
            area_units: weights.units.clone(),
            model: record.model.clone(),
            variable: record.variable.clone(),
            domain: record.domain.clone(),
            experiment: record.experiment.clone(),
            ensemble: record.ensemble.clone(),
            grid: record.grid.clone(),
        })
        .collect();

    Ok(records)
}

/// Builds the weighted mean table from records.
pub fn records_to_frame(records: &[WeightedMeanRecord]) -> ProcessingResult<DataFrame> {
    let text = |f: fn(&WeightedMeanRecord) -> &String| -> Vec<String> {
        records.iter().map(|r| f(r).clone()).collect()
    };

    let columns: Vec<Column> = vec![
        Series::new("datetime".into(), text(|r| &r.datetime)).into(),
        Series::new(
            "year".into(),
            records.iter().map(|r| r.year).collect::<Vec<i32>>(),
        )
        .into(),
        Series::new(
            "month".into(),
            records.iter().map(|r| r.month).collect::<Vec<i32>>(),
        )
        .into(),
        Series::new(
            "value".into(),
            records.iter().map(|r| r.value).collect::<Vec<f64>>(),
        )
        .into(),
        Series::new("units".into(), text(|r| &r.units)).into(),
        Series::new(
            "area".into(),
            records.iter().map(|r| r.area).collect::<Vec<f64>>(),
        )
        .into(),
        Series::new("area_units".into(), text(|r| &r.area_units)).into(),
        Series::new("model".into(), text(|r| &r.model)).into(),
        Series::new("variable".into(), text(|r| &r.variable)).into(),
        Series::new("domain".into(), text(|r| &r.domain)).into(),
        Series::new("experiment".into(), text(|r| &r.experiment)).into(),
        Series::new("ensemble".into(), text(|r| &r.ensemble)).into(),
        Series::new("grid".into(), text(|r| &r.grid)).into(),
    ];

    Ok(DataFrame::new(columns)?)
}

/// Runs the weighted aggregation over every selected row, in order.
///
/// Any failure aborts the whole batch. Per-file tables written before the
/// failure stay in the intermediate directory.
pub fn aggregate_global(
    rows: &[ResolvedDataRecord],
    tool: &dyn GridTool,
    reader: &dyn GridReader,
    layout: &CacheLayout,
    options: &AggregateOptions,
) -> ProcessingResult<DataFrame> {
    let weights = WeightCache::new(layout.clone(), options.reuse_weights);
    let progress = progress_bar(rows.len(), options.show_progress);

    let mut combined: Option<DataFrame> = None;
    let mut written: Vec<PathBuf> = Vec::with_capacity(rows.len());

    for row in rows {
        progress.set_message(format!("{} {}", row.key_label(), row.variable));
        let basename = global_basename(
            &row.model,
            &row.variable,
            &row.domain,
            &row.experiment,
            &row.ensemble,
            &row.grid,
        );

        let meta = MetadataPaths::unique(
            [(row.sftlf.as_str(), row.areacella.as_str())],
            &row.key_label(),
        )?;
        let land_area = weights.ensure(tool, &meta, &basename)?;
        let grid = reader.read_weights(&land_area)?;
        let total_area = grid.total_area();

        let field = reader.read_field(Path::new(&row.file), &row.variable)?;
        let records = weighted_means(row, &field, &grid, total_area)?;
        let mut frame = records_to_frame(&records)?;

        let table = layout.mean_table(&basename, &row.time);
        write_csv_atomic(&mut frame, &table)?;
        debug!("Wrote {} weighted means to {}", frame.height(), table.display());
        written.push(table);

        combined = Some(match combined {
            None => frame,
            Some(mut acc) => {
                acc.vstack_mut(&frame)?;
                acc
            }
        });
        progress.inc(1);
    }
    progress.finish_and_clear();

    if options.cleanup {
        for table in &written {
            fs::remove_file(table)?;
        }
        debug!("Removed {} intermediate mean tables", written.len());
    }

    let combined = match combined {
        Some(frame) => frame,
        None => records_to_frame(&[])?,
    };
    info!(
        "Aggregated {} files into {} rows",
        rows.len(),
        combined.height()
    );
    Ok(combined)
}

/// A progress bar over `len` items, hidden unless `visible`.
pub(crate) fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar
}
