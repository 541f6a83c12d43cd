//! # Point Extractor
//!
//! Yearly values of a set of variables at fixed coordinates.
//!
//! The input is the widened selection (one row per model, experiment,
//! ensemble, grid and time range, with a path column per variable). For each
//! group and each coordinate the grid tool extracts the nearest cell of every
//! variable and of the land area grid, then averages the variable extracts to
//! yearly means. The land area is a single value and is repeated for every
//! year.
//!
//! Group results are memoised in the [`PointCache`]. A group that fails is
//! reduced to one marker row with `problem = true` and the failure cause, is
//! cached as a failure, and does not stop the batch.

use crate::aggregate::progress_bar;
use crate::cache::{
    CacheLayout, CacheStatus, CachedOutcome, PointCache, has_problem_rows, point_basename,
};
use crate::error::{ProcessingError, ProcessingResult};
use crate::grid::GridReader;
use crate::index::{KEY_COLUMNS, require_columns, string_column};
use crate::output::read_csv;
use crate::resolve::widen_variables;
use crate::time::CalendarDate;
use crate::tool::{GridOp, GridTool};
use crate::weights::{MetadataPaths, WeightCache};
use log::{debug, info, warn};
use polars::prelude::*;
use std::path::Path;

/// Variables extracted at points unless configured otherwise.
pub const DEFAULT_POINT_VARIABLES: [&str; 3] = ["gpp", "raRoot", "rhSoil"];

/// Label of the land area series in the output.
pub const AREA_VARIABLE: &str = "area";

/// A site to extract, with the name of the dataset it comes from.
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
    pub source: String,
}

impl Coordinate {
    /// The coordinate rounded to 4 decimals, as passed to the grid tool.
    pub fn rounded(&self) -> (f64, f64) {
        (round4(self.latitude), round4(self.longitude))
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Reads coordinates from a CSV with `Latitude`, `Longitude` and `source`
/// columns.
pub fn read_coordinates(path: &Path) -> ProcessingResult<Vec<Coordinate>> {
    if !path.exists() {
        return Err(ProcessingError::MissingInput(format!(
            "coordinate table {} does not exist",
            path.display()
        )));
    }
    let frame = read_csv(path, None)?;
    require_columns(&frame, &["Latitude", "Longitude", "source"])?;

    let latitude = string_column(&frame, "Latitude")?;
    let longitude = string_column(&frame, "Longitude")?;
    let source = string_column(&frame, "source")?;

    let parse = |text: &str, name: &str, row: usize| -> ProcessingResult<f64> {
        text.trim().parse::<f64>().map_err(|_| {
            ProcessingError::MissingInput(format!(
                "invalid {} '{}' in row {} of {}",
                name,
                text,
                row + 1,
                path.display()
            ))
        })
    };

    (0..frame.height())
        .map(|i| {
            Ok(Coordinate {
                latitude: parse(&latitude[i], "Latitude", i)?,
                longitude: parse(&longitude[i], "Longitude", i)?,
                source: source[i].clone(),
            })
        })
        .collect()
}

/// One row of the widened selection.
#[derive(Debug, Clone, PartialEq)]
pub struct PointGroup {
    pub model: String,
    pub experiment: String,
    pub ensemble: String,
    pub grid: String,
    pub time: String,
    pub sftlf: String,
    pub areacella: String,
    /// `(variable, path)` in extraction order.
    pub files: Vec<(String, String)>,
}

impl PointGroup {
    pub fn basename(&self) -> String {
        point_basename(
            &self.model,
            &self.experiment,
            &self.ensemble,
            &self.grid,
            &self.time,
        )
    }

    /// Reads the groups of a [`widen_variables`] result.
    pub fn from_frame<S: AsRef<str>>(
        frame: &DataFrame,
        variables: &[S],
    ) -> ProcessingResult<Vec<Self>> {
        let mut required: Vec<&str> = KEY_COLUMNS.to_vec();
        required.extend(["time", "sftlf", "areacella"]);
        required.extend(variables.iter().map(|v| v.as_ref()));
        require_columns(frame, &required)?;

        let model = string_column(frame, "model")?;
        let experiment = string_column(frame, "experiment")?;
        let ensemble = string_column(frame, "ensemble")?;
        let grid = string_column(frame, "grid")?;
        let time = string_column(frame, "time")?;
        let sftlf = string_column(frame, "sftlf")?;
        let areacella = string_column(frame, "areacella")?;
        let paths = variables
            .iter()
            .map(|v| string_column(frame, v.as_ref()))
            .collect::<ProcessingResult<Vec<_>>>()?;

        Ok((0..frame.height())
            .map(|i| PointGroup {
                model: model[i].clone(),
                experiment: experiment[i].clone(),
                ensemble: ensemble[i].clone(),
                grid: grid[i].clone(),
                time: time[i].clone(),
                sftlf: sftlf[i].clone(),
                areacella: areacella[i].clone(),
                files: variables
                    .iter()
                    .zip(&paths)
                    .map(|(v, p)| (v.as_ref().to_string(), p[i].clone()))
                    .collect(),
            })
            .collect())
    }
}

/// One value of one variable at one site and year, or a failure marker.
///
/// Marker rows carry only the group keys, `problem = true` and `cause`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointExtractionRecord {
    pub value: Option<f64>,
    pub units: Option<String>,
    pub variable: Option<String>,
    pub datetime: Option<String>,
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub source: Option<String>,
    pub model: String,
    pub experiment: String,
    pub ensemble: String,
    pub grid: String,
    pub time: String,
    pub problem: bool,
    pub cause: Option<String>,
}

impl PointExtractionRecord {
    /// The marker standing in for a group that failed.
    pub fn failure(group: &PointGroup, error: &ProcessingError) -> Self {
        PointExtractionRecord {
            model: group.model.clone(),
            experiment: group.experiment.clone(),
            ensemble: group.ensemble.clone(),
            grid: group.grid.clone(),
            time: group.time.clone(),
            problem: true,
            cause: Some(error.cause()),
            ..Default::default()
        }
    }
}

/// Column layout of point tables, used to parse cached entries.
pub fn point_schema() -> Schema {
    let mut schema = Schema::with_capacity(16);
    let columns = [
        ("value", DataType::Float64),
        ("units", DataType::String),
        ("variable", DataType::String),
        ("datetime", DataType::String),
        ("year", DataType::Int32),
        ("month", DataType::Int32),
        ("Longitude", DataType::Float64),
        ("Latitude", DataType::Float64),
        ("source", DataType::String),
        ("model", DataType::String),
        ("experiment", DataType::String),
        ("ensemble", DataType::String),
        ("grid", DataType::String),
        ("time", DataType::String),
        ("problem", DataType::Boolean),
        ("cause", DataType::String),
    ];
    for (name, dtype) in columns {
        schema.with_column(name.into(), dtype);
    }
    schema
}

/// Builds a point table from records, with the [`point_schema`] layout.
pub fn records_to_frame(records: &[PointExtractionRecord]) -> ProcessingResult<DataFrame> {
    let text = |f: fn(&PointExtractionRecord) -> &String| -> Vec<String> {
        records.iter().map(|r| f(r).clone()).collect()
    };
    let optional = |f: fn(&PointExtractionRecord) -> &Option<String>| -> Vec<Option<String>> {
        records.iter().map(|r| f(r).clone()).collect()
    };

    let columns: Vec<Column> = vec![
        Series::new(
            "value".into(),
            records.iter().map(|r| r.value).collect::<Vec<Option<f64>>>(),
        )
        .into(),
        Series::new("units".into(), optional(|r| &r.units)).into(),
        Series::new("variable".into(), optional(|r| &r.variable)).into(),
        Series::new("datetime".into(), optional(|r| &r.datetime)).into(),
        Series::new(
            "year".into(),
            records.iter().map(|r| r.year).collect::<Vec<Option<i32>>>(),
        )
        .into(),
        Series::new(
            "month".into(),
            records.iter().map(|r| r.month).collect::<Vec<Option<i32>>>(),
        )
        .into(),
        Series::new(
            "Longitude".into(),
            records.iter().map(|r| r.longitude).collect::<Vec<Option<f64>>>(),
        )
        .into(),
        Series::new(
            "Latitude".into(),
            records.iter().map(|r| r.latitude).collect::<Vec<Option<f64>>>(),
        )
        .into(),
        Series::new("source".into(), optional(|r| &r.source)).into(),
        Series::new("model".into(), text(|r| &r.model)).into(),
        Series::new("experiment".into(), text(|r| &r.experiment)).into(),
        Series::new("ensemble".into(), text(|r| &r.ensemble)).into(),
        Series::new("grid".into(), text(|r| &r.grid)).into(),
        Series::new("time".into(), text(|r| &r.time)).into(),
        Series::new(
            "problem".into(),
            records.iter().map(|r| r.problem).collect::<Vec<bool>>(),
        )
        .into(),
        Series::new("cause".into(), optional(|r| &r.cause)).into(),
    ];

    Ok(DataFrame::new(columns)?)
}

/// Options of the [`PointExtractor`].
#[derive(Debug, Clone)]
pub struct PointOptions {
    /// Recompute groups whose cached entry is a failure.
    pub retry_failed: bool,
    /// Reuse existing land area grids instead of regenerating them.
    pub reuse_weights: bool,
    pub show_progress: bool,
}

impl Default for PointOptions {
    fn default() -> Self {
        PointOptions {
            retry_failed: false,
            reuse_weights: true,
            show_progress: false,
        }
    }
}

/// Runs point extraction group by group through the cache.
pub struct PointExtractor<'a> {
    tool: &'a dyn GridTool,
    reader: &'a dyn GridReader,
    cache: PointCache,
    weights: WeightCache,
    options: PointOptions,
}

impl<'a> PointExtractor<'a> {
    pub fn new(
        tool: &'a dyn GridTool,
        reader: &'a dyn GridReader,
        layout: CacheLayout,
        options: PointOptions,
    ) -> Self {
        PointExtractor {
            tool,
            reader,
            cache: PointCache::new(layout.clone(), point_schema()),
            weights: WeightCache::new(layout, options.reuse_weights),
            options,
        }
    }

    /// Extracts every group and concatenates the results in group order.
    ///
    /// Only cache write failures abort the batch; a failing group yields its
    /// marker row.
    pub fn extract(
        &self,
        groups: &[PointGroup],
        coordinates: &[Coordinate],
    ) -> ProcessingResult<DataFrame> {
        let progress = progress_bar(groups.len(), self.options.show_progress);
        let mut combined = records_to_frame(&[])?;
        let mut failed = 0usize;

        for group in groups {
            progress.set_message(group.basename());
            let frame = self.extract_cached(group, coordinates)?;
            if has_problem_rows(&frame)? {
                failed += 1;
            }
            combined.vstack_mut(&frame)?;
            progress.inc(1);
        }
        progress.finish_and_clear();

        if failed > 0 {
            warn!("{} of {} point groups failed", failed, groups.len());
        }
        info!(
            "Extracted {} rows from {} groups at {} coordinates",
            combined.height(),
            groups.len(),
            coordinates.len()
        );
        Ok(combined)
    }

    /// The result of one group, from the cache when possible.
    pub fn extract_cached(
        &self,
        group: &PointGroup,
        coordinates: &[Coordinate],
    ) -> ProcessingResult<DataFrame> {
        let basename = group.basename();

        let cached = self.cache.load(&basename).unwrap_or_else(|e| {
            warn!("Ignoring cache entry {}: {}", basename, e);
            None
        });
        match cached {
            Some(CachedOutcome::Success(frame)) => {
                debug!("Using cached extraction {}", basename);
                return Ok(frame);
            }
            Some(CachedOutcome::Failure { frame, cause }) if !self.options.retry_failed => {
                warn!(
                    "Reusing cached failure for {}: {}",
                    basename,
                    cause.as_deref().unwrap_or("unknown cause")
                );
                return Ok(frame);
            }
            Some(CachedOutcome::Failure { .. }) => {
                info!("Retrying previously failed group {}", basename);
            }
            None => {}
        }

        match self.extract_group(group, coordinates) {
            Ok(mut frame) => {
                self.cache
                    .store(&basename, &mut frame, CacheStatus::Success, None)?;
                Ok(frame)
            }
            Err(e) => {
                warn!("Point extraction failed for {}: {}", basename, e);
                let marker = PointExtractionRecord::failure(group, &e);
                let mut frame = records_to_frame(&[marker])?;
                self.cache
                    .store(&basename, &mut frame, CacheStatus::Failure, Some(e.cause()))?;
                Ok(frame)
            }
        }
    }

    /// Extracts one group at every coordinate, bypassing the cache.
    pub fn extract_group(
        &self,
        group: &PointGroup,
        coordinates: &[Coordinate],
    ) -> ProcessingResult<DataFrame> {
        let basename = group.basename();
        let meta = MetadataPaths::unique(
            [(group.sftlf.as_str(), group.areacella.as_str())],
            &basename,
        )?;
        let land_area = self.weights.ensure(self.tool, &meta, &basename)?;

        let mut records = Vec::new();
        for coordinate in coordinates {
            for mut record in self.extract_coordinate(group, &basename, &land_area, coordinate)? {
                record.model = group.model.clone();
                record.experiment = group.experiment.clone();
                record.ensemble = group.ensemble.clone();
                record.grid = group.grid.clone();
                record.time = group.time.clone();
                records.push(record);
            }
        }
        debug!("Extracted {} values for {}", records.len(), basename);
        records_to_frame(&records)
    }

    fn extract_coordinate(
        &self,
        group: &PointGroup,
        basename: &str,
        land_area: &Path,
        coordinate: &Coordinate,
    ) -> ProcessingResult<Vec<PointExtractionRecord>> {
        let (lat, lon) = coordinate.rounded();
        let layout = self.cache.layout();
        let remap = GridOp::RemapNn { lat, lon };

        let mut series: Vec<(String, Vec<f64>, Option<String>, Vec<CalendarDate>)> = Vec::new();
        for (variable, file) in &group.files {
            let extract = layout.point_extract(basename, variable, lat, lon);
            let yearly = layout.yearly_extract(basename, variable, lat, lon);
            self.tool.run(&remap, &[Path::new(file)], &extract)?;
            self.tool
                .run(&GridOp::YearMonMean, &[extract.as_path()], &yearly)?;

            let field = self.reader.read_field(&yearly, variable)?;
            let values = single_cell(&field.values, &yearly)?;
            let dates = field.calendar_dates()?;
            series.push((variable.clone(), values, non_empty(&field.units), dates));
        }

        let area_extract = layout.point_extract(basename, AREA_VARIABLE, lat, lon);
        self.tool.run(&remap, &[land_area], &area_extract)?;
        let area_grid = self.reader.read_weights(&area_extract)?;
        let area = area_grid
            .values
            .iter()
            .copied()
            .find(|v| v.is_finite())
            .ok_or_else(|| ProcessingError::InvalidGrid {
                path: area_extract.clone(),
                reason: "no land area at this coordinate".to_string(),
            })?;

        // The first variable's yearly file defines the time table
        let Some((_, _, _, dates)) = series.first() else {
            return Err(ProcessingError::MissingVariables(Vec::new()));
        };
        let dates = dates.clone();

        let mut records = Vec::new();
        for (variable, values, units, _) in &series {
            if values.len() != dates.len() {
                return Err(ProcessingError::InvalidGrid {
                    path: layout.yearly_extract(basename, variable, lat, lon),
                    reason: format!(
                        "{} yearly values against {} time steps",
                        values.len(),
                        dates.len()
                    ),
                });
            }
            for (value, date) in values.iter().zip(&dates) {
                records.push(point_record(coordinate, variable, *value, units, date));
            }
        }
        for date in &dates {
            records.push(point_record(
                coordinate,
                AREA_VARIABLE,
                area,
                &non_empty(&area_grid.units),
                date,
            ));
        }
        Ok(records)
    }
}

/// Extracts the widened selection at `coordinates`.
///
/// Requires the grid tool and the intermediate directory to exist.
pub fn extract_points<S: AsRef<str>>(
    selected: &DataFrame,
    variables: &[S],
    coordinates: &[Coordinate],
    tool: &dyn GridTool,
    reader: &dyn GridReader,
    layout: &CacheLayout,
    options: PointOptions,
) -> ProcessingResult<DataFrame> {
    tool.check_available()?;
    if !layout.root().is_dir() {
        return Err(ProcessingError::MissingInput(format!(
            "intermediate directory {} does not exist",
            layout.root().display()
        )));
    }

    let widened = widen_variables(selected, variables)?;
    let groups = PointGroup::from_frame(&widened, variables)?;
    info!(
        "Extracting {} groups at {} coordinates",
        groups.len(),
        coordinates.len()
    );

    PointExtractor::new(tool, reader, layout.clone(), options).extract(&groups, coordinates)
}

fn point_record(
    coordinate: &Coordinate,
    variable: &str,
    value: f64,
    units: &Option<String>,
    date: &CalendarDate,
) -> PointExtractionRecord {
    PointExtractionRecord {
        value: value.is_finite().then_some(value),
        units: units.clone(),
        variable: Some(variable.to_string()),
        datetime: Some(date.to_string()),
        year: Some(date.year),
        month: Some(date.month as i32),
        longitude: Some(coordinate.longitude),
        latitude: Some(coordinate.latitude),
        source: Some(coordinate.source.clone()),
        ..Default::default()
    }
}

/// The value of every time step of a field reduced to one cell.
fn single_cell(values: &ndarray::Array3<f64>, path: &Path) -> ProcessingResult<Vec<f64>> {
    let shape = values.shape();
    if shape[1] != 1 || shape[2] != 1 {
        return Err(ProcessingError::InvalidGrid {
            path: path.to_path_buf(),
            reason: format!("expected a single cell, got {}x{}", shape[1], shape[2]),
        });
    }
    Ok(values.iter().copied().collect())
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}
