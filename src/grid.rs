//! # Grid Reading
//!
//! Reads gridded model output and derived weight grids from NetCDF files.
//!
//! - [`GridField`]: a `(time, y, x)` array with its units and time axis
//! - [`WeightGrid`]: a `(y, x)` array of cell weights, typically m²
//! - [`GridReader`]: the seam the aggregators read through
//! - [`NetCdfReader`]: the `netcdf` crate implementation

use crate::error::{ProcessingError, ProcessingResult};
use crate::time::{CalendarDate, decode_time};
use log::debug;
use ndarray::{Array2, Array3};
use netcdf::AttributeValue;
use std::path::Path;

const COORDINATE_NAMES: [&str; 6] = ["lat", "lon", "latitude", "longitude", "nav_lat", "nav_lon"];

/// A gridded variable over time, values in `(time, y, x)` order. Missing
/// values are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct GridField {
    pub variable: String,
    pub values: Array3<f64>,
    pub units: String,
    pub time: Vec<f64>,
    pub time_units: String,
    pub calendar: String,
}

impl GridField {
    /// `(y, x)` extent of one time slice.
    pub fn spatial_shape(&self) -> (usize, usize) {
        let shape = self.values.shape();
        (shape[1], shape[2])
    }

    pub fn time_steps(&self) -> usize {
        self.values.shape()[0]
    }

    /// Calendar date of every time step.
    pub fn calendar_dates(&self) -> ProcessingResult<Vec<CalendarDate>> {
        decode_time(&self.time, &self.time_units, &self.calendar)
    }
}

/// Per-cell weights in `(y, x)` order. Missing cells are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightGrid {
    pub values: Array2<f64>,
    pub units: String,
}

impl WeightGrid {
    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Sum of all finite cells, ignoring spatial structure.
    pub fn total_area(&self) -> f64 {
        self.values.iter().filter(|v| v.is_finite()).sum()
    }
}

/// Source of gridded arrays.
pub trait GridReader {
    /// Reads `variable` from `path` as a `(time, y, x)` field.
    fn read_field(&self, path: &Path, variable: &str) -> ProcessingResult<GridField>;

    /// Reads the single two-dimensional data variable of `path`.
    fn read_weights(&self, path: &Path) -> ProcessingResult<WeightGrid>;
}

/// Reads NetCDF files with the `netcdf` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetCdfReader;

impl GridReader for NetCdfReader {
    fn read_field(&self, path: &Path, variable: &str) -> ProcessingResult<GridField> {
        debug!("Reading '{}' from {}", variable, path.display());
        let file = netcdf::open(path)?;
        let var = file
            .variable(variable)
            .ok_or_else(|| ProcessingError::VariableNotFound {
                path: path.to_path_buf(),
                variable: variable.to_string(),
            })?;

        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        if shape.len() != 3 {
            return Err(ProcessingError::InvalidGrid {
                path: path.to_path_buf(),
                reason: format!(
                    "'{}' has {} dimensions, expected (time, y, x)",
                    variable,
                    shape.len()
                ),
            });
        }

        let raw: Vec<f64> = var.get_values::<f64, _>(..)?;
        let values = Array3::from_shape_vec((shape[0], shape[1], shape[2]), mask_missing(&var, raw))
            .map_err(|e| ProcessingError::InvalidGrid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let units = string_attribute(&var, "units").unwrap_or_default();

        let time_name = var
            .dimensions()
            .first()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|| "time".to_string());
        let time_var = file
            .variable(&time_name)
            .ok_or_else(|| ProcessingError::VariableNotFound {
                path: path.to_path_buf(),
                variable: time_name.clone(),
            })?;
        let time: Vec<f64> = time_var.get_values::<f64, _>(..)?;
        let time_units = string_attribute(&time_var, "units").unwrap_or_default();
        let calendar = string_attribute(&time_var, "calendar").unwrap_or_default();

        Ok(GridField {
            variable: variable.to_string(),
            values,
            units,
            time,
            time_units,
            calendar,
        })
    }

    fn read_weights(&self, path: &Path) -> ProcessingResult<WeightGrid> {
        debug!("Reading weight grid from {}", path.display());
        let file = netcdf::open(path)?;

        // Coordinate variables share their dimension's name; bounds have a
        // trailing "bnds"/"bounds" dimension; curvilinear grids carry 2-D lat/lon
        let var = file
            .variables()
            .find(|v| {
                let dims = v.dimensions();
                dims.len() == 2
                    && !COORDINATE_NAMES.contains(&v.name().as_str())
                    && dims.iter().all(|d| d.name() != v.name())
                    && !dims.iter().any(|d| d.name().contains("bnds") || d.name().contains("bounds"))
            })
            .ok_or_else(|| ProcessingError::InvalidGrid {
                path: path.to_path_buf(),
                reason: "no two-dimensional data variable".to_string(),
            })?;

        let (ny, nx) = (var.dimensions()[0].len(), var.dimensions()[1].len());
        let raw: Vec<f64> = var.get_values::<f64, _>(..)?;
        let values = Array2::from_shape_vec((ny, nx), mask_missing(&var, raw)).map_err(|e| {
            ProcessingError::InvalidGrid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        Ok(WeightGrid {
            values,
            units: string_attribute(&var, "units").unwrap_or_default(),
        })
    }
}

/// Replaces `_FillValue`/`missing_value` and non-finite entries by NaN.
fn mask_missing(var: &netcdf::Variable, mut values: Vec<f64>) -> Vec<f64> {
    let sentinels: Vec<f64> = ["_FillValue", "missing_value"]
        .iter()
        .filter_map(|name| numeric_attribute(var, name))
        .collect();

    for value in values.iter_mut() {
        if !value.is_finite() || sentinels.contains(value) {
            *value = f64::NAN;
        }
    }
    values
}

fn string_attribute(var: &netcdf::Variable, name: &str) -> Option<String> {
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Str(s) => Some(s),
        AttributeValue::Strs(list) => list.into_iter().next(),
        _ => None,
    }
}

fn numeric_attribute(var: &netcdf::Variable, name: &str) -> Option<f64> {
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(f64::from(v)),
        AttributeValue::Int(v) => Some(f64::from(v)),
        AttributeValue::Short(v) => Some(f64::from(v)),
        AttributeValue::Longlong(v) => Some(v as f64),
        AttributeValue::Doubles(list) => list.first().copied(),
        AttributeValue::Floats(list) => list.first().map(|v| f64::from(*v)),
        _ => None,
    }
}
