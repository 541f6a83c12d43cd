//! # Archive Index
//!
//! An in-memory table describing every file of a CMIP archive. Each row holds
//! the file path together with the CMOR facets parsed from it:
//! `file, type, domain, variable, model, experiment, ensemble, grid, time`.
//!
//! The index is either read from a CSV produced earlier (or by hand), or
//! built by scanning a directory tree for CMOR-named NetCDF files:
//!
//! ```text
//! gpp_Lmon_CESM2_historical_r1i1p1f1_gn_185001-201412.nc
//! sftlf_fx_CESM2_historical_r1i1p1f1_gn.nc
//! ```

use crate::error::{ProcessingError, ProcessingResult};
use crate::output::{read_csv, write_csv};
use log::debug;
use polars::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;
use walkdir::WalkDir;

/// Columns every archive index must carry.
pub const INDEX_COLUMNS: [&str; 9] = [
    "file",
    "type",
    "domain",
    "variable",
    "model",
    "experiment",
    "ensemble",
    "grid",
    "time",
];

/// Columns identifying one model run on one grid.
pub const KEY_COLUMNS: [&str; 4] = ["model", "experiment", "ensemble", "grid"];

/// Land fraction (percent) of each grid cell.
pub const LAND_FRACTION: &str = "sftlf";
/// Surface area of each grid cell.
pub const CELL_AREA: &str = "areacella";

const CMOR_FILENAME: &str = r"^(?P<variable>[^_]+)_(?P<domain>[^_]+)_(?P<model>[^_]+)_(?P<experiment>[^_]+)_(?P<ensemble>[^_]+)_(?P<grid>[^_]+)(?:_(?P<time>[0-9]+-[0-9]+))?\.nc$";

/// One file of the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub file: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub domain: String,
    pub variable: String,
    pub model: String,
    pub experiment: String,
    pub ensemble: String,
    pub grid: String,
    pub time: String,
}

impl ArchiveRecord {
    /// Parses a CMOR file name. Returns `None` for names that do not follow the
    /// `<variable>_<table>_<model>_<experiment>_<ensemble>_<grid>[_<time>].nc` layout.
    pub fn from_cmor_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let caps = cmor_pattern()?.captures(name)?;
        let time = caps
            .name("time")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        Some(ArchiveRecord {
            file: path.to_string_lossy().to_string(),
            kind: if time.is_empty() { "fixed" } else { "timeseries" }.to_string(),
            domain: caps["domain"].to_string(),
            variable: caps["variable"].to_string(),
            model: caps["model"].to_string(),
            experiment: caps["experiment"].to_string(),
            ensemble: caps["ensemble"].to_string(),
            grid: caps["grid"].to_string(),
            time,
        })
    }
}

fn cmor_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(CMOR_FILENAME).ok()).as_ref()
}

/// Table of archive files backed by a polars `DataFrame`.
#[derive(Debug, Clone)]
pub struct ArchiveIndex {
    frame: DataFrame,
}

impl ArchiveIndex {
    /// Wraps a frame after checking the required columns. All index columns
    /// are normalised to strings and nulls become empty strings, so fixed
    /// fields without a time range compare like any other value.
    pub fn new(frame: DataFrame) -> ProcessingResult<Self> {
        require_columns(&frame, &INDEX_COLUMNS)?;
        let normalised: Vec<Expr> = INDEX_COLUMNS
            .iter()
            .map(|name| {
                col(*name)
                    .cast(DataType::String)
                    .fill_null(lit(""))
                    .alias(*name)
            })
            .collect();
        let frame = frame.lazy().with_columns(normalised).collect()?;
        Ok(ArchiveIndex { frame })
    }

    pub fn from_records(records: &[ArchiveRecord]) -> ProcessingResult<Self> {
        let pick = |f: fn(&ArchiveRecord) -> &String| -> Vec<String> {
            records.iter().map(|r| f(r).clone()).collect()
        };

        let columns: Vec<Column> = vec![
            Series::new("file".into(), pick(|r| &r.file)).into(),
            Series::new("type".into(), pick(|r| &r.kind)).into(),
            Series::new("domain".into(), pick(|r| &r.domain)).into(),
            Series::new("variable".into(), pick(|r| &r.variable)).into(),
            Series::new("model".into(), pick(|r| &r.model)).into(),
            Series::new("experiment".into(), pick(|r| &r.experiment)).into(),
            Series::new("ensemble".into(), pick(|r| &r.ensemble)).into(),
            Series::new("grid".into(), pick(|r| &r.grid)).into(),
            Series::new("time".into(), pick(|r| &r.time)).into(),
        ];

        ArchiveIndex::new(DataFrame::new(columns)?)
    }

    /// Reads an index CSV. Every column is read as text.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> ProcessingResult<Self> {
        debug!("Reading archive index from {}", path.as_ref().display());
        let frame = read_csv(path.as_ref(), None)?;
        ArchiveIndex::new(frame)
    }

    /// Walks `dir` recursively and indexes every CMOR-named `.nc` file.
    pub fn scan<P: AsRef<Path>>(dir: P) -> ProcessingResult<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ProcessingError::MissingInput(format!(
                "archive directory {} does not exist",
                dir.display()
            )));
        }

        let mut records = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            match ArchiveRecord::from_cmor_path(entry.path()) {
                Some(record) => records.push(record),
                None => debug!("Skipping non-CMOR file {}", entry.path().display()),
            }
        }

        debug!("Indexed {} files under {}", records.len(), dir.display());
        ArchiveIndex::from_records(&records)
    }

    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> ProcessingResult<()> {
        let mut frame = self.frame.clone();
        write_csv(&mut frame, path.as_ref())
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Distinct variable names present in the index.
    pub fn variables(&self) -> ProcessingResult<BTreeSet<String>> {
        Ok(string_column(&self.frame, "variable")?.into_iter().collect())
    }

    pub fn records(&self) -> ProcessingResult<Vec<ArchiveRecord>> {
        let file = string_column(&self.frame, "file")?;
        let kind = string_column(&self.frame, "type")?;
        let domain = string_column(&self.frame, "domain")?;
        let variable = string_column(&self.frame, "variable")?;
        let model = string_column(&self.frame, "model")?;
        let experiment = string_column(&self.frame, "experiment")?;
        let ensemble = string_column(&self.frame, "ensemble")?;
        let grid = string_column(&self.frame, "grid")?;
        let time = string_column(&self.frame, "time")?;

        Ok((0..self.frame.height())
            .map(|i| ArchiveRecord {
                file: file[i].clone(),
                kind: kind[i].clone(),
                domain: domain[i].clone(),
                variable: variable[i].clone(),
                model: model[i].clone(),
                experiment: experiment[i].clone(),
                ensemble: ensemble[i].clone(),
                grid: grid[i].clone(),
                time: time[i].clone(),
            })
            .collect())
    }
}

/// Fails with [`ProcessingError::MissingColumns`] naming every absent column.
pub fn require_columns(frame: &DataFrame, columns: &[&str]) -> ProcessingResult<()> {
    let present: Vec<&str> = frame
        .get_column_names()
        .iter()
        .map(|name| name.as_str())
        .collect();
    let missing: Vec<String> = columns
        .iter()
        .filter(|name| !present.contains(name))
        .map(|name| name.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ProcessingError::MissingColumns(missing))
    }
}

/// Fails with [`ProcessingError::MissingVariables`] unless every name occurs
/// in the frame's `variable` column.
pub fn require_variables<S: AsRef<str>>(frame: &DataFrame, variables: &[S]) -> ProcessingResult<()> {
    let present: BTreeSet<String> = string_column(frame, "variable")?.into_iter().collect();
    let missing: Vec<String> = variables
        .iter()
        .map(|v| v.as_ref())
        .filter(|v| !present.contains(*v))
        .map(|v| v.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ProcessingError::MissingVariables(missing))
    }
}

/// Reads a text column into owned strings, mapping nulls to `""`.
pub fn string_column(frame: &DataFrame, name: &str) -> ProcessingResult<Vec<String>> {
    let values = frame
        .column(name)?
        .str()?
        .into_iter()
        .map(|value| value.unwrap_or("").to_string())
        .collect();
    Ok(values)
}

/// `col(...)` expressions for [`KEY_COLUMNS`].
pub fn key_exprs() -> Vec<Expr> {
    KEY_COLUMNS.iter().map(|name| col(*name)).collect()
}
