//! # Intermediate File Cache
//!
//! Everything the pipeline derives is written under one intermediate
//! directory with names built from the identifying keys:
//!
//! ```text
//! {basename}_PercentLand.nc          sftlf / 100
//! {basename}_LandArea.nc             areacella * sftlf / 100
//! {basename}{time}Mean.csv           weighted means of one data file
//! {basename}-LatLon.csv              point extraction of one group
//! {basename}-LatLon.json             manifest of that extraction
//! {basename}_{var}_{lat}_{lon}.nc    nearest-neighbour extract
//! {basename}_{var}_{lat}_{lon}_yr.nc yearly mean of the extract
//! ```
//!
//! Point extractions are memoised through [`PointCache`]. Each entry carries a
//! manifest recording whether the stored table is a success or a failure
//! marker, and a version tag; entries written under another version are
//! treated as absent.

use crate::error::{ProcessingError, ProcessingResult};
use crate::output::{read_csv, write_csv_atomic};
use log::{debug, warn};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Version tag of the cache layout. Bump when the stored schema changes.
pub const CACHE_VERSION: u32 = 1;

/// Deterministic file names under the intermediate directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        CacheLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn percent_land(&self, basename: &str) -> PathBuf {
        self.root.join(format!("{}_PercentLand.nc", basename))
    }

    pub fn land_area(&self, basename: &str) -> PathBuf {
        self.root.join(format!("{}_LandArea.nc", basename))
    }

    pub fn mean_table(&self, basename: &str, time: &str) -> PathBuf {
        self.root.join(format!("{}{}Mean.csv", basename, time))
    }

    pub fn point_table(&self, basename: &str) -> PathBuf {
        self.root.join(format!("{}-LatLon.csv", basename))
    }

    pub fn point_manifest(&self, basename: &str) -> PathBuf {
        self.root.join(format!("{}-LatLon.json", basename))
    }

    pub fn point_extract(&self, basename: &str, variable: &str, lat: f64, lon: f64) -> PathBuf {
        self.root
            .join(format!("{}_{}_{}_{}.nc", basename, variable, lat, lon))
    }

    pub fn yearly_extract(&self, basename: &str, variable: &str, lat: f64, lon: f64) -> PathBuf {
        self.root
            .join(format!("{}_{}_{}_{}_yr.nc", basename, variable, lat, lon))
    }
}

/// Basename of a weighted-mean output:
/// `{model}_{variable}_{domain}_{experiment}_{ensemble}_{grid}`.
pub fn global_basename(
    model: &str,
    variable: &str,
    domain: &str,
    experiment: &str,
    ensemble: &str,
    grid: &str,
) -> String {
    [model, variable, domain, experiment, ensemble, grid].join("_")
}

/// Basename of a point extraction group:
/// `{model}_{experiment}_{ensemble}_{grid}_{time}`.
pub fn point_basename(model: &str, experiment: &str, ensemble: &str, grid: &str, time: &str) -> String {
    [model, experiment, ensemble, grid, time].join("_")
}

/// Outcome recorded for a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Success,
    Failure,
}

/// Sidecar describing a stored table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheManifest {
    pub version: u32,
    pub status: CacheStatus,
    #[serde(default)]
    pub cause: Option<String>,
    pub rows: usize,
}

/// A table loaded from the cache, tagged with how it was produced.
#[derive(Debug, Clone)]
pub enum CachedOutcome {
    Success(DataFrame),
    Failure {
        frame: DataFrame,
        cause: Option<String>,
    },
}

impl CachedOutcome {
    pub fn frame(&self) -> &DataFrame {
        match self {
            CachedOutcome::Success(frame) => frame,
            CachedOutcome::Failure { frame, .. } => frame,
        }
    }

    pub fn into_frame(self) -> DataFrame {
        match self {
            CachedOutcome::Success(frame) => frame,
            CachedOutcome::Failure { frame, .. } => frame,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CachedOutcome::Failure { .. })
    }
}

/// Keyed store of point extraction tables.
#[derive(Debug, Clone)]
pub struct PointCache {
    layout: CacheLayout,
    schema: SchemaRef,
}

impl PointCache {
    /// `schema` is the column layout stored tables are parsed with.
    pub fn new(layout: CacheLayout, schema: Schema) -> Self {
        PointCache {
            layout,
            schema: Arc::new(schema),
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Looks up `basename`.
    ///
    /// Returns `None` when nothing usable is stored: no table, a manifest from
    /// another cache version, or a table that no longer parses with the
    /// current schema. A table without a manifest (written by an older run) is
    /// classified by its `problem` column.
    pub fn load(&self, basename: &str) -> ProcessingResult<Option<CachedOutcome>> {
        let table = self.layout.point_table(basename);
        if !table.exists() {
            return Ok(None);
        }

        let manifest = self.read_manifest(basename)?;
        if let Some(manifest) = &manifest
            && manifest.version != CACHE_VERSION
        {
            debug!(
                "Ignoring cache entry {} written by version {}",
                basename, manifest.version
            );
            return Ok(None);
        }

        let frame = match read_csv(&table, Some(self.schema.clone())) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", table.display(), e);
                return Ok(None);
            }
        };

        if let Some(manifest) = &manifest
            && manifest.rows != frame.height()
        {
            warn!(
                "Ignoring cache entry {}: manifest lists {} rows, table has {}",
                basename,
                manifest.rows,
                frame.height()
            );
            return Ok(None);
        }

        let outcome = match manifest {
            Some(manifest) => match manifest.status {
                CacheStatus::Success => CachedOutcome::Success(frame),
                CacheStatus::Failure => CachedOutcome::Failure {
                    frame,
                    cause: manifest.cause,
                },
            },
            None => {
                if has_problem_rows(&frame)? {
                    CachedOutcome::Failure { frame, cause: None }
                } else {
                    CachedOutcome::Success(frame)
                }
            }
        };
        Ok(Some(outcome))
    }

    /// Stores `frame` under `basename`, table first, then manifest. Both are
    /// renamed into place so a concurrent reader sees either the old entry or
    /// the new one.
    pub fn store(
        &self,
        basename: &str,
        frame: &mut DataFrame,
        status: CacheStatus,
        cause: Option<String>,
    ) -> ProcessingResult<()> {
        write_csv_atomic(frame, &self.layout.point_table(basename))?;

        let manifest = CacheManifest {
            version: CACHE_VERSION,
            status,
            cause,
            rows: frame.height(),
        };
        let path = self.layout.point_manifest(basename);
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(temp.as_file_mut(), &manifest)?;
        temp.as_file_mut().flush()?;
        temp.persist(&path).map_err(|e| e.error)?;

        debug!("Cached {} as {:?}", basename, status);
        Ok(())
    }

    fn read_manifest(&self, basename: &str) -> ProcessingResult<Option<CacheManifest>> {
        let path = self.layout.point_manifest(basename);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let manifest = serde_json::from_str(&content).map_err(|e| {
            ProcessingError::Cache(format!("invalid manifest {}: {}", path.display(), e))
        })?;
        Ok(Some(manifest))
    }
}

/// Whether any row of `frame` is a failure marker.
pub(crate) fn has_problem_rows(frame: &DataFrame) -> ProcessingResult<bool> {
    let Ok(column) = frame.column("problem") else {
        return Ok(false);
    };
    Ok(column.bool()?.into_iter().any(|v| v == Some(true)))
}
