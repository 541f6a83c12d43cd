//! # Metadata Resolution and Data Selection
//!
//! Joins every data file of the archive with the fixed fields needed to weight
//! it: the land fraction (`sftlf`) and the cell area (`areacella`) of the same
//! model, experiment, ensemble member and grid.
//!
//! - [`resolve_metadata`] spreads the two fixed fields into one row per key
//! - [`select_data`] filters data files and inner-joins them with that table
//! - [`widen_variables`] turns selected files into one row per group with a
//!   path column per variable, the shape the point extractor consumes

use crate::error::{ProcessingError, ProcessingResult};
use crate::index::{
    ArchiveIndex, CELL_AREA, INDEX_COLUMNS, KEY_COLUMNS, LAND_FRACTION, key_exprs,
    require_columns, require_variables, string_column,
};
use log::debug;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Default experiment the data selector keeps.
pub const DEFAULT_EXPERIMENT: &str = "historical";

/// Columns of the metadata table produced by [`resolve_metadata`].
pub const META_COLUMNS: [&str; 6] = [
    "model",
    "experiment",
    "ensemble",
    "grid",
    LAND_FRACTION,
    CELL_AREA,
];

/// One data file joined with its land fraction and cell area files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDataRecord {
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
    pub sftlf: String,
    pub areacella: String,
}

impl ResolvedDataRecord {
    /// Reads the rows of a [`select_data`] result.
    pub fn from_frame(frame: &DataFrame) -> ProcessingResult<Vec<Self>> {
        let mut required: Vec<&str> = INDEX_COLUMNS.to_vec();
        required.extend([LAND_FRACTION, CELL_AREA]);
        require_columns(frame, &required)?;

        let file = string_column(frame, "file")?;
        let kind = string_column(frame, "type")?;
        let domain = string_column(frame, "domain")?;
        let variable = string_column(frame, "variable")?;
        let model = string_column(frame, "model")?;
        let experiment = string_column(frame, "experiment")?;
        let ensemble = string_column(frame, "ensemble")?;
        let grid = string_column(frame, "grid")?;
        let time = string_column(frame, "time")?;
        let sftlf = string_column(frame, LAND_FRACTION)?;
        let areacella = string_column(frame, CELL_AREA)?;

        Ok((0..frame.height())
            .map(|i| ResolvedDataRecord {
                file: file[i].clone(),
                kind: kind[i].clone(),
                domain: domain[i].clone(),
                variable: variable[i].clone(),
                model: model[i].clone(),
                experiment: experiment[i].clone(),
                ensemble: ensemble[i].clone(),
                grid: grid[i].clone(),
                time: time[i].clone(),
                sftlf: sftlf[i].clone(),
                areacella: areacella[i].clone(),
            })
            .collect())
    }

    /// `model/experiment/ensemble/grid`, used in log and error messages.
    pub fn key_label(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.model, self.experiment, self.ensemble, self.grid
        )
    }
}

/// Builds the metadata table: one row per (model, experiment, ensemble, grid)
/// with the path of its `sftlf` and `areacella` files.
///
/// Keys lacking either file are dropped, so the result never holds a missing
/// value. A key with several files for the same role cannot be spread into a
/// single row and fails with [`ProcessingError::AmbiguousMetadata`].
pub fn resolve_metadata(index: &ArchiveIndex) -> ProcessingResult<DataFrame> {
    let frame = index.frame();
    require_columns(frame, &INDEX_COLUMNS)?;
    require_variables(frame, &[LAND_FRACTION, CELL_AREA])?;

    let land_fraction = role_paths(frame, LAND_FRACTION, &key_exprs())?;
    let cell_area = role_paths(frame, CELL_AREA, &key_exprs())?;

    let keys = key_exprs();
    let meta = land_fraction
        .lazy()
        .join(
            cell_area.lazy(),
            keys.clone(),
            keys.clone(),
            JoinArgs::new(JoinType::Inner),
        )
        .sort_by_exprs(keys, SortMultipleOptions::default())
        .collect()?;

    debug!("Resolved metadata for {} keys", meta.height());
    Ok(meta)
}

/// Keeps the data files of interest and attaches their metadata.
///
/// Rows whose variable is in `variables` and whose experiment equals
/// `experiment` are inner-joined with `meta` on the key columns. Data files
/// without a metadata match are dropped without error.
pub fn select_data<S: AsRef<str>>(
    index: &ArchiveIndex,
    meta: &DataFrame,
    variables: &[S],
    experiment: &str,
) -> ProcessingResult<DataFrame> {
    let frame = index.frame();
    require_columns(frame, &INDEX_COLUMNS)?;
    require_columns(meta, &META_COLUMNS)?;
    require_variables(frame, variables)?;

    let wanted = variables
        .iter()
        .map(|v| col("variable").eq(lit(v.as_ref())))
        .reduce(|acc, expr| acc.or(expr))
        .ok_or_else(|| ProcessingError::MissingVariables(Vec::new()))?;

    let candidates = frame
        .clone()
        .lazy()
        .filter(wanted.and(col("experiment").eq(lit(experiment))))
        .collect()?;

    let keys = key_exprs();
    let mut order = keys.clone();
    order.extend([col("variable"), col("time")]);

    let selected = candidates
        .clone()
        .lazy()
        .join(
            meta.clone().lazy(),
            keys.clone(),
            keys,
            JoinArgs::new(JoinType::Inner),
        )
        .sort_by_exprs(order, SortMultipleOptions::default())
        .collect()?;

    let dropped = candidates.height().saturating_sub(selected.height());
    if dropped > 0 {
        debug!("{} data files have no matching metadata and were dropped", dropped);
    }
    Ok(selected)
}

/// Spreads selected data files into one row per (model, experiment,
/// ensemble, grid, time) group with a path column per variable. Groups that
/// lack any of `variables` are dropped.
pub fn widen_variables<S: AsRef<str>>(
    selected: &DataFrame,
    variables: &[S],
) -> ProcessingResult<DataFrame> {
    let mut required: Vec<&str> = INDEX_COLUMNS.to_vec();
    required.extend([LAND_FRACTION, CELL_AREA]);
    require_columns(selected, &required)?;

    let mut group: Vec<Expr> = key_exprs();
    group.extend([col("time"), col(LAND_FRACTION), col(CELL_AREA)]);

    let mut widened: Option<LazyFrame> = None;
    for variable in variables {
        let paths = role_paths(selected, variable.as_ref(), &group)?.lazy();
        widened = Some(match widened {
            None => paths,
            Some(acc) => acc.join(
                paths,
                group.clone(),
                group.clone(),
                JoinArgs::new(JoinType::Inner),
            ),
        });
    }

    let widened = widened.ok_or_else(|| ProcessingError::MissingVariables(Vec::new()))?;
    let frame = widened
        .sort_by_exprs(group, SortMultipleOptions::default())
        .collect()?;
    debug!("Widened selection into {} groups", frame.height());
    Ok(frame)
}

/// Rows of `frame` whose variable is `role`, reduced to the `group` columns
/// plus the file path renamed to `role`. Empty paths are discarded and a
/// group with more than one path fails.
fn role_paths(frame: &DataFrame, role: &str, group: &[Expr]) -> ProcessingResult<DataFrame> {
    let mut columns: Vec<Expr> = group.to_vec();
    columns.push(col("file").alias(role));

    let paths = frame
        .clone()
        .lazy()
        .filter(
            col("variable")
                .eq(lit(role))
                .and(col("file").neq(lit(""))),
        )
        .select(columns)
        .collect()?;

    let duplicated = paths
        .clone()
        .lazy()
        .group_by(group.to_vec())
        .agg([col(role).count().alias("n")])
        .filter(col("n").gt(lit(1)))
        .collect()?;

    if duplicated.height() > 0 {
        let label = KEY_COLUMNS
            .iter()
            .map(|name| string_column(&duplicated, name).map(|v| v[0].clone()))
            .collect::<ProcessingResult<Vec<String>>>()?
            .join("/");
        let count = duplicated
            .column("n")?
            .cast(&DataType::UInt64)?
            .u64()?
            .get(0)
            .unwrap_or(0) as usize;
        return Err(ProcessingError::AmbiguousMetadata {
            key: label,
            role: role.to_string(),
            count,
        });
    }

    Ok(paths)
}
