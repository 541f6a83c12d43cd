//! # Table Output Module
//!
//! Reading and writing of the delimited-text tables the pipeline uses as its
//! cache and as its final results. Final tables may also be written as Parquet
//! when the output path ends in `.parquet`.

use crate::error::ProcessingResult;
use log::debug;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use tempfile::NamedTempFile;

/// Writes a DataFrame as CSV with a header row.
pub fn write_csv(df: &mut DataFrame, output_path: &Path) -> ProcessingResult<()> {
    debug!("Writing {} rows to {}", df.height(), output_path.display());
    let mut file = File::create(output_path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}

/// Writes a DataFrame as CSV into a temporary sibling, then renames it over
/// `output_path`. Readers never observe a half-written table.
pub fn write_csv_atomic(df: &mut DataFrame, output_path: &Path) -> ProcessingResult<()> {
    let dir = output_path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    CsvWriter::new(temp.as_file_mut())
        .include_header(true)
        .finish(df)?;
    temp.persist(output_path).map_err(|e| e.error)?;
    debug!(
        "Atomically wrote {} rows to {}",
        df.height(),
        output_path.display()
    );
    Ok(())
}

/// Reads a CSV table. With no schema every column is read as text; with a
/// schema the columns are parsed to the given types.
pub fn read_csv(path: &Path, schema: Option<SchemaRef>) -> ProcessingResult<DataFrame> {
    let options = match schema {
        Some(schema) => CsvReadOptions::default()
            .with_has_header(true)
            .with_schema(Some(schema)),
        None => CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0)),
    };

    let df = options
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

/// Writes a result table, choosing the format from the extension.
pub fn write_table(df: &mut DataFrame, output_path: &Path) -> ProcessingResult<()> {
    debug!("DataFrame shape: {:?}", df.shape());
    debug!("DataFrame schema:\n{:?}", df.schema());

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let is_parquet = output_path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"));

    if is_parquet {
        let file = File::create(output_path)?;
        ParquetWriter::new(file).finish(df)?;
        debug!("Wrote parquet file: {}", output_path.display());
        Ok(())
    } else {
        write_csv(df, output_path)
    }
}

/// Reads a result table written by [`write_table`], inferring column types.
pub fn read_table(path: &Path) -> ProcessingResult<DataFrame> {
    let is_parquet = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"));

    let df = if is_parquet {
        ParquetReader::new(File::open(path)?).finish()?
    } else {
        CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(10_000))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?
    };
    debug!("Read {:?} table from {}", df.shape(), path.display());
    Ok(df)
}
