//! # NetCDF File Information Module
//!
//! Inspection of a single archive file: dimensions, variables, attributes and
//! the calendar dates covered by its time axis.

use crate::index::ArchiveRecord;
use crate::time::decode_time;
use anyhow::{Context, Result};
use log::debug;
use netcdf::AttributeValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Information about a NetCDF dimension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetCdfDimensionInfo {
    pub name: String,
    pub length: usize,
    pub is_unlimited: bool,
}

/// Information about a NetCDF variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetCdfVariableInfo {
    pub name: String,
    pub data_type: String,
    pub dimensions: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub shape: Vec<usize>,
}

/// First and last calendar date of the time axis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeCoverage {
    pub start: String,
    pub end: String,
    pub steps: usize,
    pub calendar: String,
}

/// Complete information about a NetCDF file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetCdfInfo {
    pub path: String,
    /// CMOR facets parsed from the file name, when it follows the convention
    pub facets: Option<ArchiveRecord>,
    pub dimensions: Vec<NetCdfDimensionInfo>,
    pub variables: Vec<NetCdfVariableInfo>,
    pub global_attributes: BTreeMap<String, String>,
    pub time_coverage: Option<TimeCoverage>,
    pub file_size: Option<u64>,
    pub total_variables: usize,
    pub total_dimensions: usize,
}

/// Extract information from a NetCDF file
pub fn get_netcdf_info(path: &Path, variable: Option<&str>, detailed: bool) -> Result<NetCdfInfo> {
    debug!("Opening NetCDF file: {}", path.display());
    let file = netcdf::open(path)
        .with_context(|| format!("Failed to open NetCDF file: {}", path.display()))?;

    let file_size = std::fs::metadata(path).ok().map(|metadata| metadata.len());

    let dimensions: Vec<NetCdfDimensionInfo> = file
        .dimensions()
        .map(|dim| NetCdfDimensionInfo {
            name: dim.name().to_string(),
            length: dim.len(),
            is_unlimited: dim.is_unlimited(),
        })
        .collect();

    let mut variables = Vec::new();
    for var in file.variables() {
        if let Some(name) = variable
            && var.name() != name
        {
            continue;
        }

        let mut attributes = BTreeMap::new();
        for attr in var.attributes() {
            if let Ok(value) = attr.value() {
                attributes.insert(attr.name().to_string(), format_attribute_value(&value));
            }
        }

        variables.push(NetCdfVariableInfo {
            name: var.name().to_string(),
            data_type: format!("{:?}", var.vartype()),
            dimensions: var
                .dimensions()
                .iter()
                .map(|d| d.name().to_string())
                .collect(),
            attributes,
            shape: var.dimensions().iter().map(|d| d.len()).collect(),
        });
    }

    let mut global_attributes = BTreeMap::new();
    if detailed {
        for attr in file.attributes() {
            if let Ok(value) = attr.value() {
                global_attributes.insert(attr.name().to_string(), format_attribute_value(&value));
            }
        }
    }

    let time_coverage = file.variable("time").and_then(|time| {
        let offsets: Vec<f64> = time.get_values::<f64, _>(..).ok()?;
        let units = text_attribute(&time, "units")?;
        let calendar = text_attribute(&time, "calendar").unwrap_or_default();
        let dates = match decode_time(&offsets, &units, &calendar) {
            Ok(dates) => dates,
            Err(e) => {
                debug!("Cannot decode time axis of {}: {}", path.display(), e);
                return None;
            }
        };
        Some(TimeCoverage {
            start: dates.first()?.to_string(),
            end: dates.last()?.to_string(),
            steps: dates.len(),
            calendar: if calendar.is_empty() {
                "standard".to_string()
            } else {
                calendar
            },
        })
    });

    Ok(NetCdfInfo {
        path: path.display().to_string(),
        facets: ArchiveRecord::from_cmor_path(path),
        total_dimensions: dimensions.len(),
        total_variables: variables.len(),
        dimensions,
        variables,
        global_attributes,
        time_coverage,
        file_size,
    })
}

fn text_attribute(var: &netcdf::Variable, name: &str) -> Option<String> {
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

/// Format netcdf attribute value for display
fn format_attribute_value(value: &AttributeValue) -> String {
    match value {
        AttributeValue::Str(s) => s.clone(),
        other => format!("{:?}", other),
    }
}

/// Prints a summary for a terminal: CMOR facets and time coverage first, then
/// the dimensions and every variable with its units.
pub fn print_file_info_human(info: &NetCdfInfo) {
    println!("{}", info.path);
    if let Some(facets) = &info.facets {
        println!(
            "  {} / {} from {} {} {} on {} ({})",
            facets.variable,
            facets.domain,
            facets.model,
            facets.experiment,
            facets.ensemble,
            facets.grid,
            facets.kind
        );
    }
    match &info.time_coverage {
        Some(coverage) => println!(
            "  Covers {} .. {}, {} steps ({})",
            coverage.start, coverage.end, coverage.steps, coverage.calendar
        ),
        None => println!("  No decodable time axis"),
    }
    if let Some(size) = info.file_size {
        println!("  {:.1} MiB on disk", size as f64 / 1_048_576.0);
    }

    let dims: Vec<String> = info
        .dimensions
        .iter()
        .map(|d| {
            let unlimited = if d.is_unlimited { "*" } else { "" };
            format!("{}={}{}", d.name, d.length, unlimited)
        })
        .collect();
    println!("  Dimensions ({}): {}", info.total_dimensions, dims.join(" "));

    println!("  Variables ({}):", info.total_variables);
    for var in &info.variables {
        let units = var.attributes.get("units").map(String::as_str).unwrap_or("-");
        println!(
            "    {:<12} {:<10} [{}] {}",
            var.name,
            units,
            var.dimensions.join(", "),
            var.data_type
        );
        for (name, value) in var.attributes.iter().filter(|(name, _)| *name != "units") {
            println!("      {} = {}", name, value);
        }
    }

    if !info.global_attributes.is_empty() {
        println!("  Global attributes:");
        for (name, value) in &info.global_attributes {
            println!("    {} = {}", name, value);
        }
    }
}

pub fn print_file_info_json(info: &NetCdfInfo) -> Result<()> {
    let json = serde_json::to_string_pretty(info).context("Failed to serialize file info to JSON")?;
    println!("{}", json);
    Ok(())
}

pub fn print_file_info_yaml(info: &NetCdfInfo) -> Result<()> {
    let yaml = serde_yaml::to_string(info).context("Failed to serialize file info to YAML")?;
    print!("{}", yaml);
    Ok(())
}

/// One CSV line per variable: name, units, type, dimensions and shape.
pub fn print_file_info_csv(info: &NetCdfInfo) -> Result<()> {
    println!("variable,units,data_type,dimensions,shape");
    for var in &info.variables {
        let shape: Vec<String> = var.shape.iter().map(|s| s.to_string()).collect();
        println!(
            "{},\"{}\",{},{},{}",
            var.name,
            var.attributes.get("units").map(String::as_str).unwrap_or(""),
            var.data_type,
            var.dimensions.join(";"),
            shape.join("x")
        );
    }
    Ok(())
}
