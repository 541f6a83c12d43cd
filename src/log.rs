use crate::input::PipelineConfig;
use std::path::Path;
use std::time::Duration;

pub fn show_greeting(command: &str, config_path: Option<&Path>) {
    println!("=== cmipflux: land-area-weighted carbon fluxes ===");
    println!("Command: {}", command);
    if let Some(path) = config_path {
        println!("Loading configuration from: {}", path.display());
    }
}

pub fn config_echo(config: &PipelineConfig) {
    println!("\nConfiguration:");
    if let Some(index) = &config.index {
        println!("  Archive index: {}", index.display());
    }
    if let Some(dir) = &config.archive_dir {
        println!("  Archive directory: {}", dir.display());
    }
    println!("  Intermediate directory: {}", config.intermediate_dir.display());
    println!("  Output: {}", config.output.display());
    println!("  Grid tool: {}", config.tool);
    println!("  Experiment: {}", config.experiment);
    println!("  Variables: {}", config.variables.join(", "));
    if let Some(coordinates) = &config.coordinates {
        println!("  Coordinates: {}", coordinates.display());
        println!("  Point variables: {}", config.point_variables.join(", "));
    }
    println!(
        "  Reuse weights: {}, retry failed: {}, cleanup: {}",
        config.reuse_weights, config.retry_failed, config.cleanup
    );
    if let Some(report) = &config.report {
        println!("  Report steps: {}", report.steps.len());
    }
}

pub fn show_selection_summary(files: usize, metadata_keys: usize) {
    println!("\nSelection:");
    println!("  Metadata groups: {}", metadata_keys);
    println!("  Data files: {}", files);
}

pub fn show_result_summary(rows: usize, output: &Path) {
    println!("\nWrote {} rows to {}", rows, output.display());
}

pub fn show_farewell_with_timing(elapsed: Duration) {
    println!(
        "\n=== Completed successfully in {:.2}s ===",
        elapsed.as_secs_f64()
    );
}
