use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use cmipflux::cli::{
    Cli, Commands, ConfigFormat, OutputFormat, RunArgs, TemplateType, load_config, log_level,
    render_template,
};
use cmipflux::grid::NetCdfReader;
use cmipflux::index::ArchiveIndex;
use cmipflux::info::{
    get_netcdf_info, print_file_info_csv, print_file_info_human, print_file_info_json,
    print_file_info_yaml,
};
use cmipflux::input::PipelineConfig;
use cmipflux::log::{
    config_echo, show_farewell_with_timing, show_greeting, show_result_summary,
    show_selection_summary,
};
use cmipflux::report::{ReportConfig, ReportPipeline};
use cmipflux::tool::{Cdo, GridTool};
use cmipflux::{load_index, run_global, run_points, run_report, select_rows};
use std::fs;
use std::path::Path;
use std::time::Instant;

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level(cli.verbose, cli.quiet).as_str()),
    )
    .init();

    let start_time = Instant::now();
    let banners = !cli.quiet && cli.output_format == OutputFormat::Human;
    let announce = matches!(
        cli.command,
        Commands::Index { .. }
            | Commands::Global { .. }
            | Commands::Points { .. }
            | Commands::Report { .. }
    );
    if banners && announce {
        show_greeting(cli.command.name(), cli.config.as_deref());
    }

    match &cli.command {
        Commands::Index {
            archive_dir,
            output,
        } => handle_index(archive_dir, output, banners)?,
        Commands::Global {
            run,
            variables,
            cleanup,
        } => {
            let mut config = merged_config(cli.config.as_deref(), run)?;
            if !variables.is_empty() {
                config.variables = variables.clone();
            }
            if *cleanup {
                config.cleanup = true;
            }
            handle_global(&config, run.dry_run, &cli)?
        }
        Commands::Points {
            run,
            coordinates,
            point_variables,
            retry_failed,
        } => {
            let mut config = merged_config(cli.config.as_deref(), run)?;
            if let Some(path) = coordinates {
                config.coordinates = Some(path.clone());
            }
            if !point_variables.is_empty() {
                config.point_variables = point_variables.clone();
            }
            if *retry_failed {
                config.retry_failed = true;
            }
            handle_points(&config, run.dry_run, &cli)?
        }
        Commands::Report {
            input,
            output,
            steps,
            extracts_dir,
        } => {
            let mut report = match cli.config.as_deref() {
                Some(path) => load_config(Some(path))
                    .with_context(|| format!("Failed to load {}", path.display()))?
                    .report
                    .unwrap_or_default(),
                None => ReportConfig::default(),
            };
            if !steps.is_empty() {
                report.steps = steps.clone();
            }
            if extracts_dir.is_some() {
                report.extracts_dir = extracts_dir.clone();
            }
            handle_report(&report, input, output, banners)?
        }
        Commands::Info {
            file,
            detailed,
            variable,
            format,
        } => {
            let format = format.as_ref().unwrap_or(&cli.output_format);
            handle_info(file, *detailed, variable.as_deref(), format)?
        }
        Commands::Validate {
            config_file,
            detailed,
        } => {
            let path = config_file
                .as_deref()
                .or(cli.config.as_deref())
                .context("No configuration file given")?;
            handle_validate(path, *detailed, &cli.output_format)?
        }
        Commands::Template {
            template_type,
            output,
            format,
        } => handle_template(template_type, output.as_deref(), format)?,
        Commands::Completions { shell, output } => {
            let mut cmd = Cli::command();
            match output {
                Some(path) => {
                    let mut file = fs::File::create(path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    clap_complete::generate(*shell, &mut cmd, "cmipflux", &mut file);
                }
                None => {
                    clap_complete::generate(*shell, &mut cmd, "cmipflux", &mut std::io::stdout())
                }
            }
        }
    }

    if banners && announce {
        show_farewell_with_timing(start_time.elapsed());
    }
    Ok(())
}

/// Config file, then environment and command line on top.
fn merged_config(path: Option<&Path>, run: &RunArgs) -> Result<PipelineConfig> {
    let mut config = load_config(path).with_context(|| match path {
        Some(path) => format!("Failed to load configuration {}", path.display()),
        None => "Failed to build default configuration".to_string(),
    })?;
    run.apply(&mut config);
    Ok(config)
}

fn prepare(config: &PipelineConfig, banners: bool) -> Result<Cdo> {
    config.validate().context("Invalid configuration")?;
    if banners {
        config_echo(config);
    }
    let missing = config.missing_inputs();
    if !missing.is_empty() {
        bail!("Missing inputs: {}", missing.join(", "));
    }
    let tool = Cdo::new(&config.tool);
    tool.check_available()
        .with_context(|| format!("Grid tool '{}' is not usable", config.tool))?;
    Ok(tool)
}

fn dry_run_summary(config: &PipelineConfig, variables: &[String], banners: bool) -> Result<()> {
    let index = load_index(config).context("Failed to load archive index")?;
    let selected = select_rows(&index, variables, &config.experiment)
        .context("Failed to select data files")?;
    if banners {
        let groups = selected
            .column("sftlf")
            .map(|c| c.n_unique().unwrap_or(0))
            .unwrap_or(0);
        show_selection_summary(selected.height(), groups);
    }
    log::info!("Dry run: {} data files would be processed", selected.height());
    Ok(())
}

fn handle_index(archive_dir: &Path, output: &Path, banners: bool) -> Result<()> {
    let index = ArchiveIndex::scan(archive_dir)
        .with_context(|| format!("Failed to scan {}", archive_dir.display()))?;
    index
        .to_csv(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    if banners {
        show_result_summary(index.len(), output);
    }
    Ok(())
}

fn handle_global(config: &PipelineConfig, dry_run: bool, cli: &Cli) -> Result<()> {
    let banners = !cli.quiet && cli.output_format == OutputFormat::Human;
    let tool = prepare(config, banners)?;
    if dry_run {
        return dry_run_summary(config, &config.variables, banners);
    }
    let means = run_global(config, &tool, &NetCdfReader, !cli.quiet)
        .context("Global aggregation failed")?;
    if banners {
        show_result_summary(means.height(), &config.output);
    }
    Ok(())
}

fn handle_points(config: &PipelineConfig, dry_run: bool, cli: &Cli) -> Result<()> {
    let banners = !cli.quiet && cli.output_format == OutputFormat::Human;
    let tool = prepare(config, banners)?;
    if config.coordinates.is_none() {
        bail!("Point extraction needs a coordinate table (--coordinates)");
    }
    if dry_run {
        return dry_run_summary(config, &config.point_variables, banners);
    }
    let points = run_points(config, &tool, &NetCdfReader, !cli.quiet)
        .context("Point extraction failed")?;
    if banners {
        show_result_summary(points.height(), &config.output);
    }
    Ok(())
}

fn handle_report(report: &ReportConfig, input: &Path, output: &Path, banners: bool) -> Result<()> {
    if report.steps.is_empty() {
        bail!("No report steps given (use --step or a 'report' section in the configuration)");
    }
    let result = run_report(report, input, output)
        .with_context(|| format!("Report on {} failed", input.display()))?;
    if banners {
        show_result_summary(result.height(), output);
    }
    Ok(())
}

fn handle_info(
    file: &Path,
    detailed: bool,
    variable: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    let info = get_netcdf_info(file, variable, detailed)?;
    match format {
        OutputFormat::Human => print_file_info_human(&info),
        OutputFormat::Json => print_file_info_json(&info)?,
        OutputFormat::Yaml => print_file_info_yaml(&info)?,
        OutputFormat::Csv => print_file_info_csv(&info)?,
    }
    Ok(())
}

fn handle_validate(path: &Path, detailed: bool, format: &OutputFormat) -> Result<()> {
    let config = PipelineConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration {}", path.display()))?;
    config.validate().context("Invalid configuration")?;
    let missing = if detailed {
        config.missing_inputs()
    } else {
        Vec::new()
    };
    let steps = match &config.report {
        Some(report) => ReportPipeline::from_config(report)?.len(),
        None => 0,
    };

    match format {
        OutputFormat::Json => {
            let summary = serde_json::json!({
                "valid": missing.is_empty(),
                "config": config,
                "report_steps": steps,
                "missing_inputs": missing,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Yaml => {
            println!("{}", config.to_yaml()?);
        }
        _ => {
            println!("Configuration {} is valid", path.display());
            if steps > 0 {
                println!("  Report steps: {}", steps);
            }
            for item in &missing {
                println!("  Missing: {}", item);
            }
        }
    }

    if !missing.is_empty() {
        bail!("{} configured inputs are missing", missing.len());
    }
    Ok(())
}

fn handle_template(
    template_type: &TemplateType,
    output: Option<&Path>,
    format: &ConfigFormat,
) -> Result<()> {
    let content = render_template(template_type, format)?;
    match output {
        Some(path) => {
            fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            log::info!("Template written to {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}
