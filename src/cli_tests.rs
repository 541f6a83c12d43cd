//! # CLI Integration Tests
//!
//! Argument parsing tests for every subcommand, including the report step
//! DSL and the merge of command-line values into a configuration.

#[cfg(test)]
mod tests {
    use clap::Parser;
    use std::path::PathBuf;

    use crate::cli::{Cli, Commands, ConfigFormat, OutputFormat, RunArgs, TemplateType};
    use crate::input::PipelineConfig;
    use crate::report::ReportStepConfig;

    /// Test basic CLI argument parsing
    #[test]
    fn test_cli_help() {
        let result = Cli::try_parse_from(["cmipflux", "--help"]);
        assert!(result.is_err()); // --help causes early exit with "error"

        let error = result.unwrap_err();
        assert!(error.to_string().contains("carbon fluxes"));
    }

    /// Test version argument
    #[test]
    fn test_cli_version() {
        let result = Cli::try_parse_from(["cmipflux", "--version"]);
        assert!(result.is_err()); // --version causes early exit
    }

    /// Test global flags
    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "cmipflux",
            "--verbose",
            "--output-format",
            "json",
            "--config",
            "/path/to/config.yaml",
            "template",
            "global",
        ]);

        assert!(cli.verbose);
        assert!(!cli.quiet);
        assert_eq!(cli.output_format, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.yaml")));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        let result = Cli::try_parse_from(["cmipflux", "-v", "-q", "template", "global"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_index_command() {
        let cli = Cli::parse_from(["cmipflux", "index", "/data/CMIP6", "archive.csv"]);

        if let Commands::Index {
            archive_dir,
            output,
        } = &cli.command
        {
            assert_eq!(archive_dir, &PathBuf::from("/data/CMIP6"));
            assert_eq!(output, &PathBuf::from("archive.csv"));
        } else {
            panic!("Expected Index command");
        }
        assert_eq!(cli.command.name(), "index");
    }

    #[test]
    fn test_index_command_requires_both_paths() {
        assert!(Cli::try_parse_from(["cmipflux", "index", "/data/CMIP6"]).is_err());
    }

    #[test]
    fn test_global_command() {
        let cli = Cli::parse_from([
            "cmipflux",
            "global",
            "--index",
            "archive.csv",
            "-d",
            "work",
            "-o",
            "global.parquet",
            "--variables",
            "gpp,npp",
            "--experiment",
            "ssp585",
            "--cleanup",
            "--no-reuse-weights",
        ]);

        if let Commands::Global {
            run,
            variables,
            cleanup,
        } = &cli.command
        {
            assert_eq!(run.index, Some(PathBuf::from("archive.csv")));
            assert_eq!(run.intermediate_dir, Some(PathBuf::from("work")));
            assert_eq!(run.output, Some(PathBuf::from("global.parquet")));
            assert_eq!(run.experiment.as_deref(), Some("ssp585"));
            assert!(run.no_reuse_weights);
            assert!(!run.dry_run);
            assert_eq!(variables, &vec!["gpp".to_string(), "npp".to_string()]);
            assert!(*cleanup);
        } else {
            panic!("Expected Global command");
        }
    }

    #[test]
    fn test_global_index_conflicts_with_archive_dir() {
        let result = Cli::try_parse_from([
            "cmipflux",
            "global",
            "--index",
            "archive.csv",
            "--archive-dir",
            "/data",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_points_command() {
        let cli = Cli::parse_from([
            "cmipflux",
            "points",
            "--archive-dir",
            "/data/CMIP6",
            "--coordinates",
            "sites.csv",
            "--variables",
            "gpp,raRoot",
            "--retry-failed",
            "--dry-run",
        ]);

        if let Commands::Points {
            run,
            coordinates,
            point_variables,
            retry_failed,
        } = &cli.command
        {
            assert_eq!(run.archive_dir, Some(PathBuf::from("/data/CMIP6")));
            assert!(run.dry_run);
            assert_eq!(coordinates, &Some(PathBuf::from("sites.csv")));
            assert_eq!(
                point_variables,
                &vec!["gpp".to_string(), "raRoot".to_string()]
            );
            assert!(*retry_failed);
        } else {
            panic!("Expected Points command");
        }
    }

    #[test]
    fn test_report_command_with_steps() {
        let cli = Cli::parse_from([
            "cmipflux",
            "report",
            "points.csv",
            "report.csv",
            "--step",
            "drop_failures",
            "--step",
            "carbon_units:CanESM5",
            "--step",
            "percentage:npp:gpp",
            "--extracts-dir",
            "extracts",
        ]);

        if let Commands::Report {
            input,
            output,
            steps,
            extracts_dir,
        } = &cli.command
        {
            assert_eq!(input, &PathBuf::from("points.csv"));
            assert_eq!(output, &PathBuf::from("report.csv"));
            assert_eq!(
                steps,
                &vec![
                    ReportStepConfig::DropFailures,
                    ReportStepConfig::CarbonUnits {
                        models: vec!["CanESM5".to_string()]
                    },
                    ReportStepConfig::Percentage {
                        variable: "npp".to_string(),
                        reference: "gpp".to_string()
                    },
                ]
            );
            assert_eq!(extracts_dir, &Some(PathBuf::from("extracts")));
        } else {
            panic!("Expected Report command");
        }
    }

    #[test]
    fn test_report_command_rejects_unknown_step() {
        let result = Cli::try_parse_from([
            "cmipflux", "report", "in.csv", "out.csv", "--step", "regrid",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_info_command() {
        let cli = Cli::parse_from([
            "cmipflux",
            "info",
            "gpp.nc",
            "--detailed",
            "-n",
            "gpp",
            "--format",
            "yaml",
        ]);

        if let Commands::Info {
            file,
            detailed,
            variable,
            format,
        } = &cli.command
        {
            assert_eq!(file, &PathBuf::from("gpp.nc"));
            assert!(*detailed);
            assert_eq!(variable, &Some("gpp".to_string()));
            assert_eq!(format, &Some(OutputFormat::Yaml));
        } else {
            panic!("Expected Info command");
        }
    }

    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["cmipflux", "validate", "cmipflux.yaml", "--detailed"]);

        if let Commands::Validate {
            config_file,
            detailed,
        } = &cli.command
        {
            assert_eq!(config_file, &Some(PathBuf::from("cmipflux.yaml")));
            assert!(*detailed);
        } else {
            panic!("Expected Validate command");
        }
    }

    #[test]
    fn test_template_command() {
        let cli = Cli::parse_from([
            "cmipflux", "template", "points", "--format", "yaml", "-o", "points.yaml",
        ]);

        if let Commands::Template {
            template_type,
            output,
            format,
        } = &cli.command
        {
            assert_eq!(template_type, &TemplateType::Points);
            assert_eq!(output, &Some(PathBuf::from("points.yaml")));
            assert_eq!(format, &ConfigFormat::Yaml);
        } else {
            panic!("Expected Template command");
        }

        let cli = Cli::parse_from(["cmipflux", "template", "report"]);
        if let Commands::Template { format, .. } = &cli.command {
            assert_eq!(format, &ConfigFormat::Json);
        } else {
            panic!("Expected Template command");
        }
    }

    #[test]
    fn test_completions_command() {
        let cli = Cli::parse_from(["cmipflux", "completions", "bash"]);
        assert!(matches!(cli.command, Commands::Completions { .. }));
        assert!(Cli::try_parse_from(["cmipflux", "completions", "tcsh"]).is_err());
    }

    #[test]
    fn test_run_args_keep_file_values_when_unset() {
        let mut config = PipelineConfig {
            archive_dir: Some(PathBuf::from("/data")),
            tool: "/opt/cdo/bin/cdo".to_string(),
            reuse_weights: true,
            ..Default::default()
        };
        let before = config.clone();

        RunArgs::default().apply(&mut config);

        assert_eq!(config, before);
    }
}
