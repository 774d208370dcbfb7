//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for Meridian using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// Meridian - clinical record import/export bridge
#[derive(Parser, Debug)]
#[command(name = "meridian")]
#[command(version, about, long_about = None)]
#[command(author = "Meridian Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "meridian.toml", env = "MERIDIAN_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "MERIDIAN_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import a C-CDA document, HL7 v2 message or generation A bundle
    Import(commands::import::ImportArgs),

    /// Resolve the patient of an import waiting for a decision
    Resolve(commands::resolve::ResolveArgs),

    /// Export stored resources for a patient or an organization
    Export(commands::export::ExportArgs),

    /// Convert a bundle file between schema generations
    Transform(commands::transform::TransformArgs),

    /// Show an import or export job
    Status(commands::status::StatusArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Initialize a new configuration file
    Init(commands::init::InitArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExportFormat, InputFormat, ResourceType};

    #[test]
    fn test_cli_parse_import() {
        let cli = Cli::parse_from(["meridian", "import", "--format", "ccda", "doc.xml"]);
        assert_eq!(cli.config, "meridian.toml");
        match cli.command {
            Commands::Import(args) => {
                assert_eq!(args.format, InputFormat::Ccda);
                assert_eq!(args.file.to_str(), Some("doc.xml"));
                assert!(args.patient_id.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_with_config() {
        let cli = Cli::parse_from(["meridian", "--config", "custom.toml", "validate-config"]);
        assert_eq!(cli.config, "custom.toml");
        assert!(matches!(cli.command, Commands::ValidateConfig(_)));
    }

    #[test]
    fn test_cli_parse_export_types() {
        let cli = Cli::parse_from([
            "meridian",
            "export",
            "--patient-id",
            "p1",
            "--format",
            "fhir-r4",
            "--types",
            "Condition,MedicationStatement",
            "--since",
            "2024-01-01",
        ]);
        match cli.command {
            Commands::Export(args) => {
                assert_eq!(args.format, ExportFormat::FhirR4Bundle);
                assert_eq!(
                    args.types,
                    vec![ResourceType::Condition, ResourceType::MedicationStatement]
                );
                assert!(args.since.is_some());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_export_needs_a_scope() {
        assert!(Cli::try_parse_from(["meridian", "export"]).is_err());
        assert!(Cli::try_parse_from([
            "meridian",
            "export",
            "--patient-id",
            "p1",
            "--organization",
            "org-1"
        ])
        .is_err());
    }

    #[test]
    fn test_cli_resolve_needs_a_decision() {
        let job_id = "6f1c0f52-3c9e-4a53-9a55-2d0f2f1f7a11";
        assert!(Cli::try_parse_from(["meridian", "resolve", job_id]).is_err());
        let cli = Cli::parse_from(["meridian", "resolve", job_id, "--create-new"]);
        assert!(matches!(cli.command, Commands::Resolve(_)));
    }

    #[test]
    fn test_cli_parse_init() {
        let cli = Cli::parse_from(["meridian", "init"]);
        assert!(matches!(cli.command, Commands::Init(_)));
    }
}
