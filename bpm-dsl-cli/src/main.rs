//! Command-line front-end for the BPM DSL compiler.
//!
//! ```bash
//! # Convert a process definition to BPMN XML
//! bpm-dsl convert order.bpm --output order.bpmn
//!
//! # Validate without emitting
//! bpm-dsl validate order.bpm
//!
//! # Show a parsed summary
//! bpm-dsl info order.bpm
//! ```
//!
//! Exit codes: 0 on success, 1 on parse/validation failure, 2 on I/O
//! errors (unreadable input, unwritable output).

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use bpm_dsl_core::diagnostics::{Report, Severity};
use bpm_dsl_core::{
    emit_with, parse_file, sidecar, validate_with, CompileError, EmitterConfig, OpenApiSidecar,
    Process, ValidationOptions,
};

#[derive(Parser)]
#[command(name = "bpm-dsl")]
#[command(version)]
#[command(about = "Compile text-based BPM process definitions to BPMN 2.0 XML")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for diagnostics: pretty (default) or json
    #[arg(long, global = true, default_value = "pretty", value_enum)]
    format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a .bpm file to BPMN XML
    Convert {
        input: PathBuf,

        /// Output path (default: input with a .bpmn extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Emit even when the validator reports warnings
        #[arg(long)]
        emit_on_warnings: bool,

        /// Downgrade unreachable-element errors to warnings
        #[arg(long)]
        permissive: bool,

        /// Omit the XML declaration from the output
        #[arg(long)]
        no_xml_declaration: bool,
    },

    /// Validate a .bpm file and print the diagnostics report
    Validate {
        input: PathBuf,

        /// Downgrade unreachable-element errors to warnings
        #[arg(long)]
        permissive: bool,
    },

    /// Print a human-readable summary of a .bpm file
    Info { input: PathBuf },
}

/// Command failure with the exit code mandated for its class.
struct CmdError {
    code: u8,
    message: String,
}

impl CmdError {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            code: 1,
            message: message.into(),
        }
    }

    fn io(message: impl Into<String>) -> Self {
        Self {
            code: 2,
            message: message.into(),
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Convert {
            input,
            output,
            emit_on_warnings,
            permissive,
            no_xml_declaration,
        } => cmd_convert(
            &input,
            output,
            emit_on_warnings,
            permissive,
            no_xml_declaration,
        ),
        Commands::Validate { input, permissive } => cmd_validate(&input, permissive, cli.format),
        Commands::Info { input } => cmd_info(&input),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}: {}", "error".red().bold(), e.message);
            }
            ExitCode::from(e.code)
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_convert(
    input: &Path,
    output: Option<PathBuf>,
    emit_on_warnings: bool,
    permissive: bool,
    no_xml_declaration: bool,
) -> Result<(), CmdError> {
    let (process, api) = load(input)?;

    let options = ValidationOptions {
        strict_connectivity: !permissive,
    };
    let report = validate_with(&process, &options, Some(&api));
    render_report(input, &report);

    if !report.is_valid() {
        return Err(CmdError::failure("validation failed"));
    }
    if report.has_warnings() && !emit_on_warnings {
        return Err(CmdError::failure(
            "validation produced warnings; rerun with --emit-on-warnings to convert anyway",
        ));
    }

    let config = EmitterConfig {
        xml_declaration: !no_xml_declaration,
        ..EmitterConfig::default()
    };
    let xml = emit_with(&process, &config)
        .map_err(|e| CmdError::failure(format!("emission failed: {}", e)))?;

    let output = output.unwrap_or_else(|| input.with_extension("bpmn"));
    std::fs::write(&output, &xml).map_err(|e| {
        CmdError::io(format!("failed to write '{}': {}", output.display(), e))
    })?;

    println!(
        "{} wrote {}",
        "ok".green().bold(),
        output.display().to_string().cyan()
    );
    print_summary(&process);
    Ok(())
}

fn cmd_validate(input: &Path, permissive: bool, format: OutputFormat) -> Result<(), CmdError> {
    let (process, api) = load(input)?;

    let options = ValidationOptions {
        strict_connectivity: !permissive,
    };
    let report = validate_with(&process, &options, Some(&api));

    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "valid": report.is_valid(),
                "errors": report.errors.len(),
                "warnings": report.warnings.len(),
                "diagnostics": report.iter().map(|d| {
                    serde_json::json!({
                        "severity": match d.severity {
                            Severity::Error => "error",
                            Severity::Warning => "warning",
                        },
                        "rule": d.code.as_str(),
                        "message": d.message,
                        "element": d.element_id,
                    })
                }).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&out).unwrap());
        }
        OutputFormat::Pretty => {
            render_report(input, &report);
            if report.is_valid() {
                println!(
                    "{} '{}' is valid ({} elements, {} flows)",
                    "ok".green().bold(),
                    process.name,
                    process.elements.len(),
                    process.flows.len()
                );
            }
        }
    }

    if report.is_valid() {
        Ok(())
    } else {
        Err(CmdError {
            code: 1,
            message: String::new(),
        })
    }
}

fn cmd_info(input: &Path) -> Result<(), CmdError> {
    let process = parse(input)?;

    println!("{}", "Process".cyan().bold());
    print_summary(&process);

    let mut kinds: Vec<(&str, usize)> = Vec::new();
    for element in &process.elements {
        match kinds.iter_mut().find(|(k, _)| *k == element.kind()) {
            Some((_, n)) => *n += 1,
            None => kinds.push((element.kind(), 1)),
        }
    }
    println!("\n{}", "Elements".cyan().bold());
    for (kind, n) in &kinds {
        println!("  {}: {}", kind, n);
    }
    for element in &process.elements {
        println!(
            "  {} {} ({})",
            element.kind().yellow(),
            element.name(),
            element.id().dimmed()
        );
    }

    if !process.flows.is_empty() {
        println!("\n{}", "Flows".cyan().bold());
        for flow in &process.flows {
            let condition = flow
                .condition
                .as_deref()
                .map(|c| format!(" [condition: {}]", c))
                .unwrap_or_default();
            println!("  {} -> {}{}", flow.source_id, flow.target_id, condition.dimmed());
        }
    }

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Parse the source file; map each failure class to its exit code.
fn parse(input: &Path) -> Result<Process, CmdError> {
    parse_file(input).map_err(|e| match e {
        CompileError::Io(io) => {
            CmdError::io(format!("failed to read '{}': {}", input.display(), io))
        }
        other => CmdError::failure(other.to_string()),
    })
}

/// Parse plus sidecar schema load for entity resolution.
fn load(input: &Path) -> Result<(Process, OpenApiSidecar), CmdError> {
    let process = parse(input)?;
    let sidecar_path = sidecar::locate(input).map_err(|e| CmdError::failure(e.to_string()))?;
    let api = OpenApiSidecar::load(&sidecar_path)
        .map_err(|e| CmdError::io(format!("{:#}", e)))?;
    Ok((process, api))
}

fn render_report(input: &Path, report: &Report) {
    for diagnostic in report.iter() {
        let severity = match diagnostic.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
        };
        let element = diagnostic
            .element_id
            .as_deref()
            .map(|id| format!(" (element '{}')", id))
            .unwrap_or_default();
        eprintln!(
            "{}: {}[{}]: {}{}",
            input.display(),
            severity,
            diagnostic.code.as_str(),
            diagnostic.message,
            element.dimmed()
        );
    }
}

fn print_summary(process: &Process) {
    println!("  Name:     {}", process.name);
    println!("  Id:       {}", process.id);
    println!(
        "  Version:  {}",
        process.version.as_deref().unwrap_or("N/A")
    );
    println!("  Elements: {}", process.elements.len());
    println!("  Flows:    {}", process.flows.len());
}
