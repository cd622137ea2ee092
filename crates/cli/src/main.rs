mod assembly;
mod logging;
mod settings;
mod simulate;

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use portcullis_core::FLOW_ID_LOGIN;

use crate::assembly::LoadError;
use crate::settings::Settings;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Portcullis login flow toolchain.
#[derive(Parser)]
#[command(name = "portcullis", version, about = "Portcullis login flow toolchain")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Settings file (TOML) for credential actions and views
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check flow definition files and build them into flows
    Validate {
        /// Flow definition JSON files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Build flow definitions and list the resulting flows
    Flows {
        /// Flow definition JSON files
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Flow ids to leave out of the listing
        #[arg(long)]
        exclude: Vec<String>,
    },

    /// Run a flow against a synthetic request
    Simulate {
        /// Flow definition JSON files
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Flow to launch
        #[arg(long, default_value = FLOW_ID_LOGIN)]
        flow: String,
        /// Principal asserted by the container
        #[arg(long)]
        remote_user: Option<String>,
        /// Request header as 'Name: value' (repeatable)
        #[arg(long = "header")]
        headers: Vec<String>,
        /// Request parameter as 'name=value' (repeatable)
        #[arg(long = "param")]
        params: Vec<String>,
        /// Event to signal when the flow pauses (repeatable, in order)
        #[arg(long = "event")]
        events: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            report_error(&e.to_string(), cli.output, cli.quiet);
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Validate { files } => cmd_validate(&files, &settings, cli.output, cli.quiet),
        Commands::Flows { files, exclude } => {
            cmd_flows(&files, &exclude, &settings, cli.output, cli.quiet)
        }
        Commands::Simulate {
            files,
            flow,
            remote_user,
            headers,
            params,
            events,
        } => simulate::cmd_simulate(simulate::SimulateOptions {
            files: &files,
            settings: &settings,
            flow_id: &flow,
            remote_user: remote_user.as_deref(),
            headers: &headers,
            params: &params,
            events: &events,
            output: cli.output,
            quiet: cli.quiet,
        }),
    }
}

fn cmd_validate(files: &[PathBuf], settings: &Settings, output: OutputFormat, quiet: bool) {
    match assembly::assemble(files, settings) {
        Ok(assembly) => {
            if quiet {
                return;
            }
            match output {
                OutputFormat::Text => println!("valid: {}", assembly.flow_ids.join(", ")),
                OutputFormat::Json => {
                    let json = serde_json::json!({
                        "valid": true,
                        "flows": assembly.flow_ids,
                    });
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json).unwrap_or_default()
                    );
                }
            }
        }
        Err(e) => {
            report_load_error(&e, output, quiet);
            process::exit(1);
        }
    }
}

fn cmd_flows(
    files: &[PathBuf],
    exclude: &[String],
    settings: &Settings,
    output: OutputFormat,
    quiet: bool,
) {
    let assembly = match assembly::assemble(files, settings) {
        Ok(a) => a,
        Err(e) => {
            report_load_error(&e, output, quiet);
            process::exit(1);
        }
    };

    let excluded: Vec<&str> = exclude.iter().map(String::as_str).collect();
    let summaries: Vec<_> = assembly
        .registry
        .flow_ids_excluding(&excluded)
        .iter()
        .filter_map(|id| assembly.registry.get(id))
        .map(|flow| flow.summary())
        .collect();

    match output {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&summaries)
                    .unwrap_or_else(|e| format!("serialization error: {}", e))
            );
        }
        OutputFormat::Text => {
            for summary in &summaries {
                println!(
                    "{} (start: {}, {} states, {} exception handlers)",
                    summary.id,
                    summary.start_state,
                    summary.states.len(),
                    summary.exception_handlers.len()
                );
                if quiet {
                    continue;
                }
                for state in &summary.states {
                    let targets: Vec<String> = state
                        .transitions
                        .iter()
                        .map(|t| match &t.on {
                            Some(on) => format!("{} -> {}", on, t.to),
                            None => format!("* -> {}", t.to),
                        })
                        .collect();
                    println!("  {} [{}] {}", state.id, state.kind, targets.join(", "));
                }
            }
        }
    }
}

/// Loading failures: the headline, then each individual problem.
pub(crate) fn report_load_error(e: &LoadError, output: OutputFormat, quiet: bool) {
    let details = e.details();
    match output {
        OutputFormat::Text => {
            if !quiet {
                eprintln!("{}", e.headline());
                for detail in &details {
                    eprintln!("  - {}", detail);
                }
            }
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "valid": false,
                "error": e.headline(),
                "errors": details,
            });
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&json).unwrap_or_default()
            );
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
