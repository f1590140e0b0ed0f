use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vizgen_core::{PipelineOrchestrator, PipelineRun, RunStatus};
use vizgen_gateway::HttpGateway;

mod settings;

use settings::Settings;

fn cli() -> Command {
    Command::new("vizgen")
        .version(vizgen_core::VERSION)
        .about("Turn a request into verified p5.js visualization code")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Debug logging for vizgen crates"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("run")
                .about("Run the pipeline on one request")
                .arg(
                    Arg::new("request")
                        .required(true)
                        .help("Request text, or '-' to read it from stdin"),
                )
                .arg(config_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the whole run as JSON"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .short('o')
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the final code to this file"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Load and validate a config file")
                .arg(config_arg()),
        )
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .default_value("vizgen.toml")
        .value_parser(value_parser!(PathBuf))
        .help("Config file")
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("verbose"), matches.get_flag("log-json"));

    let result = match matches.subcommand() {
        Some(("run", args)) => run(args).await,
        Some(("check-config", args)) => check_config(args),
        _ => Ok(ExitCode::SUCCESS),
    };

    result.unwrap_or_else(|e| {
        eprintln!("error: {e:#}");
        ExitCode::FAILURE
    })
}

fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("vizgen_core=debug,vizgen_gateway=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn config_path(args: &ArgMatches) -> PathBuf {
    args.get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("vizgen.toml"))
}

fn read_request(args: &ArgMatches) -> Result<String> {
    let request = args
        .get_one::<String>("request")
        .map(String::as_str)
        .unwrap_or_default();
    if request != "-" {
        return Ok(request.to_string());
    }
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("failed to read request from stdin")?;
    Ok(text)
}

async fn run(args: &ArgMatches) -> Result<ExitCode> {
    let settings = Settings::load(&config_path(args))?;
    let request = read_request(args)?;

    let gateway = HttpGateway::from_config(settings.gateway)?;
    let orchestrator = PipelineOrchestrator::new(Arc::new(gateway), settings.pipeline)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            on_interrupt.cancel();
        }
    });

    let run = orchestrator.execute_with_cancel(&request, cancel).await;
    info!(
        run_id = %run.id,
        status = %run.status,
        duration_ms = run.duration_ms(),
        "Run finished"
    );

    if let (Some(path), Some(code)) = (args.get_one::<PathBuf>("out"), run.final_content()) {
        std::fs::write(path, code).with_context(|| format!("failed to write {}", path.display()))?;
    }

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print!("{}", render_run(&run));
    }

    Ok(if run.status == RunStatus::Error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn render_run(run: &PipelineRun) -> String {
    let mut out = format!("Run {}: {} ({} ms)\n", run.id, run.status, run.duration_ms());
    if let Some(content_type) = &run.content_type {
        out.push_str(&format!("  Content type: {}\n", content_type.label()));
    }
    if let Some(consensus) = &run.consensus {
        out.push_str(&format!(
            "  Consensus: {} of {} accepted\n",
            consensus.accepts(),
            consensus.votes.len()
        ));
    }
    if let Some(ladder) = &run.ladder {
        out.push_str(&format!(
            "  Fallback: {:?} after {} repair attempt(s)\n",
            ladder.rung, ladder.repair_attempts
        ));
    }
    if let Some(failure) = &run.failure {
        out.push_str(&format!(
            "  Failed at '{}' ({}): {}\n",
            failure.stage, failure.kind, failure.cause
        ));
    }
    let sections = [
        ("Code", run.final_content()),
        ("Test cases", run.auxiliary.test_cases.as_deref()),
        ("Documentation", run.auxiliary.documentation.as_deref()),
    ];
    for (title, body) in sections {
        if let Some(body) = body {
            out.push_str(&format!("\n== {title} ==\n{}\n", body.trim_end()));
        }
    }
    out
}

fn check_config(args: &ArgMatches) -> Result<ExitCode> {
    let path = config_path(args);
    let settings = Settings::load(&path)?;

    println!("Config: {}", path.display());
    println!(
        "  Providers: {}",
        settings.gateway.providers.keys().cloned().collect::<Vec<_>>().join(", ")
    );
    println!("  Panel: {} voter(s)", settings.pipeline.panel.len());
    println!("  Repair attempts: {}", settings.pipeline.repair_attempts);
    println!();
    println!("Routing:");
    for (stage, capability, provider) in settings.routing() {
        println!(
            "  {stage:<20} {capability:<20} -> {}",
            provider.as_deref().unwrap_or("(none)")
        );
    }

    settings.ensure_routable()?;
    println!();
    println!("Status: OK");
    Ok(ExitCode::SUCCESS)
}
