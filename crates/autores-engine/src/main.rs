//! `autores` command-line interface: simulation, settings checks, ledger queries

use anyhow::{anyhow, Context};
use autores_config::Settings;
use autores_engine::{run_simulation, SimulationConfig};
use autores_ledger::{AuditActionKind, AuditFilter, AuditLedger, FileLedger};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("autores")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Gated, audited incident auto-resolution")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a seeded workload against a simulated executor")
                .arg(
                    Arg::new("incidents")
                        .long("incidents")
                        .default_value("200")
                        .value_parser(value_parser!(usize))
                        .help("Number of incidents to submit"),
                )
                .arg(
                    Arg::new("capacity")
                        .long("capacity")
                        .default_value("4")
                        .value_parser(value_parser!(usize))
                        .help("Maximum concurrent resolutions"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("transient-rate")
                        .long("transient-rate")
                        .default_value("0.10")
                        .value_parser(value_parser!(f64))
                        .help("Chance a step fails transiently"),
                )
                .arg(
                    Arg::new("terminal-rate")
                        .long("terminal-rate")
                        .default_value("0.02")
                        .value_parser(value_parser!(f64))
                        .help("Chance a step fails terminally"),
                )
                .arg(
                    Arg::new("step-delay-ms")
                        .long("step-delay-ms")
                        .default_value("1")
                        .value_parser(value_parser!(u64))
                        .help("Simulated time per step"),
                )
                .arg(
                    Arg::new("kill-switch-after")
                        .long("kill-switch-after")
                        .value_parser(value_parser!(usize))
                        .help("Activate the kill switch after this many incidents"),
                )
                .arg(
                    Arg::new("settings")
                        .long("settings")
                        .help("Settings TOML file"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output report as JSON"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Validate a settings file and print the effective configuration")
                .arg(Arg::new("path").required(true).help("Settings TOML file")),
        )
        .subcommand(
            Command::new("audit")
                .about("Query a JSON-lines audit ledger")
                .arg(
                    Arg::new("ledger")
                        .long("ledger")
                        .required(true)
                        .help("Ledger file"),
                )
                .arg(Arg::new("incident").long("incident").help("Only this incident"))
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .help("Only this action kind, e.g. resolution-rejected"),
                )
                .arg(
                    Arg::new("after")
                        .long("after")
                        .value_parser(value_parser!(u64))
                        .help("Cursor: only entries after this sequence id"),
                )
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .default_value("100")
                        .value_parser(value_parser!(usize))
                        .help("Page size"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn simulate(args: &ArgMatches) -> anyhow::Result<bool> {
    let settings = match args.get_one::<String>("settings") {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let config = SimulationConfig {
        seed: *args.get_one::<u64>("seed").context("seed")?,
        incidents: *args.get_one::<usize>("incidents").context("incidents")?,
        capacity: *args.get_one::<usize>("capacity").context("capacity")?,
        transient_rate: *args.get_one::<f64>("transient-rate").context("transient-rate")?,
        terminal_rate: *args.get_one::<f64>("terminal-rate").context("terminal-rate")?,
        step_delay_ms: *args.get_one::<u64>("step-delay-ms").context("step-delay-ms")?,
        kill_switch_after: args.get_one::<usize>("kill-switch-after").copied(),
    };

    let report = run_simulation(config, settings).await?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.generate_text());
    }
    Ok(report.passed())
}

fn check_config(args: &ArgMatches) -> anyhow::Result<()> {
    let path = args.get_one::<String>("path").context("path")?;
    let settings = Settings::load(path).with_context(|| format!("invalid settings in {path}"))?;
    let effective = serde_json::json!({
        "config": settings.initial_snapshot(),
        "runtime": settings.runtime,
    });
    println!("{}", serde_json::to_string_pretty(&effective)?);
    Ok(())
}

fn audit(args: &ArgMatches) -> anyhow::Result<()> {
    let path = args.get_one::<String>("ledger").context("ledger")?;
    let ledger = FileLedger::open(path).with_context(|| format!("cannot open ledger {path}"))?;

    let mut filter = AuditFilter::new().limit(*args.get_one::<usize>("limit").context("limit")?);
    if let Some(incident) = args.get_one::<String>("incident") {
        filter = filter.subject(incident.as_str());
    }
    if let Some(kind) = args.get_one::<String>("kind") {
        filter = filter.kind(kind.parse::<AuditActionKind>().map_err(|e| anyhow!(e))?);
    }
    if let Some(after) = args.get_one::<u64>("after") {
        filter = filter.after(*after);
    }

    let page = ledger.query(&filter)?;
    for entry in &page.entries {
        println!("{}", serde_json::to_string(entry)?);
    }
    if let Some(cursor) = page.next_cursor {
        eprintln!("more entries available: --after {cursor}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let passed = simulate(args).await?;
            std::process::exit(if passed { 0 } else { 1 });
        }
        Some(("check-config", args)) => check_config(args),
        Some(("audit", args)) => audit(args),
        _ => Err(anyhow!("unknown command")),
    }
}
