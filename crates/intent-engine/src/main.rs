use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use intent_engine::simulator::{run_simulation, SimulationConfig};
use intent_engine::{logging, EngineConfig};
use std::path::PathBuf;
use std::time::Duration;

fn cli() -> Command {
    Command::new("intentd")
        .version(intent_engine::VERSION)
        .about("Intent reconciliation engine")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Engine configuration file (TOML)"),
        )
        .arg(
            Arg::new("log")
                .long("log")
                .global(true)
                .help("Log filter, overrides the configured one (RUST_LOG wins over both)"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a seeded workload against an in-process cluster")
                .arg(
                    Arg::new("replicas")
                        .long("replicas")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Number of controller replicas"),
                )
                .arg(
                    Arg::new("intents")
                        .long("intents")
                        .default_value("50")
                        .value_parser(value_parser!(usize))
                        .help("Number of intents to submit"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("fault-rate")
                        .long("fault-rate")
                        .default_value("0.0")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a device batch meets unreachable devices"),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .default_value("30")
                        .value_parser(value_parser!(u64))
                        .help("Seconds to wait for convergence"),
                )
                .arg(
                    Arg::new("no-failover")
                        .long("no-failover")
                        .action(ArgAction::SetTrue)
                        .help("Keep every replica running for the whole workload"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output report as JSON"),
                ),
        )
        .subcommand(Command::new("config").about("Print the effective configuration as TOML"))
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<EngineConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

async fn simulate(args: &ArgMatches, config: EngineConfig) -> anyhow::Result<bool> {
    let sim = SimulationConfig {
        replicas: args.get_one::<usize>("replicas").copied().unwrap_or(3),
        intents: args.get_one::<usize>("intents").copied().unwrap_or(50),
        seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
        fault_rate: args.get_one::<f64>("fault-rate").copied().unwrap_or(0.0),
        failover: !args.get_flag("no-failover"),
        timeout: Duration::from_secs(args.get_one::<u64>("timeout").copied().unwrap_or(30)),
        ..SimulationConfig::default()
    };
    let json = args.get_flag("json");

    let report = run_simulation(sim, config).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.generate_text());
    }
    Ok(report.passed())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let mut config = load_config(&matches)?;
    if let Some(filter) = matches.get_one::<String>("log") {
        config.log_filter.clone_from(filter);
    }

    match matches.subcommand() {
        Some(("simulate", args)) => {
            logging::init(&config.log_filter, matches.get_flag("log-json"))?;
            let passed = simulate(args, config).await?;
            std::process::exit(if passed { 0 } else { 1 });
        }
        Some(("config", _)) => {
            print!("{}", config.to_toml_string()?);
        }
        _ => {
            cli().print_help()?;
            println!();
        }
    }
    Ok(())
}
