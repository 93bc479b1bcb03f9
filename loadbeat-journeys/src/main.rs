use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loadbeat_core::{random, telemetry, HarnessConfig, Runner};
use loadbeat_journeys::{catalog, JOURNEYS};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about = "Virtual-user load runs against the social-network API", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one journey along a ramp profile
    Run {
        /// Journey name, see `loadbeat list`
        journey: String,

        /// Named profile: standard, secondary-stress, spike, smoke, single
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,

        /// Inline stages, e.g. `30s:10,1m:10,10s:0`
        #[arg(long, value_name = "STAGES", conflicts_with = "profile")]
        stages: Option<String>,

        /// Write the run summary as JSON
        #[arg(long, value_name = "PATH")]
        summary_json: Option<PathBuf>,

        /// Write Prometheus exposition text at run end
        #[arg(long, value_name = "PATH")]
        prometheus_out: Option<PathBuf>,

        /// Scheduler tick in milliseconds
        #[arg(long, value_name = "MS")]
        tick_ms: Option<u64>,

        /// Seconds a ramped-down VU may spend finishing its iteration
        #[arg(long, value_name = "SECS")]
        grace: Option<u64>,
    },

    /// List registered journeys
    List,

    /// Print the resolved configuration as TOML
    Config {
        /// Write to this file instead of stdout
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::List => {
            list();
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { output } => {
            let config = load_config(cli.config.as_deref())?;
            match output {
                Some(path) => {
                    config
                        .save_to_file(&path)
                        .with_context(|| format!("Failed to write configuration to {}", path.display()))?;
                    info!(path = %path.display(), "Configuration written");
                }
                None => print!("{}", config.to_toml()?),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            journey,
            profile,
            stages,
            summary_json,
            prometheus_out,
            tick_ms,
            grace,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if stages.is_some() {
                config.scenario.stages = stages;
            } else if profile.is_some() {
                config.scenario.stages = None;
                config.scenario.profile = profile;
            }
            let options = RunOptions {
                summary_json: summary_json.or_else(|| config.output.summary_json.clone().map(PathBuf::from)),
                prometheus_out: prometheus_out.or_else(|| config.output.prometheus_out.clone().map(PathBuf::from)),
                tick: tick_ms.map(Duration::from_millis),
                grace: grace.map(Duration::from_secs),
            };
            run(&journey, config, options).await
        }
    }
}

struct RunOptions {
    summary_json: Option<PathBuf>,
    prometheus_out: Option<PathBuf>,
    tick: Option<Duration>,
    grace: Option<Duration>,
}

fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    let mut config = match path {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => HarnessConfig::from_env().context("Failed to load configuration from environment")?,
    };
    config.apply_env_overrides()?;
    Ok(config)
}

fn list() {
    let width = JOURNEYS.iter().map(|j| j.name.len()).max().unwrap_or(0);
    for info in JOURNEYS {
        println!("{:<width$}  {}", info.name, info.description);
    }
}

async fn run(journey: &str, config: HarnessConfig, options: RunOptions) -> Result<ExitCode> {
    let info = catalog::find(journey)?;
    config.validate()?;
    telemetry::init_logging(&config.logging);
    if random::seed(config.random.seed.as_deref()) {
        info!(seed = ?config.random.seed, "Seeded process-wide random source");
    }

    let prometheus = match &options.prometheus_out {
        Some(_) => Some(telemetry::install_prometheus()?),
        None => None,
    };

    // The journey's own ramp applies only when nothing else chose one
    let uses_default_ramp = config.scenario.stages.is_none() && config.scenario.profile.is_none();
    let mut runner = Runner::new(config)?;
    if uses_default_ramp {
        if let Some(profile) = info.default_profile()? {
            runner = runner.with_profile(profile);
        }
    }
    if let Some(tick) = options.tick {
        runner = runner.with_tick(tick);
    }
    if let Some(grace) = options.grace {
        runner = runner.with_grace(grace);
    }
    runner.stop_signal().install_ctrl_c();

    info!(journey = info.name, profile = %runner.profile(), "Starting load run");
    let summary = catalog::run_named(info.name, &runner).await?;
    println!("{summary}");

    if let Some(path) = &options.summary_json {
        summary.write_json(path)?;
    }
    if let (Some(handle), Some(path)) = (&prometheus, &options.prometheus_out) {
        telemetry::write_prometheus(handle, path)?;
    }

    let code = summary.exit_code();
    if code != 0 {
        warn!(journey = info.name, exit_code = code, "Run did not pass");
    }
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "loadbeat",
            "run",
            "login",
            "--stages",
            "5s:2,5s:0",
            "--summary-json",
            "out.json",
            "--config",
            "loadbeat.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("loadbeat.toml")));
        match cli.command {
            Commands::Run {
                journey, stages, summary_json, ..
            } => {
                assert_eq!(journey, "login");
                assert_eq!(stages.as_deref(), Some("5s:2,5s:0"));
                assert_eq!(summary_json, Some(PathBuf::from("out.json")));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_profile_and_stages_conflict() {
        assert!(Cli::try_parse_from(["loadbeat", "run", "login", "--profile", "smoke", "--stages", "1s:1"]).is_err());
    }

    #[test]
    fn test_cli_parses_list() {
        let cli = Cli::try_parse_from(["loadbeat", "list"]).unwrap();
        assert!(matches!(cli.command, Commands::List));
    }

    #[test]
    fn test_cli_parses_config_dump() {
        let cli = Cli::try_parse_from(["loadbeat", "config", "--output", "resolved.toml"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { output: Some(ref p) } if p == Path::new("resolved.toml")));
    }
}
