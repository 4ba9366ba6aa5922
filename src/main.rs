use clap::{Parser, Subcommand};
use ratefwd::config::{self, Config};
use ratefwd::telemetry::init_logging;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "ratefwd")]
#[command(about = "Packet reflector with a per-source rate limiter")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dataplane
    Run {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        /// Packets per second allowed per source (0 = unlimited)
        #[arg(long)]
        pps: Option<u64>,

        /// Bytes per second allowed per source (0 = unlimited)
        #[arg(long)]
        bps: Option<u64>,

        /// Print forwarded/dropped counts every second
        #[arg(long)]
        stats: bool,

        /// Put every port in promiscuous mode
        #[arg(short = 'P', long)]
        promisc: bool,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate config.toml
    Validate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

struct Overrides {
    pps: Option<u64>,
    bps: Option<u64>,
    stats: bool,
    promisc: bool,
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if let Some(pps) = self.pps {
            config.limits.pps = pps;
        }
        if let Some(bps) = self.bps {
            config.limits.bps = bps;
        }
        config.stats.enabled |= self.stats;
        config.ports.promiscuous |= self.promisc;
    }
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            pps,
            bps,
            stats,
            promisc,
        } => cmd_run(
            &config,
            Overrides {
                pps,
                bps,
                stats,
                promisc,
            },
        ),
        Commands::Config {
            action: ConfigAction::Validate { config },
        } => {
            init_logging(None);
            cmd_config_validate(&config)
        }
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn cmd_run(config_path: &Path, overrides: Overrides) -> Result<(), String> {
    let mut config = config::load(config_path)
        .map_err(|e| format!("Failed to load {}: {}", config_path.display(), e))?;
    overrides.apply(&mut config);

    init_logging(Some(&config.logging));

    let result = config::validate(&config);
    for warning in &result.warnings {
        tracing::warn!("{}", warning);
    }
    if result.has_errors() {
        result.print_diagnostics();
        return Err(format!(
            "{} has {} error(s)",
            config_path.display(),
            result.errors.len()
        ));
    }

    info!("ratefwd starting...");
    ratefwd::runtime::run(&config).map_err(|e| e.to_string())?;
    info!("ratefwd stopped");
    Ok(())
}

fn cmd_config_validate(config_path: &Path) -> Result<(), String> {
    info!("Validating {}...", config_path.display());

    let config = config::load(config_path)
        .map_err(|e| format!("Failed to load {}: {}", config_path.display(), e))?;

    let result = config::validate(&config);
    result.print_diagnostics();

    if result.has_errors() {
        return Err(format!("{} error(s) found", result.errors.len()));
    }

    println!("Configuration is valid.");
    Ok(())
}
