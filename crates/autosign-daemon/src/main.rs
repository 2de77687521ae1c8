//! Autosign - air-gapped batch transaction signer

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autosign_daemon::{
    orchestrator::{Autosigner, Collaborators, RunMode},
    provision::prompt_seed,
    AutosignConfig, DaemonError, LedMode, SignalGuard, SummaryChoice,
};

/// Autosign - sign transactions from a removable device
///
/// The device must carry a partition with the configured label and a
/// user-writable `tx` directory. Unsigned `*.rawtx` files found there are
/// signed with the local wallets and written back as `*.sigtx`.
#[derive(Parser)]
#[command(name = "autosign")]
#[command(about = "Air-gapped batch transaction signer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Coins to sign for (comma-separated)
    #[arg(short = 'c', long, value_delimiter = ',')]
    coins: Vec<String>,

    /// Don't check for device insertion
    #[arg(short = 'I', long)]
    no_insert_check: bool,

    /// Use the status LED to signal standby, busy and error
    #[arg(short = 'l', long)]
    led: bool,

    /// Stealth LED mode: signal busy and error only, and only after a
    /// successful wallet unlock
    #[arg(short = 's', long)]
    stealth_led: bool,

    /// Alternate mountpoint for the removable device
    #[arg(short = 'm', long)]
    mountpoint: Option<PathBuf>,

    /// Don't print a transaction summary
    #[arg(short = 'n', long, conflicts_with = "full_summary")]
    no_summary: bool,

    /// Print the full view of every signed transaction
    #[arg(short = 'S', long)]
    full_summary: bool,

    /// Produce quieter output
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    quiet: bool,

    /// Produce more verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Alternate local wallet directory
    #[arg(long)]
    wallet_dir: Option<PathBuf>,

    /// Alternate configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign on every device insertion until terminated
    Wait,

    /// Write a new key file to the inserted device
    #[command(name = "gen_key")]
    GenKey,

    /// Write a new key file and create a fresh local wallet
    Setup,
}

impl Cli {
    fn apply(&self, config: &mut AutosignConfig) {
        if !self.coins.is_empty() {
            config.coins = self.coins.clone();
        }
        if self.no_insert_check {
            config.insert_check = false;
        }
        if self.stealth_led {
            config.led = LedMode::Stealth;
        } else if self.led {
            config.led = LedMode::On;
        }
        if let Some(mountpoint) = &self.mountpoint {
            config.mountpoint = mountpoint.clone();
        }
        if let Some(wallet_dir) = &self.wallet_dir {
            config.wallet_dir = wallet_dir.clone();
        }
        if self.no_summary {
            config.summary = SummaryChoice::None;
        } else if self.full_summary {
            config.summary = SummaryChoice::Full;
        }
    }

    fn log_directive(&self) -> &'static str {
        if self.quiet {
            "autosign=warn"
        } else if self.verbose {
            "autosign=debug"
        } else {
            "autosign=info"
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config =
        AutosignConfig::load_or_default(cli.config.as_deref()).context("Failed to load config")?;
    cli.apply(&mut config);

    let mode = match cli.command {
        None => RunMode::Sign,
        Some(Commands::Wait) => RunMode::Wait,
        Some(Commands::GenKey) => RunMode::GenKey,
        Some(Commands::Setup) => RunMode::Setup {
            seed: Box::new(prompt_seed),
        },
    };

    let parts = Collaborators::system(&config)?;
    let mut guard = SignalGuard::install()?;
    let mut autosigner = Autosigner::new(config, parts).quiet(cli.quiet);

    let success = autosigner.run(mode, guard.wait()).await?;
    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting autosign v{}", env!("CARGO_PKG_VERSION"));

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            let code = e
                .downcast_ref::<DaemonError>()
                .map(DaemonError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}
