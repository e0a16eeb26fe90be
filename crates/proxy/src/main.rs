//! Rampart proxy - main entry point
//!
//! Command-line surface for configuration validation and certificate
//! management. The `acme renew` subcommand loads the configuration, seeds
//! the certificate store, spawns the renewal task and reports its outcome.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use rampart_config::Config;
use rampart_proxy::acme::{renew_certificate, AcmeRegistry, ChallengeBoard, HttpTransport};
use rampart_proxy::store::{load_entry, CertStore};

/// Rampart - a reverse proxy with embedded ACME certificate renewal
#[derive(Parser, Debug)]
#[command(name = "rampart")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(
        short = 'c',
        long = "config",
        env = "RAMPART_CONFIG",
        default_value = "rampart.kdl"
    )]
    config: String,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file and exit
    Test,
    /// ACME certificate operations
    Acme {
        #[command(subcommand)]
        command: AcmeCommands,
    },
}

#[derive(Subcommand, Debug)]
enum AcmeCommands {
    /// Renew the certificate stored under the given path
    Renew {
        /// Store path of the certificate to renew
        certname: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Test => test_config(&cli.config),
        Commands::Acme {
            command: AcmeCommands::Renew { certname },
        } => renew(&cli.config, &certname),
    }
}

/// Validate the configuration file and exit
fn test_config(path: &str) -> Result<()> {
    let config = Config::from_file(path).context("Failed to load configuration file")?;
    info!(
        acme_sections = config.acme.len(),
        certificates = config.certificates.len(),
        "Configuration is valid"
    );
    Ok(())
}

/// Trigger one renewal and wait for the task's outcome
fn renew(config_path: &str, certname: &str) -> Result<()> {
    let config = Config::from_file(config_path).context("Failed to load configuration file")?;
    let registry =
        AcmeRegistry::from_config(&config).context("Failed to initialize ACME identities")?;

    let store = Arc::new(CertStore::new());
    for decl in &config.certificates {
        let entry = load_entry(decl)
            .with_context(|| format!("Failed to load certificate '{}'", decl.path))?;
        store.insert(entry);
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start the runtime")?;
    runtime.block_on(async {
        let transport = Arc::new(HttpTransport::new()?);
        let publisher = Arc::new(ChallengeBoard::new());

        let handle = renew_certificate(certname, &registry, &store, transport, publisher)?;

        match handle.await.context("Renewal task panicked")? {
            Ok(()) => {
                info!(cert = %certname, "Certificate renewed");
                Ok(())
            }
            Err(err) => bail!("renewal of '{certname}' failed: {err}"),
        }
    })
}
