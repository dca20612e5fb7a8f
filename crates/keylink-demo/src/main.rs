//! keylink demo: pair a phone with a laptop, then sync one record.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keylink_core::clock::{Clock, SystemClock};
use keylink_core::config::ClientConfig;
use keylink_core::http_relay::HttpRelayClient;
use keylink_core::memory_relay::{AccountPolicy, MemoryRelay};
use keylink_core::relay::Relay;
use keylink_core::secret_store::MemorySecretStore;
use keylink_core::{DeviceInfo, KeylinkClient, PairingPhase, PairingPolicy};

#[derive(Parser)]
#[command(name = "keylink-demo", version, about = "Pair two devices and share an encryption key")]
struct Cli {
    /// TOML config file
    #[arg(long, short, global = true, env = "KEYLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Relay base URL; an in-process relay is used when unset
    #[arg(long, global = true)]
    relay_url: Option<String>,

    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Pair a phone with a laptop and sync one record
    Pair {
        /// Pairing session lifetime in seconds
        #[arg(long, default_value_t = 300)]
        ttl: u64,

        /// Skip the verification code step
        #[arg(long)]
        no_verify: bool,

        /// Reset sync afterwards and show the phone entering recovery
        #[arg(long)]
        reset: bool,
    },
    /// Print the resolved configuration
    Config,
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_toml(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::from_env()?,
    };
    if let Some(url) = &cli.relay_url {
        config.relay_url = Some(url.clone());
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn device_info(name: &str) -> DeviceInfo {
    DeviceInfo {
        name: name.to_string(),
        platform: std::env::consts::OS.to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        os_version: None,
    }
}

async fn connect(
    name: &str,
    relay: &Arc<dyn Relay>,
    clock: &Arc<dyn Clock>,
    config: &ClientConfig,
) -> Result<KeylinkClient> {
    let client = KeylinkClient::connect(
        relay.clone(),
        Arc::new(MemorySecretStore::new()),
        clock.clone(),
        config.clone(),
        &device_info(name),
    )
    .await
    .with_context(|| format!("connecting {name}"))?;
    Ok(client)
}

async fn print_devices(client: &KeylinkClient) -> Result<()> {
    let mut table = Table::new();
    table.set_header(vec!["Device", "Name", "Trust", "Key version", "Last seen"]);
    for device in client.devices().await? {
        table.add_row(vec![
            device.id.chars().take(8).collect::<String>(),
            device.name,
            device.trust_state.to_string(),
            device
                .trusted_key_version
                .map_or_else(|| "-".to_string(), |v| v.to_string()),
            device.last_seen_at.format("%H:%M:%S").to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn run_pair(config: ClientConfig, ttl: u64, verify: bool, reset: bool) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let relay: Arc<dyn Relay> = match &config.relay_url {
        Some(url) => Arc::new(HttpRelayClient::new(url.clone(), config.request_timeout())?),
        None => Arc::new(MemoryRelay::new(AccountPolicy::default(), clock.clone())),
    };

    let laptop = connect("laptop", &relay, &clock, &config).await?;
    let phone = connect("phone", &relay, &clock, &config).await?;

    if !laptop.sync_status().await?.encryption_enabled {
        laptop.enable_encryption().await?;
    }
    laptop
        .set_pairing_policy(&PairingPolicy {
            require_verification: Some(verify),
            pairing_ttl_seconds: Some(ttl),
        })
        .await?;

    let (invite, mut issuer) = laptop.start_pairing_as_issuer().await?;
    println!("laptop: pairing code {} (expires {})", invite.pairing_code, invite.expires_at);

    let mut handle = phone
        .start_pairing_as_claimer(invite.pairing_code.as_str())
        .await?;

    loop {
        match issuer.poll().await? {
            PairingPhase::Verifying | PairingPhase::ReadyToApprove => break,
            phase if phase.is_terminal() => bail!("pairing ended early: {phase:?}"),
            _ => tokio::time::sleep(config.poll_interval()).await,
        }
    }

    if let Some(code) = issuer.verification_code() {
        println!("laptop: verification code {code}");
        println!(
            "phone:  verification code {}",
            handle.verification_code().unwrap_or("-")
        );
        if handle.verification_code() != Some(code) {
            issuer.cancel().await?;
            handle.cancel();
            bail!("verification codes differ, pairing cancelled");
        }
    }
    issuer.approve().await?;

    while let Some(update) = handle.next().await {
        match &update.error {
            Some(err) => warn!(phase = ?update.phase, error = %err, "phone pairing update"),
            None => info!(phase = ?update.phase, "phone pairing update"),
        }
        if update.phase.is_terminal() {
            break;
        }
    }
    let phase = handle.wait().await?;
    if phase != PairingPhase::Completed {
        bail!("phone pairing ended in {phase:?}");
    }
    println!("phone:  trusted at key version {:?}", phone.trust_snapshot().trusted_key_version);

    let (version, ciphertext) = laptop
        .sync_gate()
        .encrypt(b"hello from the laptop")
        .await?;
    let plaintext = phone.sync_gate().decrypt(&ciphertext).await?;
    println!(
        "phone:  decrypted v{version} record: {}",
        String::from_utf8_lossy(&plaintext)
    );

    if reset {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let status = laptop.reset_sync().await?;
        println!("laptop: sync reset to key version {}", status.current_key_version);
        let snapshot = phone.refresh().await?;
        println!("phone:  trust state {}", snapshot.trust_state);
        if let Err(e) = phone.sync_gate().check() {
            println!("phone:  sync refused: {e}");
        }
    }

    print_devices(&laptop).await
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return std::process::ExitCode::from(2);
        }
    };
    init_logging(&config.log_level);

    let result = match cli.command.unwrap_or(Command::Pair {
        ttl: 300,
        no_verify: false,
        reset: false,
    }) {
        Command::Pair {
            ttl,
            no_verify,
            reset,
        } => run_pair(config, ttl, !no_verify, reset).await,
        Command::Config => {
            println!("{config:#?}");
            Ok(())
        }
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}
