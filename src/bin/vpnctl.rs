//! `vpnctl`: command-line control of the VPN instance.
//!
//! Results go to stdout. Tracing goes to stderr, filtered by `RUST_LOG`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use vpn_control::credentials::{ApiKeySettings, KeyringSecretStore};
use vpn_control::{
    CheckOutcome, ClientConfig, HttpControlApi, JsonFileStore, ReconcileEngine, StatusStore,
    ToggleOutcome, ViewState,
};

/// Start, stop and inspect the remote VPN instance
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, env = "VPN_CONTROL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the control API base URL
    #[arg(long, global = true, env = "VPN_CONTROL_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch the current status
    Status,
    /// Start the instance if stopped, otherwise stop it
    Toggle {
        /// Print the server response without waiting for a stable state
        #[arg(long)]
        no_wait: bool,
        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
    /// Check status and follow the instance until it is stable
    Watch {
        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
    /// Print the last known status without contacting the server
    Last,
    /// Manage the stored API key
    Key {
        #[command(subcommand)]
        action: KeyCommand,
    },
    /// Print the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        init: bool,
    },
}

#[derive(Subcommand, Debug)]
enum KeyCommand {
    /// Store a new API key
    Set { key: String },
    /// Remove the stored API key
    Clear,
    /// Show the stored API key, masked
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(ClientConfig::default_config_path);
    let mut config = ClientConfig::load_or_default(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    if let Some(base_url) = args.base_url {
        config.api.base_url = base_url;
    }

    match args.command {
        Commands::Status => {
            let engine = build_engine(&config)?;
            let outcome = engine.force_refresh().await;
            print_view(&engine.view());
            if let CheckOutcome::Failed(e) = outcome {
                return Err(e).context("status check failed");
            }
        }
        Commands::Toggle { no_wait, timeout } => {
            let engine = build_engine(&config)?;
            match engine.toggle().await {
                ToggleOutcome::Sent(action) => {
                    println!("Sent {action}");
                    if !no_wait {
                        follow(&engine, Duration::from_secs(timeout)).await?;
                    }
                    print_view(&engine.view());
                }
                ToggleOutcome::Busy => anyhow::bail!("a request is already in flight"),
                ToggleOutcome::Failed(e) => return Err(e).context("toggle failed"),
            }
        }
        Commands::Watch { timeout } => {
            let engine = build_engine(&config)?;
            if let CheckOutcome::Failed(e) = engine.check_status().await {
                return Err(e).context("status check failed");
            }
            follow(&engine, Duration::from_secs(timeout)).await?;
            print_view(&engine.view());
        }
        Commands::Last => {
            let store = JsonFileStore::new(config.storage.effective_state_dir());
            match store.load() {
                Some(snapshot) => {
                    println!("State:    {}", snapshot.state.display_text());
                    println!(
                        "Instance: {}",
                        snapshot.instance_id.as_deref().unwrap_or("-")
                    );
                    println!("Status:   {}", snapshot.message);
                    println!("Updated:  {}", snapshot.last_updated.to_rfc3339());
                }
                None => println!("No saved status at {}", store.path().display()),
            }
        }
        Commands::Key { action } => {
            let store = KeyringSecretStore::new(&config.credentials.service);
            let mut settings = ApiKeySettings::load(Box::new(store), &config.credentials.account);
            match action {
                KeyCommand::Set { key } => {
                    settings.set_api_key(&key)?;
                    println!("API key saved");
                }
                KeyCommand::Clear => {
                    settings.clear_api_key()?;
                    println!("API key removed");
                }
                KeyCommand::Show => {
                    if settings.has_api_key() {
                        println!("{}", mask_key(settings.api_key()));
                    } else {
                        println!("No API key set");
                    }
                }
            }
        }
        Commands::Config { init } => {
            if init {
                config.save_to_file(&config_path)?;
                println!("Wrote {}", config_path.display());
            }
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn build_engine(config: &ClientConfig) -> anyhow::Result<ReconcileEngine> {
    let settings = ApiKeySettings::load(
        Box::new(KeyringSecretStore::new(&config.credentials.service)),
        &config.credentials.account,
    );
    if !settings.has_api_key() {
        tracing::warn!("no API key set; run `vpnctl key set <KEY>`");
    }

    let api = HttpControlApi::new(&config.api, settings.api_key())?;
    let store = JsonFileStore::new(config.storage.effective_state_dir());
    Ok(ReconcileEngine::initialize(
        Arc::new(api),
        Arc::new(store),
        config.polling.interval(),
    ))
}

/// Block until no request is in flight and polling has ended.
async fn follow(engine: &ReconcileEngine, timeout: Duration) -> anyhow::Result<()> {
    let mut view = engine.subscribe();
    let mut last_message = String::new();

    let settled = async {
        loop {
            let current = view.borrow_and_update().clone();
            if current.status_message != last_message {
                println!("  {}", current.status_message);
                last_message = current.status_message.clone();
            }
            if !current.polling && !current.is_loading {
                return Ok::<_, anyhow::Error>(());
            }
            view.changed().await?;
        }
    };

    tokio::select! {
        result = tokio::time::timeout(timeout, settled) => {
            result.context("timed out waiting for a stable state")?
        }
        _ = tokio::signal::ctrl_c() => {
            engine.shutdown();
            anyhow::bail!("interrupted")
        }
    }
}

fn print_view(view: &ViewState) {
    println!("State:    {}", view.state.display_text());
    println!(
        "Instance: {}",
        view.instance_id.as_deref().unwrap_or("-")
    );
    println!("Status:   {}", view.status_message);
    if let Some(updated) = view.last_updated {
        println!("Updated:  {}", updated.to_rfc3339());
    }
    if let Some(error) = &view.error_message {
        println!("Error:    {error}");
    }
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{visible}", "*".repeat(chars.len() - 4))
}
