use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use inquire::{Confirm, CustomType, Password};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, warn};
use weather_relay_core::{
    Companion, Config, Endpoints, FileStore, FixedPosition, Geolocator, NoPosition, ProviderId,
    SystemClock, WeatherRecord,
    condition::ConditionCodes,
    correlator::Correlator,
    device::spawn_device,
    link::{memory_link, tcp},
    model::Coordinates,
    provider::http_client,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-relay", version, about = "Weather relay between a device and its companion")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "owm", "darksky", "weatherbit" or "yahoo".
        provider: String,
    },

    /// Run the companion: answer weather requests from a device over TCP.
    Companion {
        /// Address to listen on; overrides the configured one.
        #[arg(long)]
        listen: Option<String>,

        /// JSON file with custom condition code tables.
        #[arg(long)]
        codes: Option<PathBuf>,
    },

    /// Run the device: request weather from a companion over TCP.
    Device {
        /// Companion address; overrides the configured one.
        #[arg(long)]
        connect: Option<String>,

        /// Accept cached weather younger than this many seconds.
        #[arg(long)]
        max_age: Option<u64>,

        /// Number of fetches before exiting.
        #[arg(long, default_value_t = 1)]
        count: u32,

        /// Seconds between fetches.
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },

    /// Show current weather, relaying through an in-process companion.
    Show {
        /// Accept cached weather younger than this many seconds.
        #[arg(long)]
        max_age: Option<u64>,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Configure { provider } => configure(&provider),
            Command::Companion { listen, codes } => run_companion(listen, codes).await,
            Command::Device { connect, max_age, count, interval } => {
                run_device(connect, max_age, count, Duration::from_secs(interval)).await
            }
            Command::Show { max_age } => show(max_age).await,
        }
    }
}

fn configure(provider: &str) -> Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut cfg = Config::load()?;

    if id.requires_api_key() {
        let api_key = Password::new(&format!("{} API key:", id.display_name()))
            .without_confirmation()
            .prompt()
            .context("Failed to read API key")?;
        cfg.upsert_provider_api_key(id, api_key.trim().to_string());
    } else if cfg.default_provider.is_none() {
        cfg.set_default_provider(id);
    }

    if cfg.default_provider_id().ok() != Some(id)
        && Confirm::new(&format!("Use {} as the default provider?", id.display_name()))
            .with_default(true)
            .prompt()?
    {
        cfg.set_default_provider(id);
    }

    cfg.feels_like = Confirm::new("Report \"feels like\" temperatures where available?")
        .with_default(cfg.feels_like)
        .prompt()?;

    if let Some(latitude) = CustomType::<f64>::new("Latitude (Esc to skip):").prompt_skippable()? {
        let longitude = CustomType::<f64>::new("Longitude:").prompt()?;
        cfg.location = Some(Coordinates::new(latitude, longitude));
    }

    cfg.save()?;
    println!("Saved configuration to {}", Config::config_file_path()?.display());
    Ok(())
}

fn geolocator(cfg: &Config) -> Arc<dyn Geolocator> {
    match cfg.location {
        Some(coords) => Arc::new(FixedPosition(coords)),
        None => {
            warn!("no location configured; weather requests will fail");
            Arc::new(NoPosition)
        }
    }
}

fn build_companion(cfg: &Config, codes: Option<PathBuf>) -> Result<Companion> {
    let mut companion = Companion::new(http_client()?, Endpoints::default(), geolocator(cfg));
    if let Some(path) = codes.or_else(|| cfg.companion.custom_codes.clone()) {
        companion.set_custom_codes(ConditionCodes::load(&path)?);
        info!(path = %path.display(), "loaded custom condition codes");
    }
    companion.setup(cfg.provider_settings()?);
    Ok(companion)
}

async fn run_companion(listen: Option<String>, codes: Option<PathBuf>) -> Result<()> {
    let cfg = Config::load()?;
    let companion = build_companion(&cfg, codes)?;

    let addr = listen.unwrap_or_else(|| cfg.companion.listen_addr.clone());
    let endpoint = tcp::listen(&addr).await?;
    let (_handle, task) = companion.spawn(endpoint.transport, endpoint.events);

    tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl-C")?;
    info!("shutting down");
    task.abort();
    Ok(())
}

async fn run_device(
    connect: Option<String>,
    max_age: Option<u64>,
    count: u32,
    interval: Duration,
) -> Result<()> {
    let cfg = Config::load()?;
    let max_age = max_age.map(Duration::from_secs).unwrap_or_else(|| cfg.device.max_age());
    let addr = connect.unwrap_or_else(|| cfg.device.companion_addr.clone());

    let endpoint = tcp::connect(addr, Duration::from_secs(cfg.device.reconnect_secs));
    let store = FileStore::new(cfg.cache_dir()?);
    info!(dir = %store.dir().display(), "using weather cache");
    let correlator = Correlator::new(
        endpoint.transport,
        store,
        Arc::new(SystemClock),
        cfg.device.correlator_settings(),
    );
    let (client, _task) = spawn_device(correlator, endpoint.events);

    for round in 0..count {
        if round > 0 {
            tokio::time::sleep(interval).await;
        }
        match client.fetch(max_age).await {
            Ok(record) => print_record(&record),
            Err(err) => eprintln!("Weather unavailable: {err}"),
        }
    }
    Ok(())
}

async fn show(max_age: Option<u64>) -> Result<()> {
    let cfg = Config::load()?;
    let max_age = max_age.map(Duration::from_secs).unwrap_or_else(|| cfg.device.max_age());
    let companion = build_companion(&cfg, None)?;

    let (link, device, companion_end) = memory_link();
    let (_handle, _companion_task) = companion.spawn(companion_end.transport, companion_end.events);

    let correlator = Correlator::new(
        device.transport,
        FileStore::new(cfg.cache_dir()?),
        Arc::new(SystemClock),
        cfg.device.correlator_settings(),
    );
    let (client, _device_task) = spawn_device(correlator, device.events);
    link.open();

    let record = client.fetch(max_age).await?;
    print_record(&record);
    Ok(())
}

fn clock_time(epoch_ms: i64) -> String {
    match Local.timestamp_millis_opt(epoch_ms).single() {
        Some(t) if epoch_ms > 0 => t.format("%H:%M").to_string(),
        _ => "-".to_string(),
    }
}

fn print_record(record: &WeatherRecord) {
    let location = if record.location().is_empty() { "(unknown)" } else { record.location() };
    println!("Weather for {location}");
    println!(
        "  {:.1}°C / {:.1}°F, {} ({})",
        record.temperature_c(),
        record.temperature_f(),
        record.condition().label(),
        record.description()
    );
    println!(
        "  Sunrise {}, sunset {} ({})",
        clock_time(record.sunrise()),
        clock_time(record.sunset()),
        if record.is_day() { "day" } else { "night" }
    );
    println!("  Fetched at {}", clock_time(record.timestamp()));
}
