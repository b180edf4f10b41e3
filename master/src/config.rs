use clap::Parser;
use ringkv_core::config::{require, ConfigError};
use serde::Deserialize;
use std::fs::read_to_string;

/// `{portUdp, maxKeysPerWorker, threadPoolSize, loopSleepTime}` (§6.3).
#[derive(Deserialize, Debug, Default)]
struct RawConfig {
    port_udp: Option<u16>,
    max_keys_per_worker: Option<u32>,
    thread_pool_size: Option<usize>,
    loop_sleep_time_us: Option<u64>,
    #[serde(default)]
    log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port_udp: u16,
    pub max_keys_per_worker: u32,
    pub thread_pool_size: usize,
    pub loop_sleep_time: std::time::Duration,
    pub log_level: log::Level,
}

#[derive(Parser)]
#[command(about = env!("CARGO_PKG_DESCRIPTION"), version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// specify the configuration file path.
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    port_udp: Option<u16>,

    #[arg(long)]
    max_keys_per_worker: Option<u32>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let cli = Cli::parse();

        let mut raw: RawConfig = match &cli.config {
            Some(path) => {
                let text = read_to_string(path)
                    .map_err(|e| ConfigError(format!("reading {path}: {e}")))?;
                serde_json5::from_str(&text).map_err(|e| ConfigError(format!("parsing {path}: {e}")))?
            }
            None => RawConfig::default(),
        };

        if let Some(v) = cli.port_udp {
            raw.port_udp = Some(v);
        }
        if let Some(v) = cli.max_keys_per_worker {
            raw.max_keys_per_worker = Some(v);
        }

        Ok(Config {
            port_udp: require(raw.port_udp, "portUdp")?,
            max_keys_per_worker: require(raw.max_keys_per_worker, "maxKeysPerWorker")?,
            thread_pool_size: raw.thread_pool_size.unwrap_or(ringkv_core::config::DEFAULT_THREAD_POOL_SIZE),
            loop_sleep_time: raw
                .loop_sleep_time_us
                .map(std::time::Duration::from_micros)
                .unwrap_or(ringkv_core::config::DEFAULT_LOOP_SLEEP),
            log_level: raw
                .log_level
                .as_deref()
                .map(parse_level)
                .transpose()?
                .unwrap_or(log::Level::Info),
        })
    }
}

fn parse_level(s: &str) -> Result<log::Level, ConfigError> {
    s.parse().map_err(|_| ConfigError(format!("invalid log level `{s}`")))
}
