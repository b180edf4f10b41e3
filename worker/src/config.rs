use clap::Parser;
use ringkv_core::config::{require, ConfigError};
use serde::Deserialize;
use std::fs::read_to_string;
use std::time::Duration;

/// `{masterHost, masterPortUdp, wPortUdp, wPortTcp, threadPoolSize,
/// recentAddLimit, thresholdNeighborShift, maxKeysToShift, loopSleepTime}`
/// (§6.3).
#[derive(Deserialize, Debug, Default)]
struct RawConfig {
    master_host: Option<String>,
    master_port_udp: Option<u16>,
    w_port_udp: Option<u16>,
    w_port_tcp: Option<u16>,
    thread_pool_size: Option<usize>,
    recent_add_window_secs: Option<u64>,
    threshold_neighbor_shift: Option<f64>,
    max_keys_to_shift: Option<usize>,
    loop_sleep_time_us: Option<u64>,
    log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub master_host: String,
    pub master_port_udp: u16,
    pub w_port_udp: u16,
    pub w_port_tcp: u16,
    pub thread_pool_size: usize,
    pub recent_add_window: Duration,
    pub threshold_neighbor_shift: f64,
    pub max_keys_to_shift: usize,
    pub loop_sleep_time: Duration,
    pub log_level: log::Level,
}

#[derive(Parser)]
#[command(about = env!("CARGO_PKG_DESCRIPTION"), version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    master_host: Option<String>,
    #[arg(long)]
    w_port_udp: Option<u16>,
    #[arg(long)]
    w_port_tcp: Option<u16>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let cli = Cli::parse();

        let mut raw: RawConfig = match &cli.config {
            Some(path) => {
                let text = read_to_string(path).map_err(|e| ConfigError(format!("reading {path}: {e}")))?;
                serde_json5::from_str(&text).map_err(|e| ConfigError(format!("parsing {path}: {e}")))?
            }
            None => RawConfig::default(),
        };

        if let Some(v) = cli.master_host {
            raw.master_host = Some(v);
        }
        if let Some(v) = cli.w_port_udp {
            raw.w_port_udp = Some(v);
        }
        if let Some(v) = cli.w_port_tcp {
            raw.w_port_tcp = Some(v);
        }

        Ok(Config {
            master_host: require(raw.master_host, "masterHost")?,
            master_port_udp: require(raw.master_port_udp, "masterPortUdp")?,
            w_port_udp: require(raw.w_port_udp, "wPortUdp")?,
            w_port_tcp: require(raw.w_port_tcp, "wPortTcp")?,
            thread_pool_size: raw.thread_pool_size.unwrap_or(ringkv_core::config::DEFAULT_THREAD_POOL_SIZE),
            recent_add_window: raw
                .recent_add_window_secs
                .map(Duration::from_secs)
                .unwrap_or(ringkv_core::config::DEFAULT_RECENT_ADD_WINDOW),
            threshold_neighbor_shift: raw.threshold_neighbor_shift.unwrap_or(ringkv_core::config::DEFAULT_SHIFT_THRESHOLD),
            max_keys_to_shift: raw.max_keys_to_shift.unwrap_or(ringkv_core::config::DEFAULT_MAX_KEYS_TO_SHIFT),
            loop_sleep_time: raw
                .loop_sleep_time_us
                .map(Duration::from_micros)
                .unwrap_or(ringkv_core::config::DEFAULT_LOOP_SLEEP),
            log_level: raw
                .log_level
                .as_deref()
                .map(|s| s.parse().map_err(|_| ConfigError(format!("invalid log level `{s}`"))))
                .transpose()?
                .unwrap_or(log::Level::Info),
        })
    }
}
