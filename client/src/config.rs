use clap::Parser;
use ringkv_core::config::{require, ConfigError};
use serde::Deserialize;
use std::fs::read_to_string;
use std::time::Duration;

/// `{masterHost, masterPortUdp, clientPortUdp, defWorkerHost,
/// defWorkerPortUdp, threadPoolSize, loopSleepTime, maxLookups,
/// maxInserts}` (§6.3 "Client").
#[derive(Deserialize, Debug, Default)]
struct RawConfig {
    master_host: Option<String>,
    master_port_udp: Option<u16>,
    client_port_udp: Option<u16>,
    def_worker_host: Option<String>,
    def_worker_port_udp: Option<u16>,
    thread_pool_size: Option<usize>,
    loop_sleep_time_us: Option<u64>,
    max_lookups: Option<usize>,
    max_inserts: Option<usize>,
    log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub master_host: String,
    pub master_port_udp: u16,
    pub client_port_udp: u16,
    pub def_worker_host: String,
    pub def_worker_port_udp: u16,
    pub thread_pool_size: usize,
    pub loop_sleep_time: Duration,
    /// Ceiling on concurrent outstanding inserts before `insert_req`
    /// blocks the caller (§4.9 "Limit the number of concurrent inserts").
    pub max_inserts: usize,
    pub max_lookups: usize,
    pub log_level: log::Level,
}

#[derive(Parser)]
#[command(about = env!("CARGO_PKG_DESCRIPTION"), version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[arg(long)]
    pub config: Option<String>,
    #[arg(long)]
    pub master_host: Option<String>,
    #[arg(long)]
    pub def_worker_host: Option<String>,
    #[arg(long)]
    pub def_worker_port_udp: Option<u16>,
    /// Run the built-in insert/lookup self-test instead of serving
    /// requests indefinitely: inserts keys `start..=end`, waits for
    /// completion, then looks every one of them back up and verifies the
    /// round trip.
    #[arg(long, value_names = ["START", "END"], num_args = 2)]
    pub bench: Option<Vec<u64>>,
}

impl Config {
    pub fn load_with_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut raw: RawConfig = match &cli.config {
            Some(path) => {
                let text = read_to_string(path).map_err(|e| ConfigError(format!("reading {path}: {e}")))?;
                serde_json5::from_str(&text).map_err(|e| ConfigError(format!("parsing {path}: {e}")))?
            }
            None => RawConfig::default(),
        };

        if let Some(v) = &cli.master_host {
            raw.master_host = Some(v.clone());
        }
        if let Some(v) = &cli.def_worker_host {
            raw.def_worker_host = Some(v.clone());
        }
        if let Some(v) = cli.def_worker_port_udp {
            raw.def_worker_port_udp = Some(v);
        }

        Ok(Config {
            master_host: require(raw.master_host, "masterHost")?,
            master_port_udp: require(raw.master_port_udp, "masterPortUdp")?,
            client_port_udp: raw.client_port_udp.unwrap_or(0),
            def_worker_host: require(raw.def_worker_host, "defWorkerHost")?,
            def_worker_port_udp: require(raw.def_worker_port_udp, "defWorkerPortUdp")?,
            thread_pool_size: raw.thread_pool_size.unwrap_or(ringkv_core::config::DEFAULT_THREAD_POOL_SIZE),
            loop_sleep_time: raw
                .loop_sleep_time_us
                .map(Duration::from_micros)
                .unwrap_or(ringkv_core::config::DEFAULT_LOOP_SLEEP),
            max_inserts: raw.max_inserts.unwrap_or(1000),
            max_lookups: raw.max_lookups.unwrap_or(1000),
            log_level: raw
                .log_level
                .as_deref()
                .map(|s| s.parse().map_err(|_| ConfigError(format!("invalid log level `{s}`"))))
                .transpose()?
                .unwrap_or(log::Level::Info),
        })
    }
}
