//! Shared configuration primitives (§6.2, §6.3).
//!
//! Each binary defines its own `serde::Deserialize` config struct with its
//! role-specific required fields; this module holds the defaults and
//! limits common to all three, plus the validation error type.

use std::time::Duration;

pub const MAX_UDP_PAYLOAD: usize = 6000;
pub const DEFAULT_LOOP_SLEEP: Duration = Duration::from_micros(100_000);
pub const DEFAULT_RECENT_ADD_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_SHIFT_THRESHOLD: f64 = 1.10;
pub const DEFAULT_MAX_KEYS_TO_SHIFT: usize = 10_000;
pub const DEFAULT_MAX_HOPS: u32 = 4;
pub const DEFAULT_THREAD_POOL_SIZE: usize = 10;

/// A missing required option or malformed value (§7 `ConfigError`); fatal
/// at startup.
#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Require a field read from `serde_json5`-deserialized optional config,
/// turning `None` into a named [`ConfigError`].
pub fn require<T>(field: Option<T>, name: &str) -> Result<T, ConfigError> {
    field.ok_or_else(|| ConfigError(format!("missing required option `{name}`")))
}
