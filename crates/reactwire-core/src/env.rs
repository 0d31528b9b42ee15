//! Environment overrides for configuration structs
//!
//! All reactwire knobs are read as `REACTWIRE_*` variables by the
//! `from_env()` constructors; nothing else in the crates touches the
//! environment.
//!
//! ```ignore
//! use reactwire_core::env::{env_get, env_get_bool, env_get_millis};
//!
//! let chunk: usize = env_get("REACTWIRE_CHUNK_SIZE", 1024);
//! let compress = env_get_bool("REACTWIRE_COMPRESS", false);
//! let idle = env_get_millis("REACTWIRE_CLIENT_TIMEOUT_MS"); // 0 or unset -> None
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, falling back to `default` when unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T` if it is set and well formed.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean switch.
///
/// `1/true/yes/on` enable, `0/false/no/off` disable (case-insensitive).
/// Anything else, including unset, yields `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Millisecond duration where `0` means "disabled".
#[inline]
pub fn env_get_millis(key: &str) -> Option<Duration> {
    match env_get_opt::<u64>(key) {
        Some(0) | None => None,
        Some(ms) => Some(Duration::from_millis(ms)),
    }
}
