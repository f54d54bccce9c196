//! Process-wide pool of long-lived HTTP clients.
//!
//! Clients are keyed by destination, timeout, connection limits, and a
//! fingerprint of the credential so distinct API keys never share
//! connections. `reqwest::Client` is an `Arc` handle internally, so one
//! pooled client serves every call site with the same key; dropping a
//! handle detaches the reference without closing the underlying pool.

use crate::error::Result;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

/// Identity of a pooled client: everything that affects connection reuse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    base_url: String,
    timeout_sec: u64,
    max_connections: usize,
    credential_fingerprint: String,
}

impl ClientKey {
    /// Build a key from the destination and transport settings. The API key
    /// is mixed in as a hash so the key itself never holds the secret.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        max_connections: usize,
        api_key: Option<&str>,
    ) -> Self {
        let credential_fingerprint = match api_key {
            Some(key) => {
                use std::fmt::Write;
                let digest = Sha256::digest(key.as_bytes());
                let mut hex = String::with_capacity(16);
                for byte in digest.iter().take(8) {
                    let _ = write!(hex, "{byte:02x}");
                }
                hex
            }
            None => String::new(),
        };
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_sec: timeout.as_secs(),
            max_connections,
            credential_fingerprint,
        }
    }
}

/// Transport settings applied when a pooled client is first created.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Total request timeout.
    pub timeout: Duration,
    /// Connect-phase timeout. Default 10 s.
    pub connect_timeout: Duration,
    /// Max idle (keep-alive) connections retained per host.
    pub max_idle_per_host: usize,
    /// Idle connection expiry.
    pub idle_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

fn pool() -> &'static Mutex<HashMap<ClientKey, Client>> {
    static POOL: OnceLock<Mutex<HashMap<ClientKey, Client>>> = OnceLock::new();
    POOL.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Acquire the pooled client for `key`, creating it under the pool lock on
/// first use (double-checked: callers race to the lock, the first creates).
pub fn acquire(key: &ClientKey, settings: &PoolSettings) -> Result<Client> {
    let mut guard = pool().lock().expect("http pool lock poisoned");
    if let Some(client) = guard.get(key) {
        return Ok(client.clone());
    }

    let client = Client::builder()
        .timeout(settings.timeout)
        .connect_timeout(settings.connect_timeout)
        .pool_max_idle_per_host(settings.max_idle_per_host)
        .pool_idle_timeout(settings.idle_timeout)
        .build()?;

    guard.insert(key.clone(), client.clone());
    tracing::debug!(base_url = %key.base_url, "http_pool_client_created");
    Ok(client)
}

/// Drop every pooled client. In-flight requests on cloned handles finish;
/// the next [`acquire`] recreates.
pub fn cleanup_all() {
    let mut guard = pool().lock().expect("http pool lock poisoned");
    let count = guard.len();
    guard.clear();
    tracing::debug!(clients_dropped = count, "http_pool_cleanup_all");
}
