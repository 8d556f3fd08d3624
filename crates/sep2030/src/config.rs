// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Engine configuration - single source of truth for timeouts, buffer
//! sizes, and the transport retry/backoff policy.

use std::time::Duration;

/// Default HTTPS port for IEEE 2030.5 servers.
pub const DEFAULT_PORT: u16 = 443;

/// Codec read/write buffer size in bytes.
///
/// Must exceed the longest single XML or binary token in the schema the
/// engine is configured with; this is the only hard requirement the
/// incremental codec places on the caller.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Floor applied to any server-supplied `pollRate`, in seconds.
pub const MIN_POLL_RATE_SECS: u32 = 5;

/// Mandatory IEEE 2030.5 cipher suite name (informational; the concrete
/// `rustls` suite is selected in `net::connection`).
pub const MANDATORY_CIPHER_SUITE: &str = "TLS_ECDHE_ECDSA_WITH_AES_128_CCM_8";

/// Exponential backoff policy for re-establishing a lost connection:
/// a base delay doubled per attempt, capped, with jitter to avoid a
/// thundering herd of reconnecting devices.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Delay before the first reconnect attempt.
    pub base: Duration,
    /// Upper bound on the backoff delay.
    pub max: Duration,
    /// Number of attempts before the stub's pipeline is failed outright.
    pub max_retries: u32,
    /// Jitter fraction in `[0.0, 1.0]` applied to each computed delay.
    pub jitter_factor: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(60),
            max_retries: 8,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    /// Compute the backoff delay for the given attempt number (0-based),
    /// before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scale = 1u64.checked_shl(attempt.min(31)).unwrap_or(u64::MAX);
        let ms = self.base.as_millis() as u64;
        let delay_ms = ms.saturating_mul(scale).min(self.max.as_millis() as u64);
        Duration::from_millis(delay_ms)
    }
}

/// Top level engine configuration, passed in at construction and never
/// mutated through an ambient global.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Size of each connection's fixed read/write buffer.
    pub buffer_size: usize,
    /// Idle timeout after which a connection with no traffic is closed.
    pub idle_timeout: Duration,
    /// Backoff policy for transport reconnection.
    pub retry: RetryConfig,
    /// Floor applied to server-supplied poll rates.
    pub min_poll_rate_secs: u32,
    /// DNS-SD service types the engine registers interest in at startup.
    pub service_types: Vec<&'static str>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_timeout: Duration::from_secs(120),
            retry: RetryConfig::default(),
            min_poll_rate_secs: MIN_POLL_RATE_SECS,
            service_types: vec![
                "_smartenergy._tcp",
                "_bill._sub._smartenergy._tcp",
                "_dr._sub._smartenergy._tcp",
                "_derp._sub._smartenergy._tcp",
                "_file._sub._smartenergy._tcp",
                "_msg._sub._smartenergy._tcp",
                "_ppy._sub._smartenergy._tcp",
                "_rsps._sub._smartenergy._tcp",
                "_tp._sub._smartenergy._tcp",
                "_tm._sub._smartenergy._tcp",
                "_upt._sub._smartenergy._tcp",
                "_edev._sub._smartenergy._tcp",
                "_mup._sub._smartenergy._tcp",
                "_sdev._sub._smartenergy._tcp",
            ],
        }
    }
}
