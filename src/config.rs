//! Client configuration
//!
//! Defaults mirror the behaviour of the marketplace's browser client
//! (five reconnection attempts starting at one second). Values can be
//! overridden from a serialized config or from `MARKETCHAT_*` environment
//! variables.

use anyhow::{anyhow, Result};
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:5000";
pub const DEFAULT_SOCKET_URL: &str = "ws://localhost:5000/ws";

/// Bounded exponential backoff used between reconnect attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    /// Randomization factor in `[0, 1]` applied to every delay
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            max_attempts: Some(5),
            jitter: 0.5,
        }
    }
}

impl ReconnectPolicy {
    pub fn unbounded(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay_ms = initial.as_millis() as u64;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Whether attempt number `attempt` (1-based) may still be made
    pub fn allows(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt <= max,
            None => true,
        }
    }

    /// Un-jittered delay before attempt number `attempt` (1-based)
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .initial_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Delay before attempt `attempt`, randomized by `±jitter`
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the REST API (history, contacts, durable writes)
    pub api_base_url: String,
    /// URL of the live push channel
    pub socket_url: String,
    pub request_timeout_secs: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            request_timeout_secs: 10,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `MARKETCHAT_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("MARKETCHAT_API_URL") {
            self.api_base_url = url;
        }
        if let Some(url) = lookup("MARKETCHAT_SOCKET_URL") {
            self.socket_url = url;
        }
        if let Some(attempts) = lookup("MARKETCHAT_RECONNECT_ATTEMPTS") {
            // 0 means retry forever
            let attempts: u32 = attempts
                .parse()
                .map_err(|e| anyhow!("Invalid MARKETCHAT_RECONNECT_ATTEMPTS '{}': {}", attempts, e))?;
            self.reconnect.max_attempts = if attempts == 0 { None } else { Some(attempts) };
        }
        if let Some(delay) = lookup("MARKETCHAT_RECONNECT_DELAY_MS") {
            self.reconnect.initial_delay_ms = delay
                .parse()
                .map_err(|e| anyhow!("Invalid MARKETCHAT_RECONNECT_DELAY_MS '{}': {}", delay, e))?;
        }
        if let Some(delay) = lookup("MARKETCHAT_RECONNECT_MAX_DELAY_MS") {
            self.reconnect.max_delay_ms = delay
                .parse()
                .map_err(|e| anyhow!("Invalid MARKETCHAT_RECONNECT_MAX_DELAY_MS '{}': {}", delay, e))?;
        }
        debug!("Client configuration: {:?}", self);
        Ok(())
    }
}
