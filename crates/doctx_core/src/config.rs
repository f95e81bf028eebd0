//! Cluster and transaction configuration.

use crate::durability::DurabilityLevel;
use crate::error::{CoreError, CoreResult};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Configuration for opening a cluster.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Number of nodes. Every bucket spreads its keys over all of them.
    pub nodes: usize,

    /// Replica copies kept for every document, in addition to the active one.
    pub replicas: usize,

    /// Directory for node journals. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,

    /// Whether unknown buckets are created on first use.
    pub create_buckets: bool,

    /// User accepted by [`crate::Cluster::connect`].
    pub username: String,

    /// Password accepted by [`crate::Cluster::connect`].
    pub password: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: 1,
            replicas: 0,
            data_dir: None,
            create_buckets: true,
            username: "Administrator".to_string(),
            password: "password".to_string(),
        }
    }
}

impl ClusterConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of nodes.
    #[must_use]
    pub fn nodes(mut self, nodes: usize) -> Self {
        self.nodes = nodes;
        self
    }

    /// Sets the number of replicas per document.
    #[must_use]
    pub fn replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    /// Stores node journals under `dir`.
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets whether unknown buckets are created on first use.
    #[must_use]
    pub fn create_buckets(mut self, value: bool) -> Self {
        self.create_buckets = value;
        self
    }

    /// Sets the accepted credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Checks that the topology is usable.
    pub fn validate(&self) -> CoreResult<()> {
        if self.nodes == 0 {
            return Err(CoreError::invalid_argument("a cluster needs at least one node"));
        }
        if self.nodes > usize::from(u16::MAX) {
            return Err(CoreError::invalid_argument(format!(
                "too many nodes: {}",
                self.nodes
            )));
        }
        if self.replicas >= self.nodes {
            return Err(CoreError::invalid_argument(format!(
                "{} replicas need at least {} nodes, cluster has {}",
                self.replicas,
                self.replicas + 1,
                self.nodes
            )));
        }
        Ok(())
    }
}

/// Configuration for [`crate::Transactions`].
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Durability level of every write the transaction makes, including its
    /// transaction record.
    pub durability_level: DurabilityLevel,

    /// Total time a transaction may spend across all of its attempts.
    pub expiration: Duration,

    /// Backoff between attempts.
    pub retry: RetryPolicy,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            durability_level: DurabilityLevel::Majority,
            expiration: Duration::from_secs(15),
            retry: RetryPolicy::default(),
        }
    }
}

impl TransactionConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the durability level.
    #[must_use]
    pub const fn durability_level(mut self, level: DurabilityLevel) -> Self {
        self.durability_level = level;
        self
    }

    /// Sets the expiration.
    #[must_use]
    pub const fn expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Checks the expiration and backoff settings.
    pub fn validate(&self) -> CoreResult<()> {
        if self.expiration.is_zero() {
            return Err(CoreError::invalid_argument("expiration must be positive"));
        }
        if Instant::now().checked_add(self.expiration).is_none() {
            return Err(CoreError::invalid_argument(format!(
                "expiration {:?} is out of range",
                self.expiration
            )));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(CoreError::invalid_argument(format!(
                "retry multiplier must be at least 1, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(CoreError::invalid_argument(
                "initial retry delay exceeds the maximum",
            ));
        }
        Ok(())
    }
}

/// Exponential backoff between transaction attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Whether delays are randomised to between half and all of their value.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets whether to add jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after the given failed attempt (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());
        let factor = if self.jitter && capped > 0.0 {
            use rand::Rng;
            rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            1.0
        };
        Duration::from_secs_f64(capped * factor)
    }
}
