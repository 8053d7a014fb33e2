//! Server configuration.

use flowdeck_sync_protocol::ConflictPolicy;
use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Maximum operations per bulk sync request.
    pub max_batch_operations: usize,
    /// Feed page size when the client sends none.
    pub default_feed_limit: u32,
    /// Upper bound on the feed page size.
    pub max_feed_limit: u32,
    /// Whether to require authentication.
    pub require_auth: bool,
    /// Secret key for token validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// How update conflicts are resolved.
    pub conflict_policy: ConflictPolicy,
    /// Timeout and retry policy for store calls.
    pub persistence: PersistencePolicy,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            request_timeout: Duration::from_secs(30),
            max_batch_operations: 500,
            default_feed_limit: 100,
            max_feed_limit: 1000,
            require_auth: false,
            auth_secret: None,
            conflict_policy: ConflictPolicy::default(),
            persistence: PersistencePolicy::default(),
        }
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the maximum number of operations per batch.
    pub fn with_max_batch_operations(mut self, max: usize) -> Self {
        self.max_batch_operations = max;
        self
    }

    /// Sets the default and maximum feed page sizes.
    pub fn with_feed_limits(mut self, default: u32, max: u32) -> Self {
        self.default_feed_limit = default;
        self.max_feed_limit = max;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the persistence policy.
    pub fn with_persistence(mut self, policy: PersistencePolicy) -> Self {
        self.persistence = policy;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}

/// Timeout and retry policy applied to every store call.
#[derive(Debug, Clone)]
pub struct PersistencePolicy {
    /// Deadline for a single attempt.
    pub call_timeout: Duration,
    /// Retry behavior for transient failures.
    pub retry: RetryConfig,
}

impl PersistencePolicy {
    /// Creates a policy with the given per-attempt deadline.
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            call_timeout,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for PersistencePolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // up to 25%
            let jitter = delay_secs * rand::thread_rng().gen_range(0.0..0.25);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
