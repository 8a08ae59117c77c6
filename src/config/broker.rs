//! Broker and model-provider configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable holding the provider credential.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Largest accepted wait, deadline, or sweep interval.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(86_400);

/// Largest accepted result retention.
pub const MAX_RESULT_TTL: Duration = Duration::from_secs(86_400 * 30);

/// Model provider settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider API key.
    #[serde(default)]
    pub api_key: String,
    /// Provider base URL, without the `/v1/...` path.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model name sent with each request.
    #[serde(default = "default_model")]
    pub model: String,
    /// Client-side HTTP timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// Keeps the credential out of logs.
impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ModelConfig {
    /// Client-side request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate model configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.api_key.trim().is_empty() {
            return Err(format!("{API_KEY_ENV} is not set"));
        }
        if self.base_url.trim().is_empty() {
            return Err("base_url must not be empty".into());
        }
        if self.model.trim().is_empty() {
            return Err("model must not be empty".into());
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Socket address the HTTP server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Number of workers (bound on concurrent model calls).
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Work queue capacity.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    /// How long ingress waits for a queue slot before rejecting, in milliseconds.
    /// Zero rejects immediately.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    /// Retrieval wait deadline in milliseconds.
    #[serde(default = "default_retrieval_timeout_ms")]
    pub retrieval_timeout_ms: u64,
    /// Pool-level deadline for one model call, in milliseconds.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// How long a published result stays readable, in seconds.
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,
    /// Interval between expiry sweeps, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Model provider settings.
    #[serde(default)]
    pub model: ModelConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            worker_count: default_worker_count(),
            max_queue_depth: default_max_queue_depth(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            retrieval_timeout_ms: default_retrieval_timeout_ms(),
            task_timeout_ms: default_task_timeout_ms(),
            result_ttl_secs: default_result_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            model: ModelConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count.
    #[must_use]
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the work queue capacity.
    #[must_use]
    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Set how long ingress waits for a queue slot.
    #[must_use]
    pub fn with_enqueue_timeout(mut self, wait: Duration) -> Self {
        self.enqueue_timeout_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the retrieval wait deadline.
    #[must_use]
    pub fn with_retrieval_timeout(mut self, timeout: Duration) -> Self {
        self.retrieval_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the pool-level model call deadline.
    #[must_use]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set result retention.
    #[must_use]
    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl_secs = ttl.as_secs();
        self
    }

    /// Set the listen address.
    #[must_use]
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Set the provider API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.model.api_key = api_key.into();
        self
    }

    /// Enqueue wait window.
    #[must_use]
    pub const fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    /// Retrieval wait deadline.
    #[must_use]
    pub const fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval_timeout_ms)
    }

    /// Pool-level model call deadline.
    #[must_use]
    pub const fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    /// Result retention.
    #[must_use]
    pub const fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    /// Expiry sweep interval.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Validate the broker settings, excluding the model credential.
    ///
    /// Brokers built around a custom model client need no provider settings.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.retrieval_timeout_ms == 0 {
            return Err("retrieval_timeout_ms must be greater than 0".into());
        }
        if self.task_timeout_ms == 0 {
            return Err("task_timeout_ms must be greater than 0".into());
        }
        if self.result_ttl_secs == 0 {
            return Err("result_ttl_secs must be greater than 0".into());
        }
        if self.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs must be greater than 0".into());
        }
        let limit_ms = MAX_TIMEOUT.as_millis();
        for (name, value) in [
            ("enqueue_timeout_ms", self.enqueue_timeout_ms),
            ("retrieval_timeout_ms", self.retrieval_timeout_ms),
            ("task_timeout_ms", self.task_timeout_ms),
        ] {
            if u128::from(value) > limit_ms {
                return Err(format!("{name} must be at most {limit_ms}"));
            }
        }
        if self.sweep_interval_secs > MAX_TIMEOUT.as_secs() {
            return Err(format!(
                "sweep_interval_secs must be at most {}",
                MAX_TIMEOUT.as_secs()
            ));
        }
        if self.result_ttl_secs > MAX_RESULT_TTL.as_secs() {
            return Err(format!(
                "result_ttl_secs must be at most {}",
                MAX_RESULT_TTL.as_secs()
            ));
        }
        if self.listen_addr.trim().is_empty() {
            return Err("listen_addr must not be empty".into());
        }
        Ok(())
    }

    /// Validate broker and model settings together.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate_with_model(&self) -> Result<(), String> {
        self.validate()?;
        self.model.validate().map_err(|e| format!("model: {e}"))
    }

    /// Parse broker configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from environment variables over the defaults.
    ///
    /// The provider API key is required.
    ///
    /// # Errors
    ///
    /// Returns a message if a variable does not parse or validation fails.
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        let cfg = Self {
            listen_addr: env::var("QUERY_BROKER_ADDR").unwrap_or(defaults.listen_addr),
            worker_count: env_or("QUERY_BROKER_WORKERS", defaults.worker_count)?,
            max_queue_depth: env_or("QUERY_BROKER_QUEUE_DEPTH", defaults.max_queue_depth)?,
            enqueue_timeout_ms: env_or("QUERY_BROKER_ENQUEUE_TIMEOUT_MS", defaults.enqueue_timeout_ms)?,
            retrieval_timeout_ms: env_or(
                "QUERY_BROKER_RETRIEVAL_TIMEOUT_MS",
                defaults.retrieval_timeout_ms,
            )?,
            task_timeout_ms: env_or("QUERY_BROKER_TASK_TIMEOUT_MS", defaults.task_timeout_ms)?,
            result_ttl_secs: env_or("QUERY_BROKER_RESULT_TTL_SECS", defaults.result_ttl_secs)?,
            sweep_interval_secs: env_or(
                "QUERY_BROKER_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval_secs,
            )?,
            model: ModelConfig {
                api_key: env::var(API_KEY_ENV).unwrap_or_default(),
                base_url: env::var("OPENAI_BASE_URL").unwrap_or(defaults.model.base_url),
                model: env::var("OPENAI_MODEL").unwrap_or(defaults.model.model),
                request_timeout_secs: env_or(
                    "QUERY_BROKER_MODEL_TIMEOUT_SECS",
                    defaults.model.request_timeout_secs,
                )?,
            },
        };
        cfg.validate_with_model()?;
        Ok(cfg)
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{name} has invalid value `{raw}`")),
        Err(_) => Ok(default),
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".into()
}

const fn default_worker_count() -> usize {
    3
}

const fn default_max_queue_depth() -> usize {
    10
}

const fn default_enqueue_timeout_ms() -> u64 {
    250
}

const fn default_retrieval_timeout_ms() -> u64 {
    15_000
}

const fn default_task_timeout_ms() -> u64 {
    30_000
}

const fn default_result_ttl_secs() -> u64 {
    600
}

const fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_base_url() -> String {
    "https://api.openai.com".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

const fn default_request_timeout_secs() -> u64 {
    10
}
