use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

const ENV_PRODUCTION: &str = "production";

#[derive(Debug, Deserialize, Clone)]
#[allow(unused)]
pub struct Logger {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for Logger {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// When a container image is rewritten to its mirrored counterpart.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageSwapPolicy {
    /// Rewrite regardless of the mirror state.
    Always,
    /// Rewrite only when the target already exists in the mirror registry.
    Exists,
}

/// How a scheduled image copy relates to the admission that requested it.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageCopyPolicy {
    /// Enqueue the copy and return immediately.
    Delayed,
    /// Enqueue the copy and block until it completes.
    Immediate,
    /// Run the copy on the caller's stack, bypassing the pool.
    Force,
}

/// Behavior of a `delayed` submission when the copy queue is saturated.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueFullPolicy {
    /// Backpressure the admission until a slot frees up.
    Block,
    /// Drop the task and record a metric.
    Drop,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[allow(unused)]
pub struct Source {
    /// JMESPath predicates over `{obj, container}`; the first one returning
    /// `true` excludes the container from processing.
    #[serde(default)]
    pub filters: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[allow(unused)]
pub struct Repository {
    #[serde(default = "default_tag_mutability")]
    pub tag_mutability: String,
    #[serde(default)]
    pub scan_on_push: bool,
}

impl Default for Repository {
    fn default() -> Self {
        Self {
            tag_mutability: default_tag_mutability(),
            scan_on_push: false,
        }
    }
}

fn default_tag_mutability() -> String {
    "MUTABLE".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[allow(unused)]
pub struct Target {
    pub account_id: String,
    pub region: String,
    #[serde(default)]
    pub repository: Repository,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

fn default_cache_capacity() -> u64 {
    2048
}

#[derive(Debug, Deserialize, Clone)]
#[allow(unused)]
pub struct CopySettings {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_queue_full_policy")]
    pub queue_full_policy: QueueFullPolicy,
    /// Bound on `immediate`/`force` waits; align with the API server webhook
    /// timeout.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl Default for CopySettings {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            queue_size: default_queue_size(),
            queue_full_policy: default_queue_full_policy(),
            timeout_seconds: None,
        }
    }
}

fn default_max_workers() -> usize {
    100
}

fn default_queue_size() -> usize {
    1000
}

fn default_queue_full_policy() -> QueueFullPolicy {
    QueueFullPolicy::Block
}

#[derive(Debug, Deserialize, Clone)]
#[allow(unused)]
pub struct Tls {
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Debug, Deserialize, Clone)]
#[allow(unused)]
pub struct Prometheus {
    pub enable: bool,
    #[serde(default = "default_prometheus_port")]
    pub port: u16,
}

fn default_prometheus_port() -> u16 {
    8081
}

#[derive(Debug, Deserialize, Clone)]
#[allow(unused)]
pub struct Settings {
    #[serde(default)]
    pub logger: Logger,
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default)]
    pub dry_run: bool,
    pub tls: Option<Tls>,
    #[serde(default)]
    pub source: Source,
    pub target: Target,
    #[serde(default = "default_image_swap_policy")]
    pub image_swap_policy: ImageSwapPolicy,
    #[serde(default = "default_image_copy_policy")]
    pub image_copy_policy: ImageCopyPolicy,
    #[serde(default)]
    pub copy: CopySettings,
    pub prometheus: Option<Prometheus>,
}

fn default_listen_address() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_image_swap_policy() -> ImageSwapPolicy {
    ImageSwapPolicy::Exists
}

fn default_image_copy_policy() -> ImageCopyPolicy {
    ImageCopyPolicy::Delayed
}

impl Settings {
    pub fn mode() -> String {
        env::var("SWAPPER_ENV").unwrap_or_else(|_| ENV_PRODUCTION.into())
    }

    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = Self::mode();
        let config_builder = Config::builder();
        config_builder
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::default().try_parsing(true).separator("__"))
            .build()?
            .try_deserialize()
    }
}
