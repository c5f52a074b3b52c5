//! rostersync configuration (`config.toml`)
//!
//! Every section has defaults, so a missing file or a partial document is
//! valid. A handful of environment variables override file values.

use anyhow::{Context, Result};
use identitystore::ClientSettings;
use reconcile::{
    AdaptiveConfig, AttributeFormat, RetryPolicy, ServiceGroups, UsernameTemplate,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub aws: AwsConfig,
    pub groups: GroupsConfig,
    pub user_format: UserFormatConfig,
    pub retry: RetryConfig,
    pub performance: PerformanceConfig,
    pub timeouts: TimeoutsConfig,
    pub validation: ValidationConfig,
    pub logging: LoggingConfig,
    pub reports: ReportsConfig,
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub profile: String,
    pub region: String,
    pub identity_center: IdentityCenterConfig,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            profile: "default".to_string(),
            region: "us-east-1".to_string(),
            identity_center: IdentityCenterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityCenterConfig {
    /// Instance id (`ssoins-...`) or identity store id (`d-...`)
    pub instance_id: String,
}

/// Display names of the per-service groups
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupsConfig {
    pub kiro: String,
    pub qdev: String,
}

impl Default for GroupsConfig {
    fn default() -> Self {
        Self {
            kiro: "Group_KIRO_eu-central-1".to_string(),
            qdev: "Group_QDEV_eu-central-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserFormatConfig {
    pub username_template: String,
    /// `{employee_id}_{name}` display names instead of `{name} {name}`
    pub use_new_format: bool,
}

impl Default for UserFormatConfig {
    fn default() -> Self {
        Self {
            username_template: "{employee_id}@haier-saml.com".to_string(),
            use_new_format: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_factor: f64,
    /// Seconds before the first retry
    pub initial_delay: f64,
    /// Upper bound on a single backoff, in seconds
    pub max_delay: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_factor: 2.0,
            initial_delay: 1.0,
            max_delay: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_workers: usize,
    pub max_workers_min: usize,
    pub max_workers_max: usize,
    /// Progress bar refresh interval in milliseconds
    pub progress_update_interval: u64,
    pub adaptive: AdaptiveSettings,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            max_workers_min: 1,
            max_workers_max: 10,
            progress_update_interval: 100,
            adaptive: AdaptiveSettings::default(),
        }
    }
}

/// Tuning for the live concurrency limit under throttling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveSettings {
    /// Distinct throttled actions within the window that trigger a downgrade
    pub throttle_threshold: usize,
    pub window_secs: u64,
    pub cooldown_secs: u64,
    /// Consecutive clean actions needed before scaling back up
    pub recovery_successes: usize,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        let defaults = AdaptiveConfig::default();
        Self {
            throttle_threshold: defaults.throttle_threshold,
            window_secs: defaults.window.as_secs(),
            cooldown_secs: defaults.cooldown.as_secs(),
            recovery_successes: defaults.recovery_successes,
        }
    }
}

/// Timeouts in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub report_generation: u64,
    pub user_operation: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            report_generation: 300,
            user_operation: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Email domains (matched as suffixes) that raise no warning; empty
    /// disables the check
    pub allowed_email_domains: Vec<String>,
    pub max_users_warning: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            allowed_email_domains: [
                "haier.com",
                "haier1.com",
                "haier2.com",
                "haier3.com",
                "haiergroup.com",
                "haier.net",
                "casarte.com",
                "leader.com.cn",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_users_warning: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    pub directory: String,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            directory: "reports".to_string(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `config.toml` is used when
    /// present and defaults otherwise. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                log::debug!("No {DEFAULT_CONFIG_FILE} found, using defaults");
                Self::default()
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `AWS_PROFILE`, `AWS_REGION`, `IAM_INSTANCE_ID` and `LOG_LEVEL`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(profile) = var("AWS_PROFILE") {
            self.aws.profile = profile;
        }
        if let Some(region) = var("AWS_REGION") {
            self.aws.region = region;
        }
        if let Some(instance_id) = var("IAM_INSTANCE_ID") {
            self.aws.identity_center.instance_id = instance_id;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Every problem with the configuration; empty when valid
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.aws.profile.trim().is_empty() {
            problems.push("aws.profile must not be empty".to_string());
        }
        if self.aws.region.trim().is_empty() {
            problems.push("aws.region must not be empty".to_string());
        }
        if self.groups.kiro.trim().is_empty() {
            problems.push("groups.kiro must not be empty".to_string());
        }
        if self.groups.qdev.trim().is_empty() {
            problems.push("groups.qdev must not be empty".to_string());
        }
        if let Err(e) = UsernameTemplate::parse(&self.user_format.username_template) {
            problems.push(format!("user_format.username_template: {e}"));
        }
        if self.retry.max_attempts < 1 {
            problems.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.backoff_factor < 1.0 {
            problems.push("retry.backoff_factor must be at least 1.0".to_string());
        }
        if self.retry.initial_delay < 0.0 || self.retry.max_delay < 0.0 {
            problems.push("retry delays must not be negative".to_string());
        }

        let perf = &self.performance;
        if perf.max_workers_min < reconcile::MIN_CONCURRENCY
            || perf.max_workers_max > reconcile::MAX_CONCURRENCY
            || perf.max_workers_min > perf.max_workers_max
        {
            problems.push(format!(
                "performance.max_workers_min/max must satisfy {} <= min <= max <= {}",
                reconcile::MIN_CONCURRENCY,
                reconcile::MAX_CONCURRENCY
            ));
        } else if !(perf.max_workers_min..=perf.max_workers_max).contains(&perf.max_workers) {
            problems.push(format!(
                "performance.max_workers must be between {} and {}",
                perf.max_workers_min, perf.max_workers_max
            ));
        }
        if perf.adaptive.throttle_threshold == 0 {
            problems.push("performance.adaptive.throttle_threshold must be at least 1".to_string());
        }

        if self.timeouts.user_operation == 0 || self.timeouts.report_generation == 0 {
            problems.push("timeouts must be at least 1 second".to_string());
        }

        problems
    }

    // ========================================================================
    // Derived settings
    // ========================================================================

    /// Clamp a requested worker count to the configured bounds
    pub fn workers(&self, requested: Option<usize>) -> usize {
        let perf = &self.performance;
        requested
            .unwrap_or(perf.max_workers)
            .clamp(perf.max_workers_min, perf.max_workers_max)
    }

    pub fn username_template(&self) -> Result<UsernameTemplate> {
        Ok(UsernameTemplate::parse(&self.user_format.username_template)?)
    }

    pub fn attribute_format(&self) -> AttributeFormat {
        if self.user_format.use_new_format {
            AttributeFormat::Modern
        } else {
            AttributeFormat::Legacy
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_delay: Duration::from_secs_f64(self.retry.max_delay.max(0.0)),
            ..RetryPolicy::new(
                self.retry.max_attempts,
                Duration::from_secs_f64(self.retry.initial_delay.max(0.0)),
                self.retry.backoff_factor,
            )
        }
    }

    pub fn adaptive(&self) -> AdaptiveConfig {
        let settings = &self.performance.adaptive;
        AdaptiveConfig {
            floor: self.performance.max_workers_min.max(1),
            throttle_threshold: settings.throttle_threshold,
            window: Duration::from_secs(settings.window_secs),
            cooldown: Duration::from_secs(settings.cooldown_secs),
            recovery_successes: settings.recovery_successes,
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            timeout: Duration::from_secs(self.timeouts.user_operation),
            ..ClientSettings::new(
                &self.aws.profile,
                &self.aws.region,
                &self.aws.identity_center.instance_id,
            )
        }
    }

    /// Group display names; ids are resolved against the directory
    pub fn group_names(&self) -> ServiceGroups {
        ServiceGroups {
            kiro: self.groups.kiro.clone(),
            qdev: self.groups.qdev.clone(),
        }
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.report_generation)
    }

    /// Report directory with `~` and variables expanded
    pub fn reports_dir(&self) -> PathBuf {
        match shellexpand::full(&self.reports.directory) {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(_) => PathBuf::from(shellexpand::tilde(&self.reports.directory).as_ref()),
        }
    }

    /// Log level from `logging.level`, defaulting to info
    pub fn log_level(&self) -> log::LevelFilter {
        self.logging
            .level
            .trim()
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }
}

/// Commented default configuration written by `init-config`
pub fn default_config_toml() -> String {
    let defaults = Config::default();
    let domains = defaults
        .validation
        .allowed_email_domains
        .iter()
        .map(|d| format!("\"{d}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"# rostersync configuration

[aws]
profile = "{profile}"
region = "{region}"

[aws.identity_center]
# Instance id (ssoins-...) or identity store id (d-...); empty uses the first instance
instance_id = ""

# Display names of the service groups
[groups]
kiro = "{kiro}"
qdev = "{qdev}"

[user_format]
# Must contain {{employee_id}} exactly once
username_template = "{template}"
# true: display name "{{employee_id}}_{{name}}"; false: "{{name}} {{name}}"
use_new_format = true

[retry]
max_attempts = 3
backoff_factor = 2.0
initial_delay = 1.0
max_delay = 60.0

[performance]
max_workers = 5
max_workers_min = 1
max_workers_max = 10
progress_update_interval = 100

[performance.adaptive]
throttle_threshold = 3
window_secs = 30
cooldown_secs = 30
recovery_successes = 20

# Seconds
[timeouts]
report_generation = 300
user_operation = 30

[validation]
allowed_email_domains = [{domains}]
max_users_warning = 1000

[logging]
level = "info"

[reports]
directory = "reports"
"#,
        profile = defaults.aws.profile,
        region = defaults.aws.region,
        kiro = defaults.groups.kiro,
        qdev = defaults.groups.qdev,
        template = defaults.user_format.username_template,
    )
}
