//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
///
/// Built once at startup and passed by reference into the policy engine,
/// executor and alert dispatcher. Nothing below reads the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub vultisig: VultisigConfig,
    #[serde(default)]
    pub conway: ConwayConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Transfer policy thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Master switch. When off every request is auto-approved.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Recipients outside the allowlist need a human decision
    #[serde(default = "default_true")]
    pub require_allowlist: bool,

    /// Allowlisted recipient addresses (compared case-insensitively)
    #[serde(default)]
    pub allowlist: Vec<String>,

    /// Balance that must remain after the transfer
    #[serde(default = "default_min_reserve_cents")]
    pub min_reserve_cents: i64,

    /// Largest transfer that may execute without a human
    #[serde(default = "default_auto_approve_max_cents")]
    pub auto_approve_max_cents: i64,

    /// Transfers above this are always rejected
    #[serde(default = "default_hard_per_transfer_cents")]
    pub hard_per_transfer_cents: i64,

    /// Trailing 24h spend above this needs a human
    #[serde(default = "default_hard_daily_limit_cents")]
    pub hard_daily_limit_cents: i64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_allowlist: true,
            allowlist: Vec::new(),
            min_reserve_cents: default_min_reserve_cents(),
            auto_approve_max_cents: default_auto_approve_max_cents(),
            hard_per_transfer_cents: default_hard_per_transfer_cents(),
            hard_daily_limit_cents: default_hard_daily_limit_cents(),
        }
    }
}

/// Execution backend selector
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Platform credit-transfer API
    #[default]
    Conway,
    /// Wallet-signing broker
    Vultisig,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Conway => write!(f, "conway"),
            BackendKind::Vultisig => write!(f, "vultisig"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionConfig {
    /// Execute intents as soon as they reach `approved`
    #[serde(default)]
    pub auto_execute_on_approval: bool,

    #[serde(default)]
    pub backend: BackendKind,
}

/// Vultisig broker transport
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BrokerMode {
    /// Drop signed-request files for an external signer
    #[default]
    Outbox,
    /// POST to an HTTP signing service
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VultisigConfig {
    #[serde(default)]
    pub mode: BrokerMode,

    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: PathBuf,

    #[serde(default)]
    pub broker_url: Option<String>,

    #[serde(default)]
    pub broker_token: Option<String>,

    #[serde(default = "default_broker_timeout_ms")]
    pub timeout_ms: u64,

    /// Policy profile name forwarded to the signer
    #[serde(default = "default_vault_policy_profile")]
    pub vault_policy_profile: String,
}

impl Default for VultisigConfig {
    fn default() -> Self {
        Self {
            mode: BrokerMode::Outbox,
            outbox_dir: default_outbox_dir(),
            broker_url: None,
            broker_token: None,
            timeout_ms: default_broker_timeout_ms(),
            vault_policy_profile: default_vault_policy_profile(),
        }
    }
}

/// Platform credit API
#[derive(Debug, Clone, Deserialize)]
pub struct ConwayConfig {
    #[serde(default = "default_conway_api_url")]
    pub api_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_conway_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ConwayConfig {
    fn default() -> Self {
        Self {
            api_url: default_conway_api_url(),
            api_key: String::new(),
            timeout_ms: default_conway_timeout_ms(),
        }
    }
}

/// Chat alerts
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub bot_token: String,

    #[serde(default)]
    pub chat_id: String,

    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,

    /// Chain name used to pick a block-explorer template
    #[serde(default = "default_chain")]
    pub chain: String,

    /// Explicit explorer template, `{tx}` is replaced with the reference
    #[serde(default)]
    pub explorer_tx_template: Option<String>,

    #[serde(default = "default_alert_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_alert_retry_initial_ms")]
    pub retry_initial_ms: u64,

    #[serde(default = "default_alert_retry_max_elapsed_ms")]
    pub retry_max_elapsed_ms: u64,
}

impl AlertConfig {
    /// Alerts only run when switched on and fully credentialed
    pub fn is_active(&self) -> bool {
        self.enabled && !self.bot_token.trim().is_empty() && !self.chat_id.trim().is_empty()
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            chat_id: String::new(),
            api_base: default_telegram_api_base(),
            chain: default_chain(),
            explorer_tx_template: None,
            queue_capacity: default_alert_queue_capacity(),
            retry_initial_ms: default_alert_retry_initial_ms(),
            retry_max_elapsed_ms: default_alert_retry_max_elapsed_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// JSON key-value file holding intents, ledger and alert bookkeeping
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_min_reserve_cents() -> i64 {
    1_000
}

fn default_auto_approve_max_cents() -> i64 {
    500
}

fn default_hard_per_transfer_cents() -> i64 {
    5_000
}

fn default_hard_daily_limit_cents() -> i64 {
    10_000
}

fn default_outbox_dir() -> PathBuf {
    PathBuf::from("data/vultisig-outbox")
}

fn default_broker_timeout_ms() -> u64 {
    15_000
}

fn default_vault_policy_profile() -> String {
    "default".to_string()
}

fn default_conway_api_url() -> String {
    "https://api.conway.tech".to_string()
}

fn default_conway_timeout_ms() -> u64 {
    30_000
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_chain() -> String {
    "base".to_string()
}

fn default_alert_queue_capacity() -> usize {
    256
}

fn default_alert_retry_initial_ms() -> u64 {
    500
}

fn default_alert_retry_max_elapsed_ms() -> u64 {
    30_000
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/state.json")
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix GUARD_)
            .add_source(
                config::Environment::with_prefix("GUARD")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("policy.allowlist")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let policy = &self.policy;

        if policy.min_reserve_cents < 0 {
            anyhow::bail!("min_reserve_cents cannot be negative");
        }

        if policy.hard_per_transfer_cents <= 0 {
            anyhow::bail!("hard_per_transfer_cents must be positive");
        }

        if policy.hard_daily_limit_cents <= 0 {
            anyhow::bail!("hard_daily_limit_cents must be positive");
        }

        if policy.auto_approve_max_cents > policy.hard_per_transfer_cents {
            anyhow::bail!(
                "auto_approve_max_cents ({}) cannot exceed hard_per_transfer_cents ({})",
                policy.auto_approve_max_cents,
                policy.hard_per_transfer_cents
            );
        }

        if self.vultisig.mode == BrokerMode::Http {
            let raw = self
                .vultisig
                .broker_url
                .as_deref()
                .filter(|u| !u.trim().is_empty())
                .context("vultisig.broker_url is required in http mode")?;
            url::Url::parse(raw)
                .with_context(|| format!("Invalid vultisig.broker_url: {}", raw))?;
        }

        if self.vultisig.timeout_ms == 0 {
            anyhow::bail!("vultisig.timeout_ms must be positive");
        }

        if let Some(template) = &self.alerts.explorer_tx_template {
            if !template.contains("{tx}") {
                anyhow::bail!("alerts.explorer_tx_template must contain {{tx}}");
            }
        }

        if self.alerts.enabled && !self.alerts.is_active() {
            tracing::warn!("Alerts enabled but bot_token or chat_id is missing - alerts disabled");
        }

        if self.policy.enabled
            && self.policy.require_allowlist
            && self.policy.allowlist.is_empty()
        {
            tracing::warn!(
                "Allowlist required but empty - every transfer will need human approval"
            );
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Policy:
    enabled: {}
    require_allowlist: {}
    allowlist: {} address(es)
    min_reserve: {}
    auto_approve_max: {}
    hard_per_transfer: {}
    hard_daily_limit: {}
  Execution:
    backend: {}
    auto_execute_on_approval: {}
  Vultisig:
    mode: {:?}
    outbox_dir: {}
    broker_url: {}
    broker_token: {}
    vault_policy_profile: {}
  Conway:
    api_url: {}
    api_key: {}
  Alerts:
    enabled: {}
    chain: {}
    bot_token: {}
    chat_id: {}
  Storage:
    path: {}
"#,
            self.policy.enabled,
            self.policy.require_allowlist,
            self.policy.allowlist.len(),
            crate::alerts::format_cents(self.policy.min_reserve_cents),
            crate::alerts::format_cents(self.policy.auto_approve_max_cents),
            crate::alerts::format_cents(self.policy.hard_per_transfer_cents),
            crate::alerts::format_cents(self.policy.hard_daily_limit_cents),
            self.execution.backend,
            self.execution.auto_execute_on_approval,
            self.vultisig.mode,
            self.vultisig.outbox_dir.display(),
            self.vultisig.broker_url.as_deref().map(mask_url).unwrap_or_else(|| "(not set)".into()),
            mask_secret(self.vultisig.broker_token.as_deref().unwrap_or_default()),
            self.vultisig.vault_policy_profile,
            mask_url(&self.conway.api_url),
            mask_secret(&self.conway.api_key),
            self.alerts.enabled,
            self.alerts.chain,
            mask_secret(&self.alerts.bot_token),
            mask_secret(&self.alerts.chat_id),
            self.storage.path.display(),
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

fn mask_secret(secret: &str) -> &'static str {
    if secret.is_empty() {
        "(not set)"
    } else {
        "***"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.policy.enabled);
        assert!(config.policy.require_allowlist);
        assert_eq!(config.execution.backend, BackendKind::Conway);
        assert_eq!(config.vultisig.mode, BrokerMode::Outbox);
        assert!(!config.alerts.is_active());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        std::fs::write(
            &path,
            r#"
[policy]
allowlist = ["0xAbC0000000000000000000000000000000000001"]
auto_approve_max_cents = 100

[execution]
backend = "vultisig"
auto_execute_on_approval = true

[vultisig]
mode = "http"
broker_url = "http://127.0.0.1:8080/sign"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.policy.allowlist.len(), 1);
        assert_eq!(config.policy.auto_approve_max_cents, 100);
        assert_eq!(config.execution.backend, BackendKind::Vultisig);
        assert!(config.execution.auto_execute_on_approval);
        assert_eq!(config.vultisig.mode, BrokerMode::Http);
    }

    #[test]
    fn test_http_mode_requires_url() {
        let mut config = Config::default();
        config.vultisig.mode = BrokerMode::Http;
        assert!(config.validate().is_err());

        config.vultisig.broker_url = Some("not a url".into());
        assert!(config.validate().is_err());

        config.vultisig.broker_url = Some("https://broker.internal/sign".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_ordering() {
        let mut config = Config::default();
        config.policy.auto_approve_max_cents = config.policy.hard_per_transfer_cents + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explorer_template_needs_placeholder() {
        let mut config = Config::default();
        config.alerts.explorer_tx_template = Some("https://scan.example/tx/".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_kind_deserialize() {
        let kind: BackendKind = serde_json::from_str(r#""vultisig""#).unwrap();
        assert_eq!(kind, BackendKind::Vultisig);
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(mask_url("https://api.example.com"), "https://api.example.com");
        assert_eq!(mask_secret(""), "(not set)");
        assert_eq!(mask_secret("abc"), "***");
    }
}
