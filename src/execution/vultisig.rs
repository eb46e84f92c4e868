//! Vultisig signing broker
//!
//! Hands approved intents to an out-of-process signer. The broker never holds
//! key material; it only ships signing requests and reads back a reference.
//!
//! Two transports:
//! - **Outbox**: one JSON file per intent in a drop directory
//! - **HTTP**: POST to a signing service with a bounded timeout

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::alerts::format_cents;
use crate::config::{BrokerMode, VultisigConfig};
use crate::error::{Error, Result};
use crate::intent::TransferIntent;

/// Longest broker response body kept in a failure message
pub const MAX_BROKER_BODY_CHARS: usize = 500;

/// Response fields checked, in order, for a transaction reference
const TX_REF_FIELDS: &[&str] = &["transactionRef", "txHash", "intentId"];

/// Status reported by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerStatus {
    /// Dropped in the outbox for an external signer
    QueuedExternal,
    /// Accepted by the signing service
    Submitted,
    Failed,
}

impl std::fmt::Display for BrokerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerStatus::QueuedExternal => write!(f, "queued_external"),
            BrokerStatus::Submitted => write!(f, "submitted"),
            BrokerStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of a broker submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSubmission {
    pub ok: bool,
    pub status: BrokerStatus,
    pub transaction_ref: Option<String>,
    pub message: String,
}

impl BrokerSubmission {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            status: BrokerStatus::Failed,
            transaction_ref: None,
            message: message.into(),
        }
    }
}

/// Outbox file contents
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboxRequest<'a> {
    submitted_at: String,
    intent: &'a TransferIntent,
    instructions: String,
    vault_policy_profile: &'a str,
}

/// HTTP request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpRequest<'a> {
    intent: &'a TransferIntent,
    vault_policy_profile: &'a str,
}

/// How signing requests leave the process
pub enum BrokerTransport {
    Outbox {
        dir: PathBuf,
    },
    Http {
        client: Client,
        url: String,
        token: Option<String>,
        timeout: Duration,
    },
}

/// Wallet-signing broker
pub struct VultisigBroker {
    transport: BrokerTransport,
    vault_policy_profile: String,
}

impl VultisigBroker {
    /// Outbox broker writing into `dir`
    pub fn outbox(dir: impl Into<PathBuf>, vault_policy_profile: impl Into<String>) -> Self {
        Self {
            transport: BrokerTransport::Outbox { dir: dir.into() },
            vault_policy_profile: vault_policy_profile.into(),
        }
    }

    /// HTTP broker posting to `url`
    pub fn http(
        url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
        vault_policy_profile: impl Into<String>,
    ) -> Self {
        Self {
            transport: BrokerTransport::Http {
                client: Client::new(),
                url: url.into(),
                token: token.filter(|t| !t.trim().is_empty()),
                timeout,
            },
            vault_policy_profile: vault_policy_profile.into(),
        }
    }

    /// Build the broker selected by configuration
    pub fn from_config(config: &VultisigConfig) -> Result<Self> {
        match config.mode {
            BrokerMode::Outbox => Ok(Self::outbox(
                config.outbox_dir.clone(),
                config.vault_policy_profile.clone(),
            )),
            BrokerMode::Http => {
                let url = config
                    .broker_url
                    .clone()
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| {
                        Error::Config("vultisig.broker_url is required in http mode".into())
                    })?;
                Ok(Self::http(
                    url,
                    config.broker_token.clone(),
                    Duration::from_millis(config.timeout_ms),
                    config.vault_policy_profile.clone(),
                ))
            }
        }
    }

    /// Hand an intent to the signer
    ///
    /// Transport failures come back as a `failed` submission, never as `Err`.
    pub async fn submit(&self, intent: &TransferIntent) -> BrokerSubmission {
        match &self.transport {
            BrokerTransport::Outbox { dir } => self.submit_outbox(dir, intent).await,
            BrokerTransport::Http {
                client,
                url,
                token,
                timeout,
            } => {
                self.submit_http(client, url, token.as_deref(), *timeout, intent)
                    .await
            }
        }
    }

    fn instructions(&self, intent: &TransferIntent) -> String {
        format!(
            "Sign and broadcast a transfer of {} to {} for intent {} \
             under vault policy profile '{}'. \
             Do not sign if the amount or recipient differ from this request.",
            format_cents(intent.amount_cents),
            intent.to_address,
            intent.id,
            self.vault_policy_profile
        )
    }

    async fn submit_outbox(&self, dir: &Path, intent: &TransferIntent) -> BrokerSubmission {
        let file = dir.join(format!("{}.json", intent.id));

        match self.write_outbox(dir, &file, intent).await {
            Ok(()) => {
                info!("Queued intent {} for external signing at {}", intent.id, file.display());
                BrokerSubmission {
                    ok: true,
                    status: BrokerStatus::QueuedExternal,
                    transaction_ref: None,
                    message: format!("Queued for external signing at {}", file.display()),
                }
            }
            Err(e) => {
                warn!("Failed to write outbox request for {}: {}", intent.id, e);
                BrokerSubmission::failed(format!("Outbox write failed: {}", e))
            }
        }
    }

    async fn write_outbox(&self, dir: &Path, file: &Path, intent: &TransferIntent) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        restrict_permissions(dir, 0o700).await?;

        let request = OutboxRequest {
            submitted_at: Utc::now().to_rfc3339(),
            intent,
            instructions: self.instructions(intent),
            vault_policy_profile: &self.vault_policy_profile,
        };
        let json = serde_json::to_string_pretty(&request)?;

        tokio::fs::write(file, json).await?;
        restrict_permissions(file, 0o600).await?;
        Ok(())
    }

    async fn submit_http(
        &self,
        client: &Client,
        url: &str,
        token: Option<&str>,
        timeout: Duration,
        intent: &TransferIntent,
    ) -> BrokerSubmission {
        let mut request = client.post(url).json(&HttpRequest {
            intent,
            vault_policy_profile: &self.vault_policy_profile,
        });
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!("Vultisig broker request failed for {}: {}", intent.id, e);
                return BrokerSubmission::failed(format!(
                    "Broker request failed: {}",
                    e.without_url()
                ));
            }
            Err(_) => {
                warn!("Vultisig broker timed out for {}", intent.id);
                return BrokerSubmission::failed(format!(
                    "Broker request timed out after {}ms",
                    timeout.as_millis()
                ));
            }
        };

        if !status.is_success() {
            let body: String = body.chars().take(MAX_BROKER_BODY_CHARS).collect();
            warn!("Vultisig broker rejected {}: {}", intent.id, status);
            return BrokerSubmission::failed(format!("Broker returned {}: {}", status, body));
        }

        let transaction_ref = extract_transaction_ref(&body);
        debug!(
            "Vultisig broker accepted {} (ref: {})",
            intent.id,
            transaction_ref.as_deref().unwrap_or("none")
        );

        BrokerSubmission {
            ok: true,
            status: BrokerStatus::Submitted,
            transaction_ref,
            message: "Submitted to signing broker".into(),
        }
    }
}

/// Best-effort reference lookup in a free-form JSON body
fn extract_transaction_ref(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;

    TX_REF_FIELDS.iter().find_map(|field| {
        value
            .get(*field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    })
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::intent::{IntentDraft, IntentSource, RequestedBy};
    use crate::policy::{PolicyEngine, PolicyRequest};
    use tempfile::tempdir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn intent() -> TransferIntent {
        let to = "0x00000000000000000000000000000000000000aa";
        let policy = PolicyEngine::new(PolicyConfig {
            allowlist: vec![to.into()],
            ..PolicyConfig::default()
        })
        .evaluate(&PolicyRequest {
            to_address: to.into(),
            amount_cents: 25,
            balance_cents: 100_000,
            spent_last_24h_cents: 0,
        });
        TransferIntent::new(
            IntentDraft {
                requested_by: RequestedBy::Agent,
                source: IntentSource::TransferCredits,
                to_address: to.into(),
                amount_cents: 25,
                reason: None,
                child_id: None,
            },
            policy,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_outbox_writes_request_file() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("outbox");
        let broker = VultisigBroker::outbox(&dir, "treasury");
        let intent = intent();

        let submission = broker.submit(&intent).await;
        assert!(submission.ok);
        assert_eq!(submission.status, BrokerStatus::QueuedExternal);
        assert!(submission.transaction_ref.is_none());

        let file = dir.join(format!("{}.json", intent.id));
        let raw = std::fs::read_to_string(&file).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["vaultPolicyProfile"], "treasury");
        assert_eq!(value["intent"]["id"], intent.id.as_str());
        assert!(value["submittedAt"].is_string());
        assert!(value["instructions"].as_str().unwrap().contains("$0.25"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let file_mode = std::fs::metadata(&file).unwrap().permissions().mode();
            let dir_mode = std::fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(file_mode & 0o777, 0o600);
            assert_eq!(dir_mode & 0o777, 0o700);
        }
    }

    #[tokio::test]
    async fn test_outbox_fs_error_is_failed_submission() {
        let temp = tempdir().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        let submission = VultisigBroker::outbox(&blocker, "default")
            .submit(&intent())
            .await;
        assert!(!submission.ok);
        assert_eq!(submission.status, BrokerStatus::Failed);
        assert!(submission.message.contains("Outbox write failed"));
    }

    #[tokio::test]
    async fn test_http_success_extracts_reference() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sign"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"txHash": "0xbeef"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let broker = VultisigBroker::http(
            format!("{}/sign", server.uri()),
            Some("secret".into()),
            Duration::from_secs(5),
            "default",
        );
        let submission = broker.submit(&intent()).await;
        assert!(submission.ok);
        assert_eq!(submission.status, BrokerStatus::Submitted);
        assert_eq!(submission.transaction_ref.as_deref(), Some("0xbeef"));
    }

    #[tokio::test]
    async fn test_http_unparsable_body_still_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202).set_body_string("accepted"))
            .mount(&server)
            .await;

        let broker = VultisigBroker::http(server.uri(), None, Duration::from_secs(5), "default");
        let submission = broker.submit(&intent()).await;
        assert!(submission.ok);
        assert!(submission.transaction_ref.is_none());
    }

    #[tokio::test]
    async fn test_http_error_truncates_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("e".repeat(2_000)))
            .mount(&server)
            .await;

        let broker = VultisigBroker::http(server.uri(), None, Duration::from_secs(5), "default");
        let submission = broker.submit(&intent()).await;
        assert!(!submission.ok);
        assert_eq!(submission.status, BrokerStatus::Failed);
        assert!(submission.message.contains("500"));
        assert!(submission.message.matches('e').count() <= MAX_BROKER_BODY_CHARS + 10);
    }

    #[tokio::test]
    async fn test_http_timeout() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let broker = VultisigBroker::http(server.uri(), None, Duration::from_millis(50), "default");
        let submission = broker.submit(&intent()).await;
        assert!(!submission.ok);
        assert!(submission.message.contains("timed out"));
    }

    #[test]
    fn test_extract_transaction_ref_order() {
        assert_eq!(
            extract_transaction_ref(r#"{"intentId":"i-1","transactionRef":"r-1"}"#).as_deref(),
            Some("r-1")
        );
        assert_eq!(extract_transaction_ref(r#"{"intentId":"i-1"}"#).as_deref(), Some("i-1"));
        assert_eq!(extract_transaction_ref(r#"{"txHash":""}"#), None);
        assert_eq!(extract_transaction_ref("not json"), None);
    }

    #[test]
    fn test_from_config_http_requires_url() {
        let config = VultisigConfig {
            mode: BrokerMode::Http,
            ..VultisigConfig::default()
        };
        assert!(VultisigBroker::from_config(&config).is_err());
    }
}
