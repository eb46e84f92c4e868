//! Alert dispatch
//!
//! Intent mutations push events onto a bounded channel and return
//! immediately. A notifier task drains the channel, renders each event and
//! delivers it with exponential backoff. Delivery failures are logged and
//! dropped; they never reach the code that mutated the intent.

use std::sync::Arc;
use std::time::Duration;

use backoff::{future::retry, ExponentialBackoff};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AlertConfig;
use crate::error::Result;
use crate::intent::KeyValueStore;

use super::render::{render_alert, RenderOptions};
use super::telegram::TelegramClient;
use super::AlertEvent;

/// Storage key for delivered alert fingerprints
pub const ALERTS_SENT_KEY: &str = "transfer_alerts_sent";

/// Fingerprints retained for duplicate suppression
pub const MAX_SENT_FINGERPRINTS: usize = 1000;

/// Producer side of the alert queue
///
/// Cheap to clone. A disabled sender silently discards events.
#[derive(Clone, Debug)]
pub struct AlertSender {
    tx: Option<mpsc::Sender<AlertEvent>>,
}

impl AlertSender {
    /// Sender feeding `tx`
    pub fn new(tx: mpsc::Sender<AlertEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sender that drops everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an event without waiting
    pub fn notify(&self, event: AlertEvent) {
        let Some(tx) = &self.tx else {
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    "Alert queue full, dropping {} alert for {}",
                    event.kind(),
                    event.intent().id
                );
            }
            Err(TrySendError::Closed(event)) => {
                warn!(
                    "Alert notifier stopped, dropping {} alert for {}",
                    event.kind(),
                    event.intent().id
                );
            }
        }
    }
}

/// Retry schedule for a single delivery
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.initial_interval * 8,
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        }
    }
}

/// Consumer side: renders and delivers alerts
pub struct AlertNotifier {
    telegram: TelegramClient,
    render: RenderOptions,
    retry: RetryPolicy,
    kv: Arc<dyn KeyValueStore>,
}

impl AlertNotifier {
    pub fn new(
        telegram: TelegramClient,
        render: RenderOptions,
        retry: RetryPolicy,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            telegram,
            render,
            retry,
            kv,
        }
    }

    /// Drain the queue until every sender is dropped
    pub async fn run(self, mut rx: mpsc::Receiver<AlertEvent>) {
        while let Some(event) = rx.recv().await {
            if let Err(e) = self.deliver(&event).await {
                warn!(
                    "Failed to deliver {} alert for {}: {}",
                    event.kind(),
                    event.intent().id,
                    e
                );
            }
        }
        debug!("Alert queue closed, notifier stopping");
    }

    /// Deliver one event unless an identical one was already sent
    pub async fn deliver(&self, event: &AlertEvent) -> Result<()> {
        let fingerprint = event.fingerprint();
        let mut sent = self.load_sent().await;

        if sent.iter().any(|f| f == &fingerprint) {
            debug!("Skipping duplicate alert {}", fingerprint);
            return Ok(());
        }

        let text = render_alert(event, &self.render);
        let telegram = &self.telegram;
        let text = text.as_str();

        retry(self.retry.backoff(), || async move {
            telegram.send_message(text).await.map_err(|e| {
                if e.is_retryable() {
                    debug!("Retrying alert delivery: {}", e);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await?;

        sent.push(fingerprint);
        if sent.len() > MAX_SENT_FINGERPRINTS {
            let overflow = sent.len() - MAX_SENT_FINGERPRINTS;
            sent.drain(..overflow);
        }
        if let Err(e) = self.save_sent(&sent).await {
            warn!("Failed to record delivered alert: {}", e);
        }

        Ok(())
    }

    async fn load_sent(&self) -> Vec<String> {
        match self.kv.get(ALERTS_SENT_KEY).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to read delivered alerts: {}", e);
                Vec::new()
            }
        }
    }

    async fn save_sent(&self, sent: &[String]) -> Result<()> {
        self.kv
            .set(ALERTS_SENT_KEY, serde_json::to_string(sent)?)
            .await
    }
}

/// Handle on the running notifier task
pub struct AlertWorker {
    task: Option<JoinHandle<()>>,
}

impl AlertWorker {
    /// Wait for queued alerts to flush once all senders are dropped
    pub async fn drain(self, timeout: Duration) {
        let Some(task) = self.task else {
            return;
        };

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => debug!("Alert notifier drained"),
            Ok(Err(e)) => warn!("Alert notifier task failed: {}", e),
            Err(_) => warn!("Timed out waiting for alerts to flush"),
        }
    }
}

/// Wires the alert queue to the notifier
pub struct AlertDispatcher;

impl AlertDispatcher {
    /// Start the notifier task
    ///
    /// Returns a disabled sender when alerts are switched off or credentials
    /// are missing. Must be called from within a tokio runtime.
    pub fn spawn(config: &AlertConfig, kv: Arc<dyn KeyValueStore>) -> (AlertSender, AlertWorker) {
        if !config.is_active() {
            info!("Transfer alerts disabled");
            return (AlertSender::disabled(), AlertWorker { task: None });
        }

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let notifier = AlertNotifier::new(
            TelegramClient::new(
                &config.api_base,
                config.bot_token.clone(),
                config.chat_id.clone(),
            ),
            RenderOptions {
                chain: config.chain.clone(),
                explorer_tx_template: config.explorer_tx_template.clone(),
            },
            RetryPolicy {
                initial_interval: Duration::from_millis(config.retry_initial_ms),
                max_elapsed: Duration::from_millis(config.retry_max_elapsed_ms),
            },
            kv,
        );

        let task = tokio::spawn(notifier.run(rx));
        info!("Transfer alerts enabled (chain: {})", config.chain);

        (AlertSender::new(tx), AlertWorker { task: Some(task) })
    }
}
