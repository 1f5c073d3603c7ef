//! Webhook Delivery Subsystem
//!
//! Fans notifications out to registered HTTP endpoints. Each endpoint gets its
//! own delivery lane so events for one subscriber go out strictly in creation
//! order, retries included; a shared permit pool caps how many lanes drain at
//! once. Endpoints that fail repeatedly trip a per-endpoint circuit and stop
//! receiving attempts until the cooldown passes or an operator resets them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use dashmap::DashMap;
use db::{
    DBService,
    models::{
        delivery_attempt::{DeliveryAttempt, DeliveryAttemptError, RecordDeliveryAttempt},
        notification::{Notification, NotificationError, NotificationStatus},
        webhook_registration::{
            CreateWebhookRegistration, WebhookRegistration, WebhookRegistrationError,
        },
    },
};
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use uuid::Uuid;

use crate::services::signing;

const WEBHOOK_USER_AGENT: &str = "maestro-webhook/1.0";

#[derive(Debug, Error)]
pub enum WebhookDeliveryError {
    #[error(transparent)]
    Registration(#[from] WebhookRegistrationError),
    #[error(transparent)]
    Notification(#[from] NotificationError),
    #[error(transparent)]
    Attempt(#[from] DeliveryAttemptError),
    #[error("HTTP client construction failed: {0}")]
    Client(String),
    #[error("Delivery queue closed")]
    QueueClosed,
}

/// Knobs for retry, circuit breaking, and lane concurrency.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Total HTTP tries per webhook per notification, first attempt included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures before the endpoint's circuit opens.
    pub circuit_threshold: i64,
    /// How long an open circuit blocks deliveries before a probe is allowed.
    pub circuit_cooldown: Duration,
    /// Lanes allowed to drain concurrently.
    pub worker_pool_size: usize,
    pub request_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            circuit_threshold: 5,
            circuit_cooldown: Duration::from_secs(300),
            worker_pool_size: 4,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportFailure {
    pub message: String,
}

/// The HTTP seam. Production uses reqwest; tests substitute a scripted fake.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Returns `Ok` for any HTTP response regardless of status; `Err` only
    /// for connection-level failures (timeout, refused, DNS).
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &str,
    ) -> Result<TransportResponse, TransportFailure>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, WebhookDeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WebhookDeliveryError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DeliveryTransport for ReqwestTransport {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &str,
    ) -> Result<TransportResponse, TransportFailure> {
        let mut request = self.client.post(url).body(body.to_string());
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| TransportFailure {
            message: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(TransportResponse { status, body })
    }
}

/// One classified HTTP try. 5xx and connection failures are worth retrying;
/// a 4xx means the endpoint saw the request and rejected it.
#[derive(Debug, Error)]
enum AttemptFailure {
    #[error("endpoint returned HTTP {status}")]
    Status { status: u16 },
    #[error("transport error: {0}")]
    Transport(String),
}

impl AttemptFailure {
    fn should_retry(&self) -> bool {
        match self {
            AttemptFailure::Status { status } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            AttemptFailure::Transport(_) => true,
        }
    }
}

struct DeliveryJob {
    notification: Notification,
    webhook_id: Uuid,
}

struct FanoutProgress {
    remaining: AtomicUsize,
    any_failed: AtomicBool,
}

#[derive(Clone)]
pub struct WebhookDeliveryService {
    db: DBService,
    transport: Arc<dyn DeliveryTransport>,
    config: Arc<DeliveryConfig>,
    lanes: Arc<DashMap<Uuid, mpsc::UnboundedSender<DeliveryJob>>>,
    workers: Arc<Semaphore>,
    fanouts: Arc<DashMap<Uuid, Arc<FanoutProgress>>>,
    stopped: Arc<AtomicBool>,
}

impl WebhookDeliveryService {
    pub fn new(db: DBService, config: DeliveryConfig) -> Result<Self, WebhookDeliveryError> {
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout)?);
        Ok(Self::with_transport(db, config, transport))
    }

    pub fn with_transport(
        db: DBService,
        config: DeliveryConfig,
        transport: Arc<dyn DeliveryTransport>,
    ) -> Self {
        Self {
            db,
            transport,
            workers: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
            config: Arc::new(config),
            lanes: Arc::new(DashMap::new()),
            fanouts: Arc::new(DashMap::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    // ========== Registration management ==========

    pub async fn register(
        &self,
        data: CreateWebhookRegistration,
    ) -> Result<WebhookRegistration, WebhookDeliveryError> {
        let registration = WebhookRegistration::create(&self.db.pool, data).await?;
        tracing::info!(
            "Registered webhook {} for events {}",
            registration.id,
            registration.event_types
        );
        Ok(registration)
    }

    pub async fn list(&self) -> Result<Vec<WebhookRegistration>, WebhookDeliveryError> {
        Ok(WebhookRegistration::list_all(&self.db.pool).await?)
    }

    pub async fn find(&self, id: Uuid) -> Result<WebhookRegistration, WebhookDeliveryError> {
        Ok(WebhookRegistration::find_by_id(&self.db.pool, id).await?)
    }

    pub async fn disable(&self, id: Uuid) -> Result<(), WebhookDeliveryError> {
        WebhookRegistration::disable(&self.db.pool, id).await?;
        tracing::info!("Disabled webhook {}", id);
        Ok(())
    }

    /// Operator override: close the circuit and forget the failure streak so
    /// the next delivery attempts immediately.
    pub async fn reset_circuit(&self, id: Uuid) -> Result<(), WebhookDeliveryError> {
        WebhookRegistration::close_circuit(&self.db.pool, id).await?;
        tracing::info!("Circuit manually reset for webhook {}", id);
        Ok(())
    }

    pub async fn attempts_for_webhook(
        &self,
        id: Uuid,
        limit: i64,
    ) -> Result<Vec<DeliveryAttempt>, WebhookDeliveryError> {
        Ok(DeliveryAttempt::find_by_webhook(&self.db.pool, id, limit).await?)
    }

    pub async fn attempts_for_notification(
        &self,
        id: Uuid,
    ) -> Result<Vec<DeliveryAttempt>, WebhookDeliveryError> {
        Ok(DeliveryAttempt::find_by_notification(&self.db.pool, id).await?)
    }

    // ========== Fan-out ==========

    /// Queue a persisted notification for every active, subscribed endpoint
    /// whose circuit is closed. Returns how many lanes accepted the job.
    pub async fn deliver(
        &self,
        notification: &Notification,
    ) -> Result<usize, WebhookDeliveryError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(WebhookDeliveryError::QueueClosed);
        }
        let now = Utc::now();
        let registrations = WebhookRegistration::find_active(&self.db.pool).await?;
        let subscribed: Vec<WebhookRegistration> = registrations
            .into_iter()
            .filter(|w| w.subscribes_to(&notification.notification_type))
            .collect();

        let (deliverable, skipped): (Vec<_>, Vec<_>) = subscribed
            .into_iter()
            .partition(|w| !w.circuit_open_at(now));

        for webhook in &skipped {
            tracing::warn!(
                "Skipping webhook {} for notification {}: circuit open",
                webhook.id,
                notification.id
            );
        }

        if deliverable.is_empty() {
            // Missing every subscriber counts against the notification, but an
            // event nobody listens for is trivially settled.
            let status = if skipped.is_empty() {
                NotificationStatus::Delivered
            } else {
                NotificationStatus::Failed
            };
            Notification::update_status(&self.db.pool, notification.id, status).await?;
            return Ok(0);
        }

        let progress = Arc::new(FanoutProgress {
            remaining: AtomicUsize::new(deliverable.len()),
            any_failed: AtomicBool::new(!skipped.is_empty()),
        });
        self.fanouts.insert(notification.id, progress);

        let mut enqueued = 0;
        for webhook in deliverable {
            self.enqueue(DeliveryJob {
                notification: notification.clone(),
                webhook_id: webhook.id,
            })?;
            enqueued += 1;
        }
        Ok(enqueued)
    }

    /// Wait until every queued fan-out has settled. Used on shutdown and by
    /// callers that need delivery results before proceeding.
    pub async fn flush(&self) {
        while !self.fanouts.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Lanes stop pulling; jobs already being attempted run to completion.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.lanes.clear();
    }

    fn enqueue(&self, job: DeliveryJob) -> Result<(), WebhookDeliveryError> {
        let webhook_id = job.webhook_id;
        let sender = self
            .lanes
            .entry(webhook_id)
            .or_insert_with(|| self.spawn_lane(webhook_id))
            .clone();
        sender.send(job).map_err(|_| WebhookDeliveryError::QueueClosed)
    }

    fn spawn_lane(&self, webhook_id: Uuid) -> mpsc::UnboundedSender<DeliveryJob> {
        let (tx, mut rx) = mpsc::unbounded_channel::<DeliveryJob>();
        let service = self.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if service.stopped.load(Ordering::SeqCst) {
                    break;
                }
                let permit = match service.workers.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                service.process(job).await;
                drop(permit);
            }
            tracing::debug!("Delivery lane for webhook {} closed", webhook_id);
        });
        tx
    }

    async fn process(&self, job: DeliveryJob) {
        let DeliveryJob {
            notification,
            webhook_id,
        } = job;

        // Circuit state may have changed while the job sat in the lane.
        let webhook = match WebhookRegistration::find_by_id(&self.db.pool, webhook_id).await {
            Ok(webhook) => webhook,
            Err(err) => {
                tracing::error!("Webhook {} lookup failed mid-delivery: {}", webhook_id, err);
                self.settle(&notification, false).await;
                return;
            }
        };

        if !webhook.active || webhook.circuit_open_at(Utc::now()) {
            tracing::warn!(
                "Dropping queued delivery of {} to webhook {}: endpoint unavailable",
                notification.id,
                webhook.id
            );
            self.settle(&notification, false).await;
            return;
        }

        let succeeded = self.attempt_with_retry(&notification, &webhook).await;
        self.record_outcome(&webhook, succeeded).await;
        self.settle(&notification, succeeded).await;
    }

    async fn attempt_with_retry(
        &self,
        notification: &Notification,
        webhook: &WebhookRegistration,
    ) -> bool {
        let headers = build_headers(notification, webhook);
        let attempt_counter = AtomicU32::new(0);

        let outcome = (|| async {
            let attempt_number = attempt_counter.fetch_add(1, Ordering::SeqCst) as i64 + 1;
            self.try_once(notification, webhook, &headers, attempt_number).await
        })
        .retry(
            &ExponentialBuilder::default()
                .with_min_delay(self.config.base_delay)
                .with_max_delay(self.config.max_delay)
                .with_max_times(self.config.max_attempts.saturating_sub(1) as usize)
                .with_jitter(),
        )
        .when(|e: &AttemptFailure| e.should_retry())
        .notify(|err: &AttemptFailure, dur: Duration| {
            tracing::warn!(
                "Webhook delivery failed, retrying after {:.2}s: {}",
                dur.as_secs_f64(),
                err
            );
        })
        .await;

        match outcome {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    "Delivery of {} to webhook {} exhausted: {}",
                    notification.id,
                    webhook.id,
                    err
                );
                false
            }
        }
    }

    async fn try_once(
        &self,
        notification: &Notification,
        webhook: &WebhookRegistration,
        headers: &[(String, String)],
        attempt_number: i64,
    ) -> Result<(), AttemptFailure> {
        let started = Instant::now();
        let outcome = self
            .transport
            .post(&webhook.url, headers, &notification.payload)
            .await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let (http_status, succeeded, response_body, error_message, failure) = match outcome {
            Ok(response) if (200..300).contains(&response.status) => {
                (Some(response.status as i64), true, Some(response.body), None, None)
            }
            Ok(response) => (
                Some(response.status as i64),
                false,
                Some(response.body),
                None,
                Some(AttemptFailure::Status {
                    status: response.status,
                }),
            ),
            Err(err) => {
                let message = err.to_string();
                (
                    None,
                    false,
                    None,
                    Some(message.clone()),
                    Some(AttemptFailure::Transport(message)),
                )
            }
        };

        let record = RecordDeliveryAttempt {
            webhook_id: webhook.id,
            notification_id: notification.id,
            attempt_number,
            http_status,
            succeeded,
            response_body,
            error_message,
            duration_ms: Some(duration_ms),
        };
        if let Err(err) = DeliveryAttempt::record(&self.db.pool, record).await {
            tracing::error!("Failed to record delivery attempt: {}", err);
        }

        match failure {
            None => Ok(()),
            Some(failure) => Err(failure),
        }
    }

    async fn record_outcome(&self, webhook: &WebhookRegistration, succeeded: bool) {
        let updated = match WebhookRegistration::record_delivery_outcome(
            &self.db.pool,
            webhook.id,
            succeeded,
        )
        .await
        {
            Ok(updated) => updated,
            Err(err) => {
                tracing::error!("Failed to update stats for webhook {}: {}", webhook.id, err);
                return;
            }
        };

        if succeeded {
            if updated.circuit_open_until.is_some() {
                // A half-open probe landed; clear the stale window.
                match WebhookRegistration::close_circuit(&self.db.pool, webhook.id).await {
                    Ok(()) => tracing::info!(
                        "Circuit closed for webhook {} after successful probe",
                        webhook.id
                    ),
                    Err(err) => tracing::error!(
                        "Failed to close circuit for webhook {}: {}",
                        webhook.id,
                        err
                    ),
                }
            }
            return;
        }

        if updated.consecutive_failures >= self.config.circuit_threshold {
            let cooldown = chrono::Duration::seconds(self.config.circuit_cooldown.as_secs() as i64);
            let until = Utc::now() + cooldown;
            match WebhookRegistration::open_circuit(&self.db.pool, webhook.id, until).await {
                Ok(()) => tracing::warn!(
                    "Circuit opened for webhook {} after {} consecutive failures, next probe at {}",
                    webhook.id,
                    updated.consecutive_failures,
                    until
                ),
                Err(err) => {
                    tracing::error!("Failed to open circuit for webhook {}: {}", webhook.id, err)
                }
            }
        }
    }

    async fn settle(&self, notification: &Notification, succeeded: bool) {
        let Some(progress) = self
            .fanouts
            .get(&notification.id)
            .map(|entry| entry.value().clone())
        else {
            return;
        };
        if !succeeded {
            progress.any_failed.store(true, Ordering::SeqCst);
        }
        if progress.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.fanouts.remove(&notification.id);
            let status = if progress.any_failed.load(Ordering::SeqCst) {
                NotificationStatus::Failed
            } else {
                NotificationStatus::Delivered
            };
            if let Err(err) =
                Notification::update_status(&self.db.pool, notification.id, status).await
            {
                tracing::error!("Failed to finalize notification {}: {}", notification.id, err);
            }
        }
    }
}

fn build_headers(
    notification: &Notification,
    webhook: &WebhookRegistration,
) -> Vec<(String, String)> {
    vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("User-Agent".to_string(), WEBHOOK_USER_AGENT.to_string()),
        ("X-Webhook-Id".to_string(), webhook.id.to_string()),
        (
            "X-Event-Type".to_string(),
            notification.notification_type.clone(),
        ),
        ("X-Delivery-Id".to_string(), Uuid::new_v4().to_string()),
        ("X-Timestamp".to_string(), Utc::now().to_rfc3339()),
        (
            "X-Signature".to_string(),
            signing::sign(&webhook.secret, &notification.payload),
        ),
    ]
}
