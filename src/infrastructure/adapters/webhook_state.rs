use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// Reason code recorded when a webhook delivery fails signature checks.
pub const SIGNATURE_INVALID: &str = "validation_failed_signature_invalid";

/// Reason code recorded when a handler rejects a delivery.
pub const HANDLER_ERROR: &str = "handler_error";

/// Webhook monitoring markers for the status display. Observability only;
/// reconciliation never reads these.
pub struct WebhookState {
    monitoring_began_at: DateTime<Utc>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    last_success_at: Option<i64>,
    last_failure_at: Option<i64>,
    last_error: Option<String>,
}

/// Point-in-time copy served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookStateSnapshot {
    pub monitoring_began_at: DateTime<Utc>,
    pub last_success_at: Option<i64>,
    pub last_failure_at: Option<i64>,
    pub last_error: Option<String>,
}

impl WebhookState {
    pub fn new() -> Self {
        Self {
            monitoring_began_at: Utc::now(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Records a successful delivery, stamped with the event's own
    /// creation time rather than the local clock.
    pub fn record_success(&self, event_created: i64) {
        let mut inner = self.inner.lock().expect("webhook state poisoned");
        inner.last_success_at = Some(event_created);
    }

    pub fn record_failure(&self, reason: &str) {
        let mut inner = self.inner.lock().expect("webhook state poisoned");
        inner.last_failure_at = Some(Utc::now().timestamp());
        inner.last_error = Some(reason.to_string());
    }

    pub fn snapshot(&self) -> WebhookStateSnapshot {
        let inner = self.inner.lock().expect("webhook state poisoned");
        WebhookStateSnapshot {
            monitoring_began_at: self.monitoring_began_at,
            last_success_at: inner.last_success_at,
            last_failure_at: inner.last_failure_at,
            last_error: inner.last_error.clone(),
        }
    }
}

impl Default for WebhookState {
    fn default() -> Self {
        Self::new()
    }
}
