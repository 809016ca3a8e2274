use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Notification types this gateway reconciles. Anything else routes to
/// `Unknown` and is acknowledged without side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    ChargeSucceeded,
    ChargeFailed,
    ChargeCaptured,
    ChargeRefunded,
    ChargeRefundUpdated,
    CheckoutSessionCompleted,
    CheckoutSessionAsyncPaymentSucceeded,
    CheckoutSessionAsyncPaymentFailed,
    CheckoutSessionExpired,
    PaymentIntentSucceeded,
    PaymentIntentPaymentFailed,
    PaymentIntentAmountCapturableUpdated,
    PaymentIntentRequiresAction,
    InvoicePaid,
    InvoicePaymentFailed,
    Unknown(String),
}

impl EventType {
    pub fn parse(s: &str) -> Self {
        match s {
            "charge.succeeded" => Self::ChargeSucceeded,
            "charge.failed" => Self::ChargeFailed,
            "charge.captured" => Self::ChargeCaptured,
            "charge.refunded" => Self::ChargeRefunded,
            "charge.refund.updated" => Self::ChargeRefundUpdated,
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "checkout.session.async_payment_succeeded" => {
                Self::CheckoutSessionAsyncPaymentSucceeded
            }
            "checkout.session.async_payment_failed" => Self::CheckoutSessionAsyncPaymentFailed,
            "checkout.session.expired" => Self::CheckoutSessionExpired,
            "payment_intent.succeeded" => Self::PaymentIntentSucceeded,
            "payment_intent.payment_failed" => Self::PaymentIntentPaymentFailed,
            "payment_intent.amount_capturable_updated" => {
                Self::PaymentIntentAmountCapturableUpdated
            }
            "payment_intent.requires_action" => Self::PaymentIntentRequiresAction,
            "invoice.paid" => Self::InvoicePaid,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Payload wrapper carrying the changed resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    /// The resource the event describes; its shape depends on the event
    /// type, so handlers decode it themselves
    pub object: Value,
}

/// An asynchronous notification pushed by Stripe. Delivery is
/// at-least-once and possibly out of order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: String,

    /// Unix timestamp assigned by Stripe at creation
    pub created: i64,

    #[serde(default)]
    pub livemode: bool,

    pub data: EventData,
}

impl WebhookEvent {
    pub fn event_type(&self) -> EventType {
        EventType::parse(&self.kind)
    }

    /// Decodes `data.object` into the resource type the handler expects.
    pub fn object<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.object.clone())
    }
}
