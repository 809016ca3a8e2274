use crate::domain::Order;
use crate::ports::stripe_gateway_port::{CheckoutSessionRequest, PaymentIntentRequest};
use std::collections::BTreeMap;

/// Extension hook every outbound request passes through before dispatch.
///
/// Installations can override attributes or enrich metadata without
/// touching the builders. All methods default to pass-through.
pub trait RequestExtension: Send + Sync {
    fn filter_metadata(&self, _metadata: &mut BTreeMap<String, String>, _order: &Order) {}

    fn filter_intent_request(&self, _request: &mut PaymentIntentRequest, _order: &Order) {}

    fn filter_session_request(&self, _request: &mut CheckoutSessionRequest, _order: &Order) {}
}

/// Default hook: leaves every request untouched.
pub struct NoExtensions;

impl RequestExtension for NoExtensions {}
