use crate::domain::errors::DomainResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A Stripe reference that may arrive as a bare id or as the expanded
/// resource, depending on the `expand[]` parameters of the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

impl<T> Expandable<T> {
    pub fn as_object(&self) -> Option<&T> {
        match self {
            Expandable::Object(obj) => Some(obj),
            Expandable::Id(_) => None,
        }
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            Expandable::Id(id) => Some(id),
            Expandable::Object(_) => None,
        }
    }
}

/// Paged list wrapper used across the Stripe API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiList<T> {
    #[serde(default)]
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardDetails {
    pub mandate: Option<String>,
    pub brand: Option<String>,
    pub last4: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentMethodDetails {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub card: Option<CardDetails>,
}

/// Legacy `source` block some charges still carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeSource {
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub status: String,
    pub charge: Option<String>,
    pub balance_transaction: Option<String>,
    pub failure_balance_transaction: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceTransaction {
    pub id: String,
    pub fee: i64,
    pub net: i64,
    #[serde(default)]
    pub currency: String,
}

/// A Stripe charge. The synchronous finalize path and several webhook
/// handlers all reduce to processing one of these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Charge {
    pub id: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub amount_refunded: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub captured: bool,
    #[serde(default)]
    pub status: String,
    pub balance_transaction: Option<Expandable<BalanceTransaction>>,
    pub payment_method_details: Option<PaymentMethodDetails>,
    /// Only embedded on API versions prior to 2022-11-15
    pub refunds: Option<ApiList<Refund>>,
    pub source: Option<ChargeSource>,
}

impl Charge {
    pub fn balance_transaction_id(&self) -> Option<&str> {
        match self.balance_transaction.as_ref()? {
            Expandable::Id(id) => Some(id),
            Expandable::Object(txn) => Some(&txn.id),
        }
    }

    pub fn payment_method_type(&self) -> Option<&str> {
        self.payment_method_details
            .as_ref()
            .map(|details| details.kind.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectToUrl {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextAction {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub redirect_to_url: Option<RedirectToUrl>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LastPaymentError {
    pub code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub card: Option<CardSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardSummary {
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub last4: String,
    #[serde(default)]
    pub exp_month: u8,
    #[serde(default)]
    pub exp_year: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    /// Handle the browser-side element confirms the payment with
    pub client_secret: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub payment_method_types: Vec<String>,
    /// Only embedded on API versions prior to 2022-11-15
    pub charges: Option<ApiList<Charge>>,
    pub latest_charge: Option<Expandable<Charge>>,
    pub last_payment_error: Option<LastPaymentError>,
    pub next_action: Option<NextAction>,
    pub payment_method: Option<Expandable<PaymentMethod>>,
}

impl PaymentIntent {
    /// Last element of the embedded charges list, when the response shape
    /// still carries one.
    pub fn embedded_latest_charge(&self) -> Option<&Charge> {
        self.charges.as_ref()?.data.last()
    }

    /// Charge id to fetch when no charge is embedded.
    pub fn latest_charge_id(&self) -> Option<&str> {
        match self.latest_charge.as_ref()? {
            Expandable::Id(id) => Some(id),
            Expandable::Object(charge) => Some(&charge.id),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetupIntent {
    pub id: String,
    #[serde(default)]
    pub status: String,
    pub payment_method: Option<Expandable<PaymentMethod>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub payment_intent: Option<Expandable<PaymentIntent>>,
    pub subscription: Option<String>,
}

impl Invoice {
    pub fn payment_intent_id(&self) -> Option<&str> {
        match self.payment_intent.as_ref()? {
            Expandable::Id(id) => Some(id),
            Expandable::Object(intent) => Some(&intent.id),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Hosted page the shopper is redirected to
    pub url: Option<String>,
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub payment_intent: Option<Expandable<PaymentIntent>>,
    /// Set instead of a payment intent when nothing is charged yet
    pub setup_intent: Option<String>,
    pub invoice: Option<Expandable<Invoice>>,
    pub subscription: Option<String>,
}

impl CheckoutSession {
    pub fn order_id(&self) -> Option<u64> {
        self.metadata.get("order_id")?.parse().ok()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerTax {
    #[serde(default)]
    pub automatic_tax: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub tax: Option<CustomerTax>,
}

impl Customer {
    /// A customer can participate in automatic tax when Stripe resolved a
    /// usable tax location for them.
    pub fn is_tax_eligible(&self) -> bool {
        self.tax
            .as_ref()
            .map(|tax| matches!(tax.automatic_tax.as_str(), "supported" | "not_collecting"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressParams {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub line1: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub line2: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub city: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub state: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub postal_code: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingParams {
    pub name: String,
    pub address: AddressParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomaticPaymentMethods {
    pub enabled: bool,
}

/// Arguments for a payment-intent creation call.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntentRequest {
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
    pub capture_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic_payment_methods: Option<AutomaticPaymentMethods>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_options: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_descriptor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping: Option<ShippingParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_future_usage: Option<String>,
}

/// Arguments for patching an intent that no longer matches the order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PaymentIntentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_types: Option<Vec<String>>,
}

impl PaymentIntentUpdate {
    pub fn is_empty(&self) -> bool {
        self.amount.is_none() && self.payment_method_types.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductData {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceData {
    pub currency: String,
    pub unit_amount: i64,
    pub product_data: ProductData,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionLineItem {
    pub price_data: PriceData,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerUpdateParams {
    pub name: String,
    pub address: String,
    pub shipping: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutomaticTaxParams {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PaymentIntentData {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_future_usage: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentMethodData {
    pub allow_redisplay: String,
}

/// Arguments for a hosted checkout-session creation call.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSessionRequest {
    pub mode: String,
    pub line_items: Vec<SessionLineItem>,
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_update: Option<CustomerUpdateParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_address_collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic_tax: Option<AutomaticTaxParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_options: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_data: Option<PaymentMethodData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    pub payment_intent_data: PaymentIntentData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_creation: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

/// Arguments for creating or updating a Stripe customer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CustomerRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<AddressParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping: Option<ShippingParams>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Arguments for a refund creation call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefundRequest {
    pub charge: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Stripe REST API port.
///
/// Every call is a blocking round trip from the caller's perspective; the
/// adapter attaches authentication, the pinned API version and, for
/// charge-creating POSTs, an idempotency key derived from
/// `order_id:source_or_customer`.
#[async_trait]
pub trait StripeGatewayPort: Send + Sync {
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> DomainResult<PaymentIntent>;

    async fn update_payment_intent(
        &self,
        intent_id: &str,
        update: PaymentIntentUpdate,
    ) -> DomainResult<PaymentIntent>;

    async fn cancel_payment_intent(&self, intent_id: &str) -> DomainResult<PaymentIntent>;

    /// Fetches an intent with its payment method expanded.
    async fn retrieve_payment_intent(&self, intent_id: &str) -> DomainResult<PaymentIntent>;

    async fn retrieve_setup_intent(&self, intent_id: &str) -> DomainResult<SetupIntent>;

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> DomainResult<CheckoutSession>;

    /// Fetches a session with `payment_intent` and `invoice.payment_intent`
    /// expanded.
    async fn retrieve_checkout_session(&self, session_id: &str) -> DomainResult<CheckoutSession>;

    async fn retrieve_charge(&self, charge_id: &str, expand_refunds: bool) -> DomainResult<Charge>;

    async fn create_refund(&self, request: RefundRequest) -> DomainResult<Refund>;

    async fn retrieve_balance_transaction(&self, id: &str) -> DomainResult<BalanceTransaction>;

    async fn create_customer(&self, request: CustomerRequest) -> DomainResult<Customer>;

    async fn update_customer(
        &self,
        customer_id: &str,
        request: CustomerRequest,
    ) -> DomainResult<Customer>;

    /// Fetches a customer with its tax block expanded.
    async fn retrieve_customer_with_tax(&self, customer_id: &str) -> DomainResult<Customer>;

    async fn retrieve_payment_method(&self, payment_method_id: &str)
        -> DomainResult<PaymentMethod>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expandable_accepts_id_or_object() {
        let intent: PaymentIntent = serde_json::from_value(json!({
            "id": "pi_1",
            "status": "succeeded",
            "latest_charge": "ch_1"
        }))
        .unwrap();
        assert_eq!(intent.latest_charge_id(), Some("ch_1"));

        let intent: PaymentIntent = serde_json::from_value(json!({
            "id": "pi_1",
            "status": "succeeded",
            "latest_charge": { "id": "ch_2", "status": "succeeded", "captured": true }
        }))
        .unwrap();
        assert_eq!(intent.latest_charge_id(), Some("ch_2"));
    }

    #[test]
    fn test_embedded_latest_charge_is_last_element() {
        let intent: PaymentIntent = serde_json::from_value(json!({
            "id": "pi_1",
            "status": "succeeded",
            "charges": { "data": [ { "id": "ch_old" }, { "id": "ch_new" } ] }
        }))
        .unwrap();
        assert_eq!(intent.embedded_latest_charge().unwrap().id, "ch_new");
    }

    #[test]
    fn test_customer_tax_eligibility() {
        let eligible: Customer = serde_json::from_value(json!({
            "id": "cus_1",
            "tax": { "automatic_tax": "supported" }
        }))
        .unwrap();
        assert!(eligible.is_tax_eligible());

        let ineligible: Customer = serde_json::from_value(json!({
            "id": "cus_2",
            "tax": { "automatic_tax": "unrecognized_location" }
        }))
        .unwrap();
        assert!(!ineligible.is_tax_eligible());

        let missing: Customer = serde_json::from_value(json!({ "id": "cus_3" })).unwrap();
        assert!(!missing.is_tax_eligible());
    }

    #[test]
    fn test_request_serialization_skips_absent_fields() {
        let request = PaymentIntentRequest {
            amount: 1999,
            currency: "usd".to_string(),
            description: "Shop - Order 100".to_string(),
            metadata: BTreeMap::new(),
            capture_method: "automatic".to_string(),
            customer: None,
            automatic_payment_methods: Some(AutomaticPaymentMethods { enabled: true }),
            payment_method_types: None,
            payment_method_options: None,
            statement_descriptor: None,
            shipping: None,
            setup_future_usage: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("payment_method_types").is_none());
        assert_eq!(value["automatic_payment_methods"]["enabled"], true);
    }

    #[test]
    fn test_session_order_id_from_metadata() {
        let session: CheckoutSession = serde_json::from_value(json!({
            "id": "cs_1",
            "metadata": { "order_id": "100" }
        }))
        .unwrap();
        assert_eq!(session.order_id(), Some(100));
    }
}
