use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Checkout creation request.
#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub order_id: u64,

    /// Express flows collect methods and shipping client-side
    #[serde(default)]
    pub express_checkout: bool,

    /// Shopper opted to save the payment method
    #[serde(default)]
    pub save_payment_method: bool,
}

/// Checkout creation outcome. Processor-declared failures come back as
/// `result: "fail"` with a message so checkout can redisplay, not as an
/// HTTP error.
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub result: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckoutResponse {
    pub fn success(redirect: String) -> Self {
        Self {
            result: "success".to_string(),
            redirect: Some(redirect),
            message: None,
        }
    }

    pub fn fail(message: String) -> Self {
        Self {
            result: "fail".to_string(),
            redirect: None,
            message: Some(message),
        }
    }
}

/// Payment-intent creation request for the embedded element flow.
#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    pub order_id: u64,

    #[serde(default)]
    pub express_checkout: bool,

    #[serde(default)]
    pub save_payment_method: bool,
}

/// Handles the embedded element needs to confirm the payment.
#[derive(Debug, Serialize)]
pub struct IntentResponse {
    pub intent_id: String,

    pub client_secret: Option<String>,

    pub publishable_key: String,

    pub status: String,
}

/// Query parameters of the signed return URL.
#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub order: u64,

    /// Order key, must match the resolved order
    pub key: String,

    pub session_id: String,

    pub nonce: String,

    #[serde(default)]
    pub save_payment_method: Option<String>,
}

/// Refund request forwarded from the shop admin.
#[derive(Debug, Deserialize)]
pub struct RefundOrderRequest {
    /// Partial amount; a full refund when omitted
    pub amount: Option<Decimal>,

    #[serde(default)]
    pub reason: String,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: String, message: String) -> Self {
        Self { error, message }
    }
}
