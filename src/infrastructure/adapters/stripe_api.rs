use crate::domain::errors::{DomainError, DomainResult};
use crate::infrastructure::config::stripe_settings::StripeSettings;
use crate::ports::stripe_gateway_port::*;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

const STRIPE_API_VERSION: &str = "2022-08-01";

/// Stripe REST adapter.
///
/// No automatic retry: a failed round trip surfaces immediately and the
/// caller decides what the shopper sees. Retried creates are made safe by
/// the idempotency key instead.
#[derive(Clone)]
pub struct StripeApiClient {
    settings: Arc<StripeSettings>,
    client: Client,
}

impl StripeApiClient {
    pub fn new(settings: Arc<StripeSettings>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(70))
            .build()
            .expect("failed to build HTTP client");

        Self { settings, client }
    }

    fn auth_header(&self) -> String {
        let credentials = format!("{}:", self.settings.secret_key());
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        )
    }

    /// Idempotency key for charge-creating POSTs.
    fn idempotency_key(order_id: &str, source_or_customer: Option<&str>) -> String {
        format!("{}:{}", order_id, source_or_customer.unwrap_or("guest"))
    }

    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &impl Serialize,
        idempotency_key: Option<String>,
    ) -> DomainResult<T> {
        let params = to_form_params(body)?;
        debug!("Stripe POST {}", endpoint);

        let mut request = self
            .client
            .post(format!("{}/{}", self.settings.api_base, endpoint))
            .header("Authorization", self.auth_header())
            .header("Stripe-Version", STRIPE_API_VERSION)
            .form(&params);

        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request.send().await.map_err(|e| {
            error!("Stripe request failed: {} (endpoint: {})", e, endpoint);
            DomainError::Connectivity
        })?;

        Self::decode(endpoint, response).await
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> DomainResult<T> {
        debug!("Stripe GET {}", endpoint);

        let response = self
            .client
            .get(format!("{}/{}", self.settings.api_base, endpoint))
            .header("Authorization", self.auth_header())
            .header("Stripe-Version", STRIPE_API_VERSION)
            .send()
            .await
            .map_err(|e| {
                error!("Stripe request failed: {} (endpoint: {})", e, endpoint);
                DomainError::Connectivity
            })?;

        Self::decode(endpoint, response).await
    }

    /// Decodes a response body, surfacing a declared `error` block as a
    /// processor error and an empty body as a connectivity failure.
    async fn decode<T: DeserializeOwned>(
        endpoint: &str,
        response: reqwest::Response,
    ) -> DomainResult<T> {
        let body = response.text().await.map_err(|e| {
            error!("Stripe response unreadable: {} (endpoint: {})", e, endpoint);
            DomainError::Connectivity
        })?;

        if body.is_empty() {
            error!("Stripe returned an empty body (endpoint: {})", endpoint);
            return Err(DomainError::Connectivity);
        }

        let value: Value = serde_json::from_str(&body)?;

        if let Some(api_error) = value.get("error") {
            let kind = api_error
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("api_error")
                .to_string();
            let code = api_error
                .get("code")
                .and_then(Value::as_str)
                .map(str::to_string);
            let message = api_error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown Stripe error")
                .to_string();
            error!("Stripe API error on {}: {} ({})", endpoint, message, kind);
            return Err(DomainError::Stripe {
                kind,
                code,
                message,
            });
        }

        Ok(serde_json::from_value(value)?)
    }
}

/// Flattens a request struct into the bracketed form pairs the Stripe API
/// expects (`metadata[order_id]=100`, `line_items[0][quantity]=1`, ...).
fn to_form_params(body: &impl Serialize) -> DomainResult<Vec<(String, String)>> {
    let value = serde_json::to_value(body)?;
    let mut params = Vec::new();
    flatten_value("", &value, &mut params);
    Ok(params)
}

fn flatten_value(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}[{}]", prefix, key)
                };
                flatten_value(&name, nested, out);
            }
        }
        Value::Array(items) => {
            for (index, nested) in items.iter().enumerate() {
                flatten_value(&format!("{}[{}]", prefix, index), nested, out);
            }
        }
        Value::Null => {}
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        Value::Bool(b) => out.push((prefix.to_string(), b.to_string())),
        Value::Number(n) => out.push((prefix.to_string(), n.to_string())),
    }
}

#[async_trait]
impl StripeGatewayPort for StripeApiClient {
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> DomainResult<PaymentIntent> {
        let order_id = request
            .metadata
            .get("order_id")
            .cloned()
            .unwrap_or_default();
        let key = Self::idempotency_key(&order_id, request.customer.as_deref());

        self.post("payment_intents", &request, Some(key)).await
    }

    async fn update_payment_intent(
        &self,
        intent_id: &str,
        update: PaymentIntentUpdate,
    ) -> DomainResult<PaymentIntent> {
        self.post(&format!("payment_intents/{}", intent_id), &update, None)
            .await
    }

    async fn cancel_payment_intent(&self, intent_id: &str) -> DomainResult<PaymentIntent> {
        self.post(
            &format!("payment_intents/{}/cancel", intent_id),
            &Value::Object(Default::default()),
            None,
        )
        .await
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> DomainResult<PaymentIntent> {
        self.get(&format!(
            "payment_intents/{}?expand[]=payment_method&expand[]=latest_charge",
            intent_id
        ))
        .await
    }

    async fn retrieve_setup_intent(&self, intent_id: &str) -> DomainResult<SetupIntent> {
        self.get(&format!(
            "setup_intents/{}?expand[]=payment_method",
            intent_id
        ))
        .await
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> DomainResult<CheckoutSession> {
        let order_id = request
            .metadata
            .get("order_id")
            .cloned()
            .unwrap_or_default();
        let key = Self::idempotency_key(&order_id, request.customer.as_deref());

        self.post("checkout/sessions", &request, Some(key)).await
    }

    async fn retrieve_checkout_session(&self, session_id: &str) -> DomainResult<CheckoutSession> {
        self.get(&format!(
            "checkout/sessions/{}?expand[]=payment_intent&expand[]=invoice.payment_intent",
            session_id
        ))
        .await
    }

    async fn retrieve_charge(&self, charge_id: &str, expand_refunds: bool) -> DomainResult<Charge> {
        let endpoint = if expand_refunds {
            format!("charges/{}?expand[]=refunds", charge_id)
        } else {
            format!("charges/{}", charge_id)
        };
        self.get(&endpoint).await
    }

    async fn create_refund(&self, request: RefundRequest) -> DomainResult<Refund> {
        self.post("refunds", &request, None).await
    }

    async fn retrieve_balance_transaction(&self, id: &str) -> DomainResult<BalanceTransaction> {
        self.get(&format!("balance/history/{}", id)).await
    }

    async fn create_customer(&self, request: CustomerRequest) -> DomainResult<Customer> {
        self.post("customers", &request, None).await
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        request: CustomerRequest,
    ) -> DomainResult<Customer> {
        self.post(&format!("customers/{}", customer_id), &request, None)
            .await
    }

    async fn retrieve_customer_with_tax(&self, customer_id: &str) -> DomainResult<Customer> {
        self.get(&format!("customers/{}?expand[]=tax", customer_id))
            .await
    }

    async fn retrieve_payment_method(
        &self,
        payment_method_id: &str,
    ) -> DomainResult<PaymentMethod> {
        self.get(&format!("payment_methods/{}", payment_method_id))
            .await
    }
}
