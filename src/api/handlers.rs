use crate::api::signature::verify_webhook_signature;
use crate::application::{
    CreateCheckoutRequest, CreateIntentRequest, ErrorResponse, PaymentService, RefundOrderRequest,
    VerifyQuery, WebhookService,
};
use crate::domain::errors::DomainError;
use crate::domain::WebhookEvent;
use crate::infrastructure::adapters::webhook_state::{WebhookState, HANDLER_ERROR, SIGNATURE_INVALID};
use crate::infrastructure::config::stripe_settings::StripeSettings;
use crate::ports::{OrderStorePort, PaymentLockPort, StripeGatewayPort};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Redirect},
};
use std::sync::Arc;
use tracing::{error, info};

/// Application state shared by the handlers.
pub struct AppState<G: StripeGatewayPort, S: OrderStorePort, L: PaymentLockPort> {
    pub payment_service: Arc<PaymentService<G, S, L>>,
    pub webhook_service: Arc<WebhookService<G, S, L>>,
    pub webhook_state: Arc<WebhookState>,
    pub settings: Arc<StripeSettings>,
}

impl<G: StripeGatewayPort, S: OrderStorePort, L: PaymentLockPort> Clone for AppState<G, S, L> {
    fn clone(&self) -> Self {
        Self {
            payment_service: self.payment_service.clone(),
            webhook_service: self.webhook_service.clone(),
            webhook_state: self.webhook_state.clone(),
            settings: self.settings.clone(),
        }
    }
}

fn error_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        DomainError::ValidationError(_) | DomainError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        DomainError::SignatureVerificationFailed => StatusCode::FORBIDDEN,
        DomainError::Stripe { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(code: &str, err: DomainError) -> (StatusCode, Json<ErrorResponse>) {
    (
        error_status(&err),
        Json(ErrorResponse::new(code.to_string(), err.to_string())),
    )
}

/// Creates a hosted checkout session for an order.
pub async fn create_checkout<
    G: StripeGatewayPort,
    S: OrderStorePort,
    L: PaymentLockPort,
>(
    State(state): State<AppState<G, S, L>>,
    Json(request): Json<CreateCheckoutRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    info!("Received checkout request for order {}", request.order_id);

    state
        .payment_service
        .process_payment(request)
        .await
        .map(|response| (StatusCode::OK, Json(response)).into_response())
        .map_err(|e| {
            error!("Checkout creation error: {}", e);
            error_response("CHECKOUT_ERROR", e)
        })
}

/// Creates or refreshes a payment intent for the embedded element flow.
pub async fn create_intent<
    G: StripeGatewayPort,
    S: OrderStorePort,
    L: PaymentLockPort,
>(
    State(state): State<AppState<G, S, L>>,
    Json(request): Json<CreateIntentRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    info!("Received intent request for order {}", request.order_id);

    state
        .payment_service
        .create_payment_intent(request)
        .await
        .map(|response| (StatusCode::OK, Json(response)).into_response())
        .map_err(|e| {
            error!("Intent creation error: {}", e);
            error_response("INTENT_ERROR", e)
        })
}

/// Return-URL endpoint the shopper lands on after the hosted page.
pub async fn verify_checkout<
    G: StripeGatewayPort,
    S: OrderStorePort,
    L: PaymentLockPort,
>(
    State(state): State<AppState<G, S, L>>,
    Query(query): Query<VerifyQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    info!("Verifying checkout session for order {}", query.order);

    state
        .payment_service
        .verify_session_checkout(query)
        .await
        .map(|redirect| Redirect::to(&redirect).into_response())
        .map_err(|e| {
            error!("Checkout verification error: {}", e);
            error_response("VERIFY_ERROR", e)
        })
}

/// Refunds an order's charge (full or partial).
pub async fn refund_order<
    G: StripeGatewayPort,
    S: OrderStorePort,
    L: PaymentLockPort,
>(
    State(state): State<AppState<G, S, L>>,
    Path(order_id): Path<u64>,
    Json(request): Json<RefundOrderRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    info!("Received refund request for order {}", order_id);

    state
        .payment_service
        .process_refund(order_id, request.amount, &request.reason)
        .await
        .map(|refunded| {
            (
                StatusCode::OK,
                Json(serde_json::json!({ "refunded": refunded })),
            )
                .into_response()
        })
        .map_err(|e| {
            error!("Refund error: {}", e);
            error_response("REFUND_ERROR", e)
        })
}

/// Webhook ingress.
///
/// The signature is checked against the configured secret before anything
/// is parsed; a mismatch records the failure state and answers 403. A
/// handled event always answers 200 (even no-ops), so Stripe stops
/// retrying; handler errors answer 400 and leave retrying to Stripe.
pub async fn stripe_webhook<
    G: StripeGatewayPort,
    S: OrderStorePort,
    L: PaymentLockPort,
>(
    State(state): State<AppState<G, S, L>>,
    headers: axum::http::HeaderMap,
    body: String,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    if let Some(secret) = &state.settings.webhook_secret {
        let signature = headers
            .get("stripe-signature")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        let now = chrono::Utc::now().timestamp();
        if let Err(e) = verify_webhook_signature(secret, signature, body.as_bytes(), now) {
            error!("Webhook signature verification failed");
            state.webhook_state.record_failure(SIGNATURE_INVALID);
            return Err((
                StatusCode::FORBIDDEN,
                Json(ErrorResponse::new(
                    "INVALID_SIGNATURE".to_string(),
                    e.to_string(),
                )),
            ));
        }
    }

    let event: WebhookEvent = serde_json::from_str(&body).map_err(|e| {
        error!("Failed to parse webhook event: {}", e);
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "INVALID_REQUEST".to_string(),
                format!("Failed to parse event: {}", e),
            )),
        )
    })?;

    info!("Received webhook event {} ({})", event.id, event.kind);

    match state.webhook_service.dispatch(&event).await {
        Ok(()) => {
            state.webhook_state.record_success(event.created);
            Ok(StatusCode::OK)
        }
        Err(e) => {
            error!("Webhook handling error: {}", e);
            state.webhook_state.record_failure(HANDLER_ERROR);
            Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("WEBHOOK_ERROR".to_string(), e.to_string())),
            ))
        }
    }
}

/// Webhook monitoring readout for the status display.
pub async fn webhook_status<
    G: StripeGatewayPort,
    S: OrderStorePort,
    L: PaymentLockPort,
>(
    State(state): State<AppState<G, S, L>>,
) -> impl IntoResponse {
    (StatusCode::OK, Json(state.webhook_state.snapshot()))
}

/// Health check.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}
