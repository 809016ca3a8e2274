use super::handlers::*;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub fn create_router<
    G: crate::ports::StripeGatewayPort + 'static,
    S: crate::ports::OrderStorePort + 'static,
    L: crate::ports::PaymentLockPort + 'static,
>(
    state: AppState<G, S, L>,
) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/checkout", post(create_checkout))
        .route("/api/checkout/verify", get(verify_checkout))
        .route("/api/payments/intent", post(create_intent))
        .route("/api/orders/:order_id/refund", post(refund_order))
        .route("/api/webhooks/stripe", post(stripe_webhook))
        .route("/api/webhooks/stripe/status", get(webhook_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
