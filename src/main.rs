mod api;
mod application;
mod domain;
mod infrastructure;
mod ports;

use api::AppState;
use application::{PaymentService, WebhookService};
use infrastructure::{MySqlOrderStore, StripeApiClient, StripeSettings, TransientLockStore, WebhookState};
use ports::{NoExtensions, NoSubscriptions};
use sqlx::MySqlPool;
use std::sync::Arc;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    dotenvy::dotenv().ok();

    info!("Starting Stripe gateway service...");

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    info!("Connecting to database...");

    let pool = MySqlPool::connect(&database_url).await?;
    info!("Database connected successfully");

    let settings = StripeSettings::from_env();
    info!(
        "Stripe configuration loaded ({} mode)",
        if settings.test_mode { "test" } else { "live" }
    );

    let gateway = Arc::new(StripeApiClient::new(settings.clone()));
    let store = Arc::new(MySqlOrderStore::new(Arc::new(pool)));
    let locks = Arc::new(TransientLockStore::new());

    let payment_service = Arc::new(PaymentService::new(
        gateway.clone(),
        store.clone(),
        locks.clone(),
        settings.clone(),
        Arc::new(NoSubscriptions),
        Arc::new(NoExtensions),
    ));

    let webhook_service = Arc::new(WebhookService::new(
        payment_service.clone(),
        gateway,
        store,
        locks,
        Arc::new(NoSubscriptions),
    ));

    let app_state = AppState {
        payment_service,
        webhook_service,
        webhook_state: Arc::new(WebhookState::new()),
        settings,
    };

    let app = api::create_router(app_state);

    let host = std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("{}:{}", host, port);

    info!("Server listening on {}", addr);
    info!("Available endpoints:");
    info!("  GET  /health - Health check");
    info!("  POST /api/checkout - Create hosted checkout session");
    info!("  GET  /api/checkout/verify - Return-URL verification");
    info!("  POST /api/payments/intent - Create payment intent");
    info!("  POST /api/orders/:order_id/refund - Refund an order");
    info!("  POST /api/webhooks/stripe - Stripe webhook ingress");
    info!("  GET  /api/webhooks/stripe/status - Webhook monitoring state");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
