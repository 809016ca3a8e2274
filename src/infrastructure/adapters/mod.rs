pub mod mysql_order_store;
pub mod stripe_api;
pub mod transient_lock;
pub mod webhook_state;

pub use mysql_order_store::MySqlOrderStore;
pub use stripe_api::StripeApiClient;
pub use transient_lock::TransientLockStore;
pub use webhook_state::WebhookState;
