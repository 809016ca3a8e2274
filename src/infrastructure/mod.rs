pub mod adapters;
pub mod config;

pub use adapters::{MySqlOrderStore, StripeApiClient, TransientLockStore, WebhookState};
pub use config::StripeSettings;
