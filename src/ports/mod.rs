pub mod extension_port;
pub mod lock_port;
pub mod order_store_port;
pub mod stripe_gateway_port;
pub mod subscription_port;

pub use extension_port::{NoExtensions, RequestExtension};
pub use lock_port::PaymentLockPort;
pub use order_store_port::OrderStorePort;
pub use stripe_gateway_port::StripeGatewayPort;
pub use subscription_port::{NoSubscriptions, SubscriptionSupport};
