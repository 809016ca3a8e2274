pub mod customer;
pub mod dto;
pub mod nonce;
pub mod payment_service;
pub mod request_builder;
pub mod webhook_service;

#[cfg(test)]
pub mod test_support;

pub use dto::{
    CheckoutResponse, CreateCheckoutRequest, CreateIntentRequest, ErrorResponse, IntentResponse,
    RefundOrderRequest, VerifyQuery,
};
pub use payment_service::PaymentService;
pub use webhook_service::WebhookService;
