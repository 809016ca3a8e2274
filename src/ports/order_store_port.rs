use crate::domain::errors::DomainResult;
use crate::domain::Order;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// A saved card handle, stored so a returning shopper can reuse it.
#[derive(Debug, Clone)]
pub struct PaymentTokenRecord {
    pub payment_method_id: String,
    pub brand: String,
    pub last4: String,
    pub exp_month: u8,
    pub exp_year: u16,
}

/// Order persistence port.
///
/// Reads may be stale the moment they return; callers re-check status and
/// flags right before mutating. Lookups by Stripe handle resolve at most
/// one order (the store enforces uniqueness of the handle columns).
#[async_trait]
pub trait OrderStorePort: Send + Sync {
    async fn find_by_id(&self, order_id: u64) -> DomainResult<Option<Order>>;

    /// Looks an order up by its Stripe charge id.
    async fn find_by_transaction_id(&self, transaction_id: &str) -> DomainResult<Option<Order>>;

    /// Looks an order up by its payment-intent id.
    async fn find_by_intent_id(&self, intent_id: &str) -> DomainResult<Option<Order>>;

    /// Looks an order up by its setup-intent id.
    async fn find_by_setup_intent_id(&self, intent_id: &str) -> DomainResult<Option<Order>>;

    /// Persists the order, including notes and payment metadata.
    async fn save(&self, order: &Order) -> DomainResult<()>;

    /// Decrements stock for the order's lines. The caller guards against
    /// repeat calls via the order's `stock_reduced` flag.
    async fn reduce_stock(&self, order_id: u64) -> DomainResult<()>;

    /// Records a refund against the order in the shop's books.
    async fn create_refund(
        &self,
        order_id: u64,
        amount: Decimal,
        reason: &str,
    ) -> DomainResult<()>;

    /// Removes the most recent refund record, returning whether one
    /// existed. Used when Stripe reports a refund as failed or canceled.
    async fn delete_latest_refund(&self, order_id: u64) -> DomainResult<bool>;

    /// Saves a card token for a registered user.
    async fn save_payment_token(
        &self,
        user_id: u64,
        token: PaymentTokenRecord,
    ) -> DomainResult<()>;

    /// Stripe customer id stored against a registered user.
    async fn user_customer_id(&self, user_id: u64) -> DomainResult<Option<String>>;

    async fn set_user_customer_id(&self, user_id: u64, customer_id: &str) -> DomainResult<()>;

    async fn delete_user_customer_id(&self, user_id: u64) -> DomainResult<()>;
}
