use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::Order;
use crate::ports::stripe_gateway_port::CheckoutSessionRequest;
use async_trait::async_trait;

/// Subscription capability.
///
/// Subscription lifecycle is outside this gateway; an installation that
/// supports it injects a real implementation at composition time,
/// everyone else gets [`NoSubscriptions`].
#[async_trait]
pub trait SubscriptionSupport: Send + Sync {
    /// Whether any line of the order is a recurring product.
    fn order_contains_subscription(&self, order: &Order) -> bool;

    /// Builds the subscription-mode variant of the checkout session.
    async fn build_subscription_session(
        &self,
        order: &Order,
    ) -> DomainResult<CheckoutSessionRequest>;

    /// An invoice for a subscription renewal was paid.
    async fn renewal_paid(&self, order: &Order) -> DomainResult<()>;

    /// An invoice for a subscription renewal failed.
    async fn renewal_failed(&self, order: &Order) -> DomainResult<()>;
}

/// Null object: no subscription products exist and renewal events are
/// acknowledged without effect.
pub struct NoSubscriptions;

#[async_trait]
impl SubscriptionSupport for NoSubscriptions {
    fn order_contains_subscription(&self, _order: &Order) -> bool {
        false
    }

    async fn build_subscription_session(
        &self,
        _order: &Order,
    ) -> DomainResult<CheckoutSessionRequest> {
        Err(DomainError::Unsupported(
            "Subscription checkout is not available in this installation.".to_string(),
        ))
    }

    async fn renewal_paid(&self, _order: &Order) -> DomainResult<()> {
        Ok(())
    }

    async fn renewal_failed(&self, _order: &Order) -> DomainResult<()> {
        Ok(())
    }
}
