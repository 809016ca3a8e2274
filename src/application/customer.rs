use crate::domain::errors::DomainResult;
use crate::domain::Order;
use crate::ports::stripe_gateway_port::{AddressParams, CustomerRequest, ShippingParams};
use crate::ports::{OrderStorePort, StripeGatewayPort};
use std::sync::Arc;
use tracing::{debug, info};

/// Maps a shop user or guest to a Stripe customer.
///
/// Ids are persisted in two places so both guest order reuse and repeat
/// purchases by registered users find them: on the order itself, and in
/// user-level storage when a registered user is behind the order.
pub struct CustomerResolver<G: StripeGatewayPort, S: OrderStorePort> {
    gateway: Arc<G>,
    store: Arc<S>,
}

impl<G: StripeGatewayPort, S: OrderStorePort> CustomerResolver<G, S> {
    pub fn new(gateway: Arc<G>, store: Arc<S>) -> Self {
        Self { gateway, store }
    }

    /// Returns the stored customer id, creating a Stripe customer when
    /// none exists yet.
    pub async fn get_or_create(&self, order: &mut Order) -> DomainResult<String> {
        if let Some(id) = self.stored_id(order).await? {
            return Ok(id);
        }
        self.create(order).await
    }

    /// Stored id, order meta first, user-level storage as fallback.
    async fn stored_id(&self, order: &Order) -> DomainResult<Option<String>> {
        if let Some(id) = &order.payment.customer_id {
            return Ok(Some(id.clone()));
        }
        if let Some(user_id) = order.user_id {
            return self.store.user_customer_id(user_id).await;
        }
        Ok(None)
    }

    /// Updates the stored customer from current billing data, recreating
    /// it once when Stripe no longer knows the id. A second "No such
    /// customer" after recreation propagates as a hard failure.
    pub async fn update_or_create(&self, order: &mut Order) -> DomainResult<String> {
        let Some(id) = self.stored_id(order).await? else {
            return self.create(order).await;
        };

        match self
            .gateway
            .update_customer(&id, customer_request(order))
            .await
        {
            Ok(customer) => Ok(customer.id),
            Err(err) if err.is_no_such_customer() => {
                info!("Stripe customer {} is gone, recreating", id);
                self.purge(order).await?;
                self.create(order).await
            }
            Err(err) => Err(err),
        }
    }

    async fn create(&self, order: &mut Order) -> DomainResult<String> {
        let customer = self.gateway.create_customer(customer_request(order)).await?;
        debug!("Stripe customer {} created for order {}", customer.id, order.id);
        self.persist(order, &customer.id).await?;
        Ok(customer.id)
    }

    async fn persist(&self, order: &mut Order, customer_id: &str) -> DomainResult<()> {
        order.payment.customer_id = Some(customer_id.to_string());
        self.store.save(order).await?;

        if let Some(user_id) = order.user_id {
            self.store.set_user_customer_id(user_id, customer_id).await?;
        }
        Ok(())
    }

    /// Drops a stale id from both storage locations.
    pub async fn purge(&self, order: &mut Order) -> DomainResult<()> {
        order.payment.customer_id = None;
        self.store.save(order).await?;

        if let Some(user_id) = order.user_id {
            self.store.delete_user_customer_id(user_id).await?;
        }
        Ok(())
    }
}

/// Customer payload from order billing data. Order data takes precedence
/// over anything a generic customer record might hold.
pub fn customer_request(order: &Order) -> CustomerRequest {
    let name = order.billing.full_name();
    let description = match order.user_id {
        Some(user_id) => format!("Name: {}, Username: user_{}", name, user_id),
        None => format!("Name: {}, Guest", name),
    };

    let address = AddressParams {
        line1: order.billing.address.line1.clone(),
        line2: order.billing.address.line2.clone(),
        city: order.billing.address.city.clone(),
        state: order.billing.address.state.clone(),
        postal_code: order.billing.address.postcode.clone(),
        country: order.billing.address.country.clone(),
    };

    let shipping = order.shipping.as_ref().map(|shipping| ShippingParams {
        name: shipping.full_name(),
        address: AddressParams {
            line1: shipping.address.line1.clone(),
            line2: shipping.address.line2.clone(),
            city: shipping.address.city.clone(),
            state: shipping.address.state.clone(),
            postal_code: shipping.address.postcode.clone(),
            country: shipping.address.country.clone(),
        },
    });

    CustomerRequest {
        name: (!name.is_empty()).then_some(name),
        email: (!order.billing.email.is_empty()).then(|| order.billing.email.clone()),
        phone: (!order.billing.phone.is_empty()).then(|| order.billing.phone.clone()),
        description: Some(description),
        address: Some(address),
        shipping,
        metadata: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{test_order, InMemoryOrderStore, MockGateway};
    use crate::ports::stripe_gateway_port::Customer;
    use rust_decimal_macros::dec;

    fn resolver(
        gateway: Arc<MockGateway>,
        store: Arc<InMemoryOrderStore>,
    ) -> CustomerResolver<MockGateway, InMemoryOrderStore> {
        CustomerResolver::new(gateway, store)
    }

    fn customer(id: &str) -> Customer {
        Customer {
            id: id.to_string(),
            tax: None,
        }
    }

    #[tokio::test]
    async fn test_get_or_create_prefers_order_meta_then_user_meta() {
        let mut order = test_order(100, dec!(25.00));
        order.user_id = Some(9);
        order.payment.customer_id = Some("cus_order".to_string());

        let gateway = Arc::new(MockGateway::default());
        let store = Arc::new(InMemoryOrderStore::with_order(order.clone()));
        store
            .user_customers
            .lock()
            .unwrap()
            .insert(9, "cus_user".to_string());

        let resolver = resolver(gateway, store.clone());
        assert_eq!(resolver.get_or_create(&mut order).await.unwrap(), "cus_order");

        order.payment.customer_id = None;
        assert_eq!(resolver.get_or_create(&mut order).await.unwrap(), "cus_user");
    }

    #[tokio::test]
    async fn test_get_or_create_persists_new_id_to_both_storages() {
        let mut order = test_order(100, dec!(25.00));
        order.user_id = Some(9);

        let gateway = Arc::new(MockGateway::default());
        gateway
            .create_customer_responses
            .lock()
            .unwrap()
            .push_back(Ok(customer("cus_new")));
        let store = Arc::new(InMemoryOrderStore::with_order(order.clone()));

        let resolver = resolver(gateway.clone(), store.clone());
        let id = resolver.get_or_create(&mut order).await.unwrap();

        assert_eq!(id, "cus_new");
        assert_eq!(store.order(100).payment.customer_id.as_deref(), Some("cus_new"));
        assert_eq!(
            store.user_customers.lock().unwrap().get(&9).map(String::as_str),
            Some("cus_new")
        );

        // Guest billing went out with the request.
        let requests = gateway.customer_requests.lock().unwrap();
        assert_eq!(requests[0].name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(requests[0].email.as_deref(), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn test_update_or_create_recreates_gone_customer_once() {
        let mut order = test_order(100, dec!(25.00));
        order.user_id = Some(9);
        order.payment.customer_id = Some("cus_stale".to_string());

        let gateway = Arc::new(MockGateway::default());
        gateway
            .update_customer_responses
            .lock()
            .unwrap()
            .push_back(Err(MockGateway::no_such_customer()));
        gateway
            .create_customer_responses
            .lock()
            .unwrap()
            .push_back(Ok(customer("cus_new")));
        let store = Arc::new(InMemoryOrderStore::with_order(order.clone()));
        store
            .user_customers
            .lock()
            .unwrap()
            .insert(9, "cus_stale".to_string());

        let resolver = resolver(gateway, store.clone());
        let id = resolver.update_or_create(&mut order).await.unwrap();

        assert_eq!(id, "cus_new");
        assert_eq!(
            store.user_customers.lock().unwrap().get(&9).map(String::as_str),
            Some("cus_new")
        );
    }

    #[tokio::test]
    async fn test_update_or_create_propagates_second_failure() {
        let mut order = test_order(100, dec!(25.00));
        order.payment.customer_id = Some("cus_stale".to_string());

        let gateway = Arc::new(MockGateway::default());
        gateway
            .update_customer_responses
            .lock()
            .unwrap()
            .push_back(Err(MockGateway::no_such_customer()));
        gateway
            .create_customer_responses
            .lock()
            .unwrap()
            .push_back(Err(MockGateway::no_such_customer()));
        let store = Arc::new(InMemoryOrderStore::with_order(order.clone()));

        let resolver = resolver(gateway, store);
        // Recreation itself failing must not loop.
        assert!(resolver.update_or_create(&mut order).await.is_err());
    }

    #[tokio::test]
    async fn test_purge_clears_both_storages() {
        let mut order = test_order(100, dec!(25.00));
        order.user_id = Some(9);
        order.payment.customer_id = Some("cus_stale".to_string());

        let gateway = Arc::new(MockGateway::default());
        let store = Arc::new(InMemoryOrderStore::with_order(order.clone()));
        store
            .user_customers
            .lock()
            .unwrap()
            .insert(9, "cus_stale".to_string());

        let resolver = resolver(gateway, store.clone());
        resolver.purge(&mut order).await.unwrap();

        assert!(order.payment.customer_id.is_none());
        assert!(store.order(100).payment.customer_id.is_none());
        assert!(store.user_customers.lock().unwrap().get(&9).is_none());
    }
}
