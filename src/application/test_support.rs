//! Hand-rolled port doubles for service tests: a scripted gateway and an
//! in-memory order store.

use crate::domain::entities::{BillingDetails, LineItem, Order};
use crate::domain::errors::{DomainError, DomainResult};
use crate::ports::order_store_port::{OrderStorePort, PaymentTokenRecord};
use crate::ports::stripe_gateway_port::*;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Gateway double: every method pops its scripted response queue and
/// records the request it received.
#[derive(Default)]
pub struct MockGateway {
    pub create_intent_responses: Mutex<VecDeque<DomainResult<PaymentIntent>>>,
    pub update_intent_responses: Mutex<VecDeque<DomainResult<PaymentIntent>>>,
    pub cancel_intent_responses: Mutex<VecDeque<DomainResult<PaymentIntent>>>,
    pub retrieve_intent_responses: Mutex<VecDeque<DomainResult<PaymentIntent>>>,
    pub retrieve_setup_intent_responses: Mutex<VecDeque<DomainResult<SetupIntent>>>,
    pub create_session_responses: Mutex<VecDeque<DomainResult<CheckoutSession>>>,
    pub retrieve_session_responses: Mutex<VecDeque<DomainResult<CheckoutSession>>>,
    pub retrieve_charge_responses: Mutex<VecDeque<DomainResult<Charge>>>,
    pub create_refund_responses: Mutex<VecDeque<DomainResult<Refund>>>,
    pub balance_transaction_responses: Mutex<VecDeque<DomainResult<BalanceTransaction>>>,
    pub create_customer_responses: Mutex<VecDeque<DomainResult<Customer>>>,
    pub update_customer_responses: Mutex<VecDeque<DomainResult<Customer>>>,
    pub customer_tax_responses: Mutex<VecDeque<DomainResult<Customer>>>,
    pub payment_method_responses: Mutex<VecDeque<DomainResult<PaymentMethod>>>,

    pub intent_requests: Mutex<Vec<PaymentIntentRequest>>,
    pub session_requests: Mutex<Vec<CheckoutSessionRequest>>,
    pub customer_requests: Mutex<Vec<CustomerRequest>>,
    pub refund_requests: Mutex<Vec<RefundRequest>>,
}

fn pop<T>(name: &str, queue: &Mutex<VecDeque<DomainResult<T>>>) -> DomainResult<T> {
    queue
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(DomainError::InternalError(format!("unexpected gateway call: {}", name))))
}

impl MockGateway {
    pub fn stripe_error(kind: &str, message: &str) -> DomainError {
        DomainError::Stripe {
            kind: kind.to_string(),
            code: None,
            message: message.to_string(),
        }
    }

    pub fn no_such_customer() -> DomainError {
        Self::stripe_error("invalid_request_error", "No such customer: 'cus_stale'")
    }
}

#[async_trait]
impl StripeGatewayPort for MockGateway {
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> DomainResult<PaymentIntent> {
        self.intent_requests.lock().unwrap().push(request);
        pop("create_payment_intent", &self.create_intent_responses)
    }

    async fn update_payment_intent(
        &self,
        _intent_id: &str,
        _update: PaymentIntentUpdate,
    ) -> DomainResult<PaymentIntent> {
        pop("update_payment_intent", &self.update_intent_responses)
    }

    async fn cancel_payment_intent(&self, _intent_id: &str) -> DomainResult<PaymentIntent> {
        pop("cancel_payment_intent", &self.cancel_intent_responses)
    }

    async fn retrieve_payment_intent(&self, _intent_id: &str) -> DomainResult<PaymentIntent> {
        pop("retrieve_payment_intent", &self.retrieve_intent_responses)
    }

    async fn retrieve_setup_intent(&self, _intent_id: &str) -> DomainResult<SetupIntent> {
        pop("retrieve_setup_intent", &self.retrieve_setup_intent_responses)
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> DomainResult<CheckoutSession> {
        self.session_requests.lock().unwrap().push(request);
        pop("create_checkout_session", &self.create_session_responses)
    }

    async fn retrieve_checkout_session(&self, _session_id: &str) -> DomainResult<CheckoutSession> {
        pop("retrieve_checkout_session", &self.retrieve_session_responses)
    }

    async fn retrieve_charge(
        &self,
        _charge_id: &str,
        _expand_refunds: bool,
    ) -> DomainResult<Charge> {
        pop("retrieve_charge", &self.retrieve_charge_responses)
    }

    async fn create_refund(&self, request: RefundRequest) -> DomainResult<Refund> {
        self.refund_requests.lock().unwrap().push(request);
        pop("create_refund", &self.create_refund_responses)
    }

    async fn retrieve_balance_transaction(&self, _id: &str) -> DomainResult<BalanceTransaction> {
        pop("retrieve_balance_transaction", &self.balance_transaction_responses)
    }

    async fn create_customer(&self, request: CustomerRequest) -> DomainResult<Customer> {
        self.customer_requests.lock().unwrap().push(request);
        pop("create_customer", &self.create_customer_responses)
    }

    async fn update_customer(
        &self,
        _customer_id: &str,
        request: CustomerRequest,
    ) -> DomainResult<Customer> {
        self.customer_requests.lock().unwrap().push(request);
        pop("update_customer", &self.update_customer_responses)
    }

    async fn retrieve_customer_with_tax(&self, _customer_id: &str) -> DomainResult<Customer> {
        pop("retrieve_customer_with_tax", &self.customer_tax_responses)
    }

    async fn retrieve_payment_method(
        &self,
        _payment_method_id: &str,
    ) -> DomainResult<PaymentMethod> {
        pop("retrieve_payment_method", &self.payment_method_responses)
    }
}

/// Order store double tracking saves, stock reductions and refunds.
#[derive(Default)]
pub struct InMemoryOrderStore {
    pub orders: Mutex<HashMap<u64, Order>>,
    pub user_customers: Mutex<HashMap<u64, String>>,
    pub stock_reductions: Mutex<Vec<u64>>,
    pub refunds: Mutex<Vec<(u64, Decimal, String)>>,
    pub tokens: Mutex<Vec<(u64, PaymentTokenRecord)>>,
}

impl InMemoryOrderStore {
    pub fn with_order(order: Order) -> Self {
        let store = Self::default();
        store.orders.lock().unwrap().insert(order.id, order);
        store
    }

    pub fn order(&self, order_id: u64) -> Order {
        self.orders.lock().unwrap().get(&order_id).cloned().unwrap()
    }

    pub fn stock_reduction_count(&self, order_id: u64) -> usize {
        self.stock_reductions
            .lock()
            .unwrap()
            .iter()
            .filter(|id| **id == order_id)
            .count()
    }
}

#[async_trait]
impl OrderStorePort for InMemoryOrderStore {
    async fn find_by_id(&self, order_id: u64) -> DomainResult<Option<Order>> {
        Ok(self.orders.lock().unwrap().get(&order_id).cloned())
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> DomainResult<Option<Order>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|order| order.payment.transaction_id.as_deref() == Some(transaction_id))
            .cloned())
    }

    async fn find_by_intent_id(&self, intent_id: &str) -> DomainResult<Option<Order>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|order| order.payment.intent_id.as_deref() == Some(intent_id))
            .cloned())
    }

    async fn find_by_setup_intent_id(&self, intent_id: &str) -> DomainResult<Option<Order>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|order| order.payment.setup_intent_id.as_deref() == Some(intent_id))
            .cloned())
    }

    async fn save(&self, order: &Order) -> DomainResult<()> {
        self.orders.lock().unwrap().insert(order.id, order.clone());
        Ok(())
    }

    async fn reduce_stock(&self, order_id: u64) -> DomainResult<()> {
        self.stock_reductions.lock().unwrap().push(order_id);
        Ok(())
    }

    async fn create_refund(
        &self,
        order_id: u64,
        amount: Decimal,
        reason: &str,
    ) -> DomainResult<()> {
        self.refunds
            .lock()
            .unwrap()
            .push((order_id, amount, reason.to_string()));
        Ok(())
    }

    async fn delete_latest_refund(&self, order_id: u64) -> DomainResult<bool> {
        let mut refunds = self.refunds.lock().unwrap();
        if let Some(position) = refunds.iter().rposition(|(id, _, _)| *id == order_id) {
            refunds.remove(position);
            return Ok(true);
        }
        Ok(false)
    }

    async fn save_payment_token(
        &self,
        user_id: u64,
        token: PaymentTokenRecord,
    ) -> DomainResult<()> {
        self.tokens.lock().unwrap().push((user_id, token));
        Ok(())
    }

    async fn user_customer_id(&self, user_id: u64) -> DomainResult<Option<String>> {
        Ok(self.user_customers.lock().unwrap().get(&user_id).cloned())
    }

    async fn set_user_customer_id(&self, user_id: u64, customer_id: &str) -> DomainResult<()> {
        self.user_customers
            .lock()
            .unwrap()
            .insert(user_id, customer_id.to_string());
        Ok(())
    }

    async fn delete_user_customer_id(&self, user_id: u64) -> DomainResult<()> {
        self.user_customers.lock().unwrap().remove(&user_id);
        Ok(())
    }
}

pub fn test_billing() -> BillingDetails {
    BillingDetails {
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        email: "ada@example.com".to_string(),
        ..Default::default()
    }
}

pub fn test_order(id: u64, total: Decimal) -> Order {
    let mut order = Order::new(id, total, "USD".to_string(), test_billing(), None).unwrap();
    order.line_items.push(LineItem {
        product_id: Some(7),
        name: "Widget".to_string(),
        unit_amount: total,
        quantity: 1,
        tax_code: None,
        image_url: None,
    });
    order
}

pub fn succeeded_charge(id: &str) -> Charge {
    Charge {
        id: id.to_string(),
        amount: 2500,
        currency: "usd".to_string(),
        captured: true,
        status: "succeeded".to_string(),
        payment_method_details: Some(PaymentMethodDetails {
            kind: "card".to_string(),
            card: None,
        }),
        ..Default::default()
    }
}

pub fn test_session(id: &str, order: &Order) -> CheckoutSession {
    let mut session = CheckoutSession {
        id: id.to_string(),
        url: Some(format!("https://checkout.stripe.com/c/pay/{}", id)),
        amount_total: Some(2500),
        ..Default::default()
    };
    session
        .metadata
        .insert("order_id".to_string(), order.id.to_string());
    session
}
