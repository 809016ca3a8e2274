use crate::application::customer::CustomerResolver;
use crate::application::dto::{
    CheckoutResponse, CreateCheckoutRequest, CreateIntentRequest, IntentResponse, VerifyQuery,
};
use crate::application::nonce::{create_redirect_nonce, verify_redirect_nonce};
use crate::application::request_builder::{
    build_intent_request, build_intent_update, build_session_request, strip_customer_binding,
    CheckoutOptions,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::methods::localize_error;
use crate::domain::value_objects::{from_minor_units, minimum_amount, to_minor_units, OrderStatus};
use crate::domain::Order;
use crate::infrastructure::config::stripe_settings::StripeSettings;
use crate::ports::order_store_port::PaymentTokenRecord;
use crate::ports::stripe_gateway_port::{
    Charge, CheckoutSession, PaymentIntent, RefundRequest, SetupIntent,
};
use crate::ports::{
    OrderStorePort, PaymentLockPort, RequestExtension, StripeGatewayPort, SubscriptionSupport,
};
use std::sync::Arc;
use tracing::{debug, error, info};

/// An intent handle stored on an order: a payment intent once a charge is
/// in play, or a setup intent when no charge exists yet.
pub enum IntentHandle {
    Payment(PaymentIntent),
    Setup(SetupIntent),
}

/// Drives an order through checkout-session/intent creation, return-URL
/// verification and the shared finalize step. The webhook dispatcher
/// reuses the finalize and fee logic so both entry points converge here.
pub struct PaymentService<G: StripeGatewayPort, S: OrderStorePort, L: PaymentLockPort> {
    gateway: Arc<G>,
    store: Arc<S>,
    locks: Arc<L>,
    settings: Arc<StripeSettings>,
    customers: CustomerResolver<G, S>,
    subscriptions: Arc<dyn SubscriptionSupport>,
    extensions: Arc<dyn RequestExtension>,
}

impl<G: StripeGatewayPort, S: OrderStorePort, L: PaymentLockPort> PaymentService<G, S, L> {
    pub fn new(
        gateway: Arc<G>,
        store: Arc<S>,
        locks: Arc<L>,
        settings: Arc<StripeSettings>,
        subscriptions: Arc<dyn SubscriptionSupport>,
        extensions: Arc<dyn RequestExtension>,
    ) -> Self {
        let customers = CustomerResolver::new(gateway.clone(), store.clone());
        Self {
            gateway,
            store,
            locks,
            settings,
            customers,
            subscriptions,
            extensions,
        }
    }

    pub fn settings(&self) -> &Arc<StripeSettings> {
        &self.settings
    }

    /// Rejects orders below Stripe's per-currency floor before any state
    /// changes.
    pub fn validate_minimum_order_amount(&self, order: &Order) -> DomainResult<()> {
        let floor = minimum_amount(&order.currency);
        if to_minor_units(order.total, &order.currency) < floor {
            return Err(DomainError::InvalidAmount(format!(
                "Sorry, the minimum allowed order total is {} {} to use this payment method.",
                from_minor_units(floor, &order.currency),
                order.currency.to_uppercase()
            )));
        }
        Ok(())
    }

    /// Order-received URL the shopper lands on after payment.
    pub fn return_url(&self, order: &Order) -> String {
        format!(
            "{}?order={}&key={}",
            self.settings.return_url_base, order.id, order.order_key
        )
    }

    fn verify_url(&self, order: &Order, options: CheckoutOptions) -> String {
        let nonce = create_redirect_nonce(self.settings.secret_key(), order.id, &order.order_key);
        format!(
            "{}/api/checkout/verify?order={}&key={}&session_id={{CHECKOUT_SESSION_ID}}&save_payment_method={}&nonce={}",
            self.settings.site_url,
            order.id,
            order.order_key,
            if options.save_payment_method { "yes" } else { "no" },
            nonce
        )
    }

    /// Checkout entry point: creates a hosted session for the order and
    /// returns the redirect, or a failed-result object with a message the
    /// checkout page can redisplay.
    pub async fn process_payment(
        &self,
        request: CreateCheckoutRequest,
    ) -> DomainResult<CheckoutResponse> {
        let mut order = self
            .store
            .find_by_id(request.order_id)
            .await?
            .ok_or_else(|| DomainError::OrderNotFound(request.order_id.to_string()))?;

        info!(
            "Begin processing payment for order {} for the amount of {}",
            order.id, order.total
        );

        let options = CheckoutOptions {
            express_checkout: request.express_checkout,
            save_payment_method: request.save_payment_method,
        };

        match self.create_session_checkout(&mut order, options).await {
            Ok(session) => {
                info!(
                    "Stripe Session Checkout {} initiated for order {}",
                    session.id, order.id
                );
                let redirect = session.url.ok_or_else(|| {
                    DomainError::InternalError("checkout session carries no URL".to_string())
                })?;
                Ok(CheckoutResponse::success(redirect))
            }
            Err(err) => match err {
                DomainError::Stripe { code, message, .. } => {
                    error!(
                        "Stripe Session Checkout for order {} initiated failed: {}",
                        order.id, message
                    );
                    Ok(CheckoutResponse::fail(localize_error(
                        code.as_deref(),
                        &message,
                    )))
                }
                DomainError::InvalidAmount(message)
                | DomainError::ValidationError(message)
                | DomainError::Unsupported(message) => Ok(CheckoutResponse::fail(message)),
                DomainError::Connectivity => {
                    Ok(CheckoutResponse::fail(DomainError::Connectivity.to_string()))
                }
                other => Err(other),
            },
        }
    }

    async fn create_session_checkout(
        &self,
        order: &mut Order,
        options: CheckoutOptions,
    ) -> DomainResult<CheckoutSession> {
        let request = if self.subscriptions.order_contains_subscription(order) {
            self.subscriptions.build_subscription_session(order).await?
        } else {
            self.validate_minimum_order_amount(order)?;
            self.build_payment_session(order, options).await?
        };

        match self.gateway.create_checkout_session(request).await {
            Ok(session) => Ok(session),
            Err(err) if err.is_no_such_customer() => {
                // Stale binding, e.g. after switching Stripe accounts.
                // Purge and recreate exactly once.
                self.customers.purge(order).await?;
                let request = if self.subscriptions.order_contains_subscription(order) {
                    self.subscriptions.build_subscription_session(order).await?
                } else {
                    self.build_payment_session(order, options).await?
                };
                self.gateway.create_checkout_session(request).await
            }
            Err(err) => Err(err),
        }
    }

    async fn build_payment_session(
        &self,
        order: &mut Order,
        options: CheckoutOptions,
    ) -> DomainResult<crate::ports::stripe_gateway_port::CheckoutSessionRequest> {
        let customer_id = self.customers.get_or_create(order).await?;

        let mut request = build_session_request(
            &self.settings,
            order,
            Some(customer_id.clone()),
            options,
            self.verify_url(order, options),
            self.settings.checkout_url.clone(),
            self.extensions.as_ref(),
        );

        // Automatic tax needs a tax-eligible customer; fall back to
        // guest-style collection instead of failing the request.
        if request.automatic_tax.is_some() {
            let customer = self.gateway.retrieve_customer_with_tax(&customer_id).await?;
            if !customer.is_tax_eligible() {
                strip_customer_binding(&mut request);
            }
        }

        Ok(request)
    }

    /// Element-flow entry point: creates an intent for the order, or
    /// patches the stored one when the order changed since.
    pub async fn create_payment_intent(
        &self,
        request: CreateIntentRequest,
    ) -> DomainResult<IntentResponse> {
        let mut order = self
            .store
            .find_by_id(request.order_id)
            .await?
            .ok_or_else(|| DomainError::OrderNotFound(request.order_id.to_string()))?;

        self.validate_minimum_order_amount(&order)?;

        let options = CheckoutOptions {
            express_checkout: request.express_checkout,
            save_payment_method: request.save_payment_method,
        };

        if let Some(intent_id) = order.payment.intent_id.clone() {
            if let Ok(intent) = self.gateway.retrieve_payment_intent(&intent_id).await {
                let intent = self.update_existing_intent(&order, intent).await?;
                return Ok(self.intent_response(intent));
            }
        }

        let intent = self.create_intent(&mut order, options).await?;
        Ok(self.intent_response(intent))
    }

    fn intent_response(&self, intent: PaymentIntent) -> IntentResponse {
        IntentResponse {
            intent_id: intent.id,
            client_secret: intent.client_secret,
            publishable_key: self.settings.publishable_key().to_string(),
            status: intent.status,
        }
    }

    async fn create_intent(
        &self,
        order: &mut Order,
        options: CheckoutOptions,
    ) -> DomainResult<PaymentIntent> {
        let customer_id = self.customers.get_or_create(order).await?;
        let request = build_intent_request(
            &self.settings,
            order,
            Some(customer_id),
            options,
            self.extensions.as_ref(),
        );

        let intent = match self.gateway.create_payment_intent(request).await {
            Ok(intent) => intent,
            Err(err) if err.is_no_such_customer() => {
                self.customers.purge(order).await?;
                let customer_id = self.customers.get_or_create(order).await?;
                let request = build_intent_request(
                    &self.settings,
                    order,
                    Some(customer_id),
                    options,
                    self.extensions.as_ref(),
                );
                self.gateway.create_payment_intent(request).await?
            }
            Err(err) => return Err(err),
        };

        info!("Stripe PaymentIntent {} initiated for order {}", intent.id, order.id);
        self.add_intent_to_order(&intent.id, order).await?;

        Ok(intent)
    }

    /// Patches the stored intent when amount or method list drifted.
    pub async fn update_existing_intent(
        &self,
        order: &Order,
        intent: PaymentIntent,
    ) -> DomainResult<PaymentIntent> {
        let update = build_intent_update(
            &self.settings,
            order,
            intent.amount,
            &intent.payment_method_types,
        );
        if update.is_empty() {
            return Ok(intent);
        }
        self.gateway.update_payment_intent(&intent.id, update).await
    }

    /// Annotates the order with its intent id. Repeat calls with the same
    /// id change nothing.
    pub async fn add_intent_to_order(&self, intent_id: &str, order: &mut Order) -> DomainResult<()> {
        if order.payment.intent_id.as_deref() == Some(intent_id) {
            return Ok(());
        }

        order.add_note(format!(
            "Stripe payment intent created (Payment Intent ID: {})",
            intent_id
        ));
        order.payment.intent_id = Some(intent_id.to_string());
        self.store.save(order).await
    }

    /// Return-URL entry point. Validates the nonce and order key, fetches
    /// the session, and hands a resolved intent to the shared finalize.
    /// Returns the URL to redirect the shopper to.
    pub async fn verify_session_checkout(&self, query: VerifyQuery) -> DomainResult<String> {
        let mut order = self
            .store
            .find_by_id(query.order)
            .await?
            .ok_or_else(|| DomainError::OrderNotFound(query.order.to_string()))?;

        if !verify_redirect_nonce(
            self.settings.secret_key(),
            query.order,
            &query.key,
            &query.nonce,
        ) || order.order_key != query.key
        {
            return Err(DomainError::SignatureVerificationFailed);
        }

        let session = self
            .gateway
            .retrieve_checkout_session(&query.session_id)
            .await?;

        // Free orders have no payment intent to wait for.
        if session.amount_total == Some(0) {
            if let Some(setup_intent) = &session.setup_intent {
                order.payment.setup_intent_id = Some(setup_intent.clone());
            }
            order.payment_complete(&session.id)?;
            order.add_note(format!("Stripe charge complete (Charge ID: {})", session.id));
            self.store.save(&order).await?;
            return Ok(self.return_url(&order));
        }

        let intent = resolve_session_intent(&session)?;
        self.add_intent_to_order(&intent.id, &mut order).await?;

        if self.locks.lock(order.id, Some(&intent.id)).await {
            // Another entry point is already finalizing this intent.
            debug!("Order {} locked for intent {}, skipping verify", order.id, intent.id);
            return Ok(self.return_url(&order));
        }

        let save_requested = query.save_payment_method.as_deref() == Some("yes");
        self.handle_verify_intent(order, &intent, save_requested)
            .await
    }

    /// Shared finalize for the verify path: decides between the
    /// further-action redirect, the failure path and charge processing.
    /// The lock is released on every branch.
    pub async fn handle_verify_intent(
        &self,
        mut order: Order,
        intent: &PaymentIntent,
        save_payment_method: bool,
    ) -> DomainResult<String> {
        if intent.status == "succeeded" && save_payment_method {
            self.maybe_save_payment_method(&order, intent).await;
        }

        if let Some(last_error) = &intent.last_payment_error {
            let message = localize_error(
                last_error.code.as_deref(),
                last_error.message.as_deref().unwrap_or(""),
            );
            self.mark_order_failed(&mut order, &format!("Payment failed. {}", message))
                .await?;
            self.locks.unlock(order.id).await;
            return Ok(self.settings.checkout_url.clone());
        }

        if intent.status == "requires_action" {
            // Further shopper action pending; no order state to record.
            self.locks.unlock(order.id).await;
            if let Some(url) = intent
                .next_action
                .as_ref()
                .filter(|action| action.kind == "redirect_to_url")
                .and_then(|action| action.redirect_to_url.as_ref())
                .and_then(|redirect| redirect.url.clone())
            {
                return Ok(url);
            }
            return Ok(self.settings.checkout_url.clone());
        }

        let charge = self.resolve_latest_charge(intent).await?;

        if let Err(err) = self.process_response(&charge, &mut order).await {
            error!("Finalize failed for order {}: {}", order.id, err);
            let message = match &err {
                DomainError::Stripe { code, message, .. } => {
                    localize_error(code.as_deref(), message)
                }
                other => other.to_string(),
            };
            self.mark_order_failed(&mut order, &format!("Payment failed. {}", message))
                .await?;
            self.locks.unlock(order.id).await;
            return Ok(self.settings.checkout_url.clone());
        }

        self.locks.unlock(order.id).await;
        Ok(self.return_url(&order))
    }

    /// Fails the order unless an earlier failure was marked final, in
    /// which case only a note is appended.
    pub async fn mark_order_failed(&self, order: &mut Order, message: &str) -> DomainResult<()> {
        if order.payment.status_final {
            order.add_note(message);
        } else {
            order.update_status(OrderStatus::Failed, Some(message));
            order.payment.status_final = true;
        }
        self.store.save(order).await
    }

    /// The concrete charge behind an intent: the embedded list's last
    /// element, a fetch by id when expansion changed the response shape,
    /// or an intent-shaped stand-in for flows with no charge yet (bank
    /// transfers awaiting funding).
    pub async fn resolve_latest_charge(&self, intent: &PaymentIntent) -> DomainResult<Charge> {
        if let Some(charge) = intent.embedded_latest_charge() {
            return Ok(charge.clone());
        }
        if let Some(charge) = intent
            .latest_charge
            .as_ref()
            .and_then(|expandable| expandable.as_object())
        {
            return Ok(charge.clone());
        }
        if let Some(charge_id) = intent.latest_charge_id() {
            return self.gateway.retrieve_charge(charge_id, false).await;
        }

        Ok(Charge {
            id: intent.id.clone(),
            amount: intent.amount,
            currency: intent.currency.clone(),
            status: intent.status.clone(),
            captured: false,
            ..Default::default()
        })
    }

    /// The shared finalize: applies a charge result to the order.
    ///
    /// Safe to invoke twice with the same terminal charge: a settled order
    /// with a matching transaction id short-circuits before any
    /// money-affecting side effect.
    pub async fn process_response(&self, charge: &Charge, order: &mut Order) -> DomainResult<()> {
        if order.has_status(&[OrderStatus::Processing, OrderStatus::Completed])
            && order.payment.transaction_id.as_deref() == Some(charge.id.as_str())
        {
            debug!(
                "Duplicate finalize for order {} (charge {}), nothing to do",
                order.id, charge.id
            );
            return Ok(());
        }

        let captured = charge.captured;
        order.payment.charge_captured = Some(captured);

        if let Some(balance_transaction) = charge.balance_transaction_id() {
            let balance_transaction = balance_transaction.to_string();
            self.update_fees(order, &balance_transaction).await;
        }

        if let Some(mandate) = charge
            .payment_method_details
            .as_ref()
            .and_then(|details| details.card.as_ref())
            .and_then(|card| card.mandate.clone())
        {
            order.payment.mandate_id = Some(mandate);
        }

        if captured {
            match charge.status.as_str() {
                // Captured but pending: asynchronous methods take days to
                // clear; the webhook finishes the job.
                "pending" => {
                    self.reduce_stock_once(order).await?;
                    order.set_transaction_id(&charge.id);
                    order.update_status(
                        OrderStatus::OnHold,
                        Some(&format!("Stripe charge awaiting payment: {}.", charge.id)),
                    );
                }
                "succeeded" => {
                    info!("Payment successful Order id - {}", order.id);
                    order.payment_complete(&charge.id)?;

                    let source = charge
                        .payment_method_type()
                        .map(capitalize)
                        .unwrap_or_default();
                    order.add_note(format!(
                        "Payment Status: Succeeded, Source: Payment is Completed via {}",
                        source
                    ));
                }
                "failed" => {
                    let message = "Payment processing failed. Please retry.";
                    order.add_note(message);
                    self.store.save(order).await?;
                    return Err(DomainError::Stripe {
                        kind: "charge_failed".to_string(),
                        code: None,
                        message: message.to_string(),
                    });
                }
                _ => {}
            }
        } else {
            order.set_transaction_id(&charge.id);
            if order.has_status(&[OrderStatus::Pending, OrderStatus::Failed]) {
                self.reduce_stock_once(order).await?;
            }
            order.update_status(
                OrderStatus::OnHold,
                Some(&format!(
                    "Stripe charge authorized (Charge ID: {}). Process order to take payment, or cancel to remove the pre-authorization.",
                    charge.id
                )),
            );
        }

        self.store.save(order).await
    }

    async fn reduce_stock_once(&self, order: &mut Order) -> DomainResult<()> {
        if order.payment.stock_reduced {
            return Ok(());
        }
        self.store.reduce_stock(order.id).await?;
        order.payment.stock_reduced = true;
        Ok(())
    }

    /// Accumulates Stripe fee/net from a balance transaction. Fees come
    /// from Stripe because they are denominated in the Stripe account
    /// currency, not the shop's. Failures only log; fee bookkeeping never
    /// blocks reconciliation.
    pub async fn update_fees(&self, order: &mut Order, balance_transaction_id: &str) {
        match self
            .gateway
            .retrieve_balance_transaction(balance_transaction_id)
            .await
        {
            Ok(txn) => {
                let fee = from_minor_units(txn.fee, &txn.currency);
                let net = from_minor_units(txn.net, &txn.currency);

                order.payment.fee = Some(order.payment.fee.unwrap_or_default() + fee);
                order.payment.net = Some(order.payment.net.unwrap_or_default() + net);
                order.payment.stripe_currency = Some(txn.currency.to_uppercase());

                if let Err(err) = self.store.save(order).await {
                    error!("Failed to persist fees for order {}: {}", order.id, err);
                }
            }
            Err(_) => {
                info!("Unable to update fees/net meta for order: {}", order.id);
            }
        }
    }

    async fn maybe_save_payment_method(&self, order: &Order, intent: &PaymentIntent) {
        if !self.settings.saved_cards {
            return;
        }
        let Some(user_id) = order.user_id else {
            return;
        };

        let method_id = match intent.payment_method.as_ref() {
            Some(expandable) => match expandable.as_object() {
                Some(method) => method.id.clone(),
                None => expandable.as_id().unwrap_or_default().to_string(),
            },
            None => return,
        };

        match self.gateway.retrieve_payment_method(&method_id).await {
            Ok(method) if method.kind == "card" => {
                let card = method.card.unwrap_or_default();
                let token = PaymentTokenRecord {
                    payment_method_id: method.id,
                    brand: card.brand,
                    last4: card.last4,
                    exp_month: card.exp_month,
                    exp_year: card.exp_year,
                };
                if let Err(err) = self.store.save_payment_token(user_id, token).await {
                    error!("Failed to save payment token for user {}: {}", user_id, err);
                }
            }
            Ok(_) => {}
            Err(err) => {
                error!(
                    "Error retrieving the selected payment method for saving: {}",
                    err
                );
            }
        }
    }

    /// The intent handle stored on the order, when Stripe still knows it.
    pub async fn intent_from_order(&self, order: &Order) -> Option<IntentHandle> {
        if let Some(intent_id) = &order.payment.intent_id {
            match self.gateway.retrieve_payment_intent(intent_id).await {
                Ok(intent) => return Some(IntentHandle::Payment(intent)),
                Err(err) => {
                    info!("Failed to get Stripe intent {}: {}", intent_id, err);
                    return None;
                }
            }
        }

        if let Some(setup_intent_id) = &order.payment.setup_intent_id {
            match self.gateway.retrieve_setup_intent(setup_intent_id).await {
                Ok(intent) => return Some(IntentHandle::Setup(intent)),
                Err(err) => {
                    info!("Failed to get Stripe setup intent {}: {}", setup_intent_id, err);
                    return None;
                }
            }
        }

        None
    }

    /// Refunds a charge. Uncaptured intents are cancelled instead, which
    /// voids the pre-authorization and cancels the order.
    pub async fn process_refund(
        &self,
        order_id: u64,
        amount: Option<rust_decimal::Decimal>,
        reason: &str,
    ) -> DomainResult<bool> {
        let Some(mut order) = self.store.find_by_id(order_id).await? else {
            return Ok(false);
        };

        let Some(charge_id) = order.payment.transaction_id.clone() else {
            return Ok(false);
        };

        let captured = order.payment.charge_captured == Some(true);

        info!(
            "Beginning refund for order {} (charge {}) for the amount of {:?}",
            order.id, charge_id, amount
        );

        let mut request = RefundRequest {
            charge: charge_id,
            // An authorized-only charge is voided in full; no amount.
            amount: captured
                .then(|| amount.map(|value| to_minor_units(value, &order.currency)))
                .flatten(),
            metadata: Default::default(),
        };
        if !reason.is_empty() {
            request
                .metadata
                .insert("reason".to_string(), truncate_reason(reason));
        }

        // An intent pending capture must be cancelled, not refunded.
        let mut refund = None;
        if let Some(IntentHandle::Payment(intent)) = self.intent_from_order(&order).await {
            if intent.status == "requires_capture" {
                let cancelled = self.gateway.cancel_payment_intent(&intent.id).await?;
                refund = cancelled
                    .embedded_latest_charge()
                    .and_then(|charge| charge.refunds.as_ref())
                    .and_then(|refunds| refunds.data.last())
                    .cloned();
            }
        }

        let refund = match refund {
            Some(refund) => refund,
            None if captured => self.gateway.create_refund(request).await?,
            None => {
                // Nothing was cancelled and nothing was captured; there is
                // no money to move.
                return Ok(false);
            }
        };

        let formatted = from_minor_units(refund.amount, &order.currency);

        if !captured {
            order.add_note(format!("Pre-Authorization for {} voided.", formatted));
            order.update_status(OrderStatus::Cancelled, None);
            self.store.save(&order).await?;

            if amount.is_some() {
                return Err(DomainError::ValidationError(
                    "The authorization was voided and the order cancelled.".to_string(),
                ));
            }
            return Ok(false);
        }

        order.payment.refund_id = Some(refund.id.clone());

        if let Some(balance_transaction) = &refund.balance_transaction {
            let balance_transaction = balance_transaction.clone();
            self.update_fees(&mut order, &balance_transaction).await;
        }

        order.add_note(format!(
            "Refunded {} - Refund ID: {} - Reason: {}",
            formatted, refund.id, reason
        ));
        self.store.save(&order).await?;

        Ok(true)
    }
}

/// The payment intent a session resolved to: directly, or through its
/// invoice for subscription-backed sessions.
pub fn resolve_session_intent(session: &CheckoutSession) -> DomainResult<PaymentIntent> {
    if let Some(intent) = session
        .payment_intent
        .as_ref()
        .and_then(|expandable| expandable.as_object())
    {
        return Ok(intent.clone());
    }

    if let Some(intent) = session
        .invoice
        .as_ref()
        .and_then(|expandable| expandable.as_object())
        .and_then(|invoice| invoice.payment_intent.as_ref())
        .and_then(|expandable| expandable.as_object())
    {
        return Ok(intent.clone());
    }

    Err(DomainError::InternalError(format!(
        "checkout session {} did not resolve a payment intent",
        session.id
    )))
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Stripe caps metadata values at 500 characters.
fn truncate_reason(reason: &str) -> String {
    if reason.len() <= 500 {
        return reason.to_string();
    }
    let truncated: String = reason.chars().take(450).collect();
    format!("{}... [See shop order page for full text.]", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dto::{CreateCheckoutRequest, VerifyQuery};
    use crate::application::test_support::*;
    use crate::infrastructure::adapters::transient_lock::TransientLockStore;
    use crate::ports::stripe_gateway_port::{
        ApiList, BalanceTransaction, Customer, CustomerTax, Expandable, LastPaymentError,
        NextAction, RedirectToUrl, Refund,
    };
    use crate::ports::{NoExtensions, NoSubscriptions};
    use rust_decimal_macros::dec;

    type Service = PaymentService<MockGateway, InMemoryOrderStore, TransientLockStore>;

    fn service(
        gateway: Arc<MockGateway>,
        store: Arc<InMemoryOrderStore>,
        settings: StripeSettings,
    ) -> (Service, Arc<TransientLockStore>) {
        let locks = Arc::new(TransientLockStore::new());
        let service = PaymentService::new(
            gateway,
            store,
            locks.clone(),
            Arc::new(settings),
            Arc::new(NoSubscriptions),
            Arc::new(NoExtensions),
        );
        (service, locks)
    }

    fn checkout_request(order_id: u64) -> CreateCheckoutRequest {
        CreateCheckoutRequest {
            order_id,
            express_checkout: false,
            save_payment_method: false,
        }
    }

    fn succeeded_intent(id: &str, charge: Charge) -> PaymentIntent {
        PaymentIntent {
            id: id.to_string(),
            status: "succeeded".to_string(),
            amount: 2500,
            currency: "usd".to_string(),
            charges: Some(ApiList { data: vec![charge] }),
            ..Default::default()
        }
    }

    fn verify_query(service: &Service, order: &Order, session_id: &str) -> VerifyQuery {
        let nonce = create_redirect_nonce(
            service.settings().secret_key(),
            order.id,
            &order.order_key,
        );
        VerifyQuery {
            order: order.id,
            key: order.order_key.clone(),
            session_id: session_id.to_string(),
            nonce,
            save_payment_method: None,
        }
    }

    #[tokio::test]
    async fn test_process_payment_happy_path() {
        let order = test_order(100, dec!(25.00));
        let session = test_session("cs_test_1", &order);
        let gateway = Arc::new(MockGateway::default());
        gateway
            .create_customer_responses
            .lock()
            .unwrap()
            .push_back(Ok(Customer {
                id: "cus_1".to_string(),
                tax: None,
            }));
        gateway
            .create_session_responses
            .lock()
            .unwrap()
            .push_back(Ok(session));
        let store = Arc::new(InMemoryOrderStore::with_order(order));
        let (service, _) = service(gateway.clone(), store.clone(), StripeSettings::for_tests());

        let response = service.process_payment(checkout_request(100)).await.unwrap();

        assert_eq!(response.result, "success");
        assert_eq!(
            response.redirect.as_deref(),
            Some("https://checkout.stripe.com/c/pay/cs_test_1")
        );

        let requests = gateway.session_requests.lock().unwrap();
        assert_eq!(requests[0].customer.as_deref(), Some("cus_1"));
        assert_eq!(requests[0].metadata["order_id"], "100");
        assert!(requests[0].success_url.contains("session_id={CHECKOUT_SESSION_ID}"));
        assert!(requests[0].success_url.contains("nonce="));
        assert_eq!(store.order(100).payment.customer_id.as_deref(), Some("cus_1"));
    }

    #[tokio::test]
    async fn test_minimum_amount_enforcement() {
        let gateway = Arc::new(MockGateway::default());
        let store = Arc::new(InMemoryOrderStore::with_order(test_order(100, dec!(0.49))));
        let (service, _) = service(gateway.clone(), store.clone(), StripeSettings::for_tests());

        let response = service.process_payment(checkout_request(100)).await.unwrap();

        assert_eq!(response.result, "fail");
        assert!(response.message.unwrap().contains("minimum allowed order total"));
        assert!(gateway.session_requests.lock().unwrap().is_empty());
        assert_eq!(store.order(100).status, OrderStatus::Pending);

        // 0.50 is exactly the floor and proceeds.
        let order = test_order(101, dec!(0.50));
        let session = test_session("cs_test_2", &order);
        gateway
            .create_customer_responses
            .lock()
            .unwrap()
            .push_back(Ok(Customer::default()));
        gateway
            .create_session_responses
            .lock()
            .unwrap()
            .push_back(Ok(session));
        store.save(&order).await.unwrap();

        let response = service.process_payment(checkout_request(101)).await.unwrap();
        assert_eq!(response.result, "success");
    }

    #[tokio::test]
    async fn test_customer_self_heal_replaces_stale_id() {
        let mut order = test_order(100, dec!(25.00));
        order.user_id = Some(9);
        order.payment.customer_id = Some("cus_stale".to_string());
        let session = test_session("cs_test_1", &order);

        let gateway = Arc::new(MockGateway::default());
        gateway
            .create_session_responses
            .lock()
            .unwrap()
            .push_back(Err(MockGateway::no_such_customer()));
        gateway
            .create_customer_responses
            .lock()
            .unwrap()
            .push_back(Ok(Customer {
                id: "cus_new".to_string(),
                tax: None,
            }));
        gateway
            .create_session_responses
            .lock()
            .unwrap()
            .push_back(Ok(session));

        let store = Arc::new(InMemoryOrderStore::with_order(order));
        store
            .user_customers
            .lock()
            .unwrap()
            .insert(9, "cus_stale".to_string());
        let (service, _) = service(gateway.clone(), store.clone(), StripeSettings::for_tests());

        let response = service.process_payment(checkout_request(100)).await.unwrap();

        assert_eq!(response.result, "success");
        assert_eq!(store.order(100).payment.customer_id.as_deref(), Some("cus_new"));
        assert_eq!(
            store.user_customers.lock().unwrap().get(&9).map(String::as_str),
            Some("cus_new")
        );

        let requests = gateway.session_requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].customer.as_deref(), Some("cus_stale"));
        assert_eq!(requests[1].customer.as_deref(), Some("cus_new"));
    }

    #[tokio::test]
    async fn test_second_no_such_customer_surfaces_as_failure() {
        let mut order = test_order(100, dec!(25.00));
        order.payment.customer_id = Some("cus_stale".to_string());

        let gateway = Arc::new(MockGateway::default());
        gateway
            .create_session_responses
            .lock()
            .unwrap()
            .push_back(Err(MockGateway::no_such_customer()));
        gateway
            .create_customer_responses
            .lock()
            .unwrap()
            .push_back(Ok(Customer {
                id: "cus_new".to_string(),
                tax: None,
            }));
        gateway
            .create_session_responses
            .lock()
            .unwrap()
            .push_back(Err(MockGateway::no_such_customer()));

        let store = Arc::new(InMemoryOrderStore::with_order(order));
        let (service, _) = service(gateway.clone(), store.clone(), StripeSettings::for_tests());

        let response = service.process_payment(checkout_request(100)).await.unwrap();

        // No third attempt: the error surfaces instead of looping.
        assert_eq!(response.result, "fail");
        assert_eq!(gateway.session_requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_processor_error_returns_failed_result() {
        let order = test_order(100, dec!(25.00));
        let gateway = Arc::new(MockGateway::default());
        gateway
            .create_customer_responses
            .lock()
            .unwrap()
            .push_back(Ok(Customer::default()));
        gateway
            .create_session_responses
            .lock()
            .unwrap()
            .push_back(Err(MockGateway::stripe_error("card_error", "Your card was declined.")));

        let store = Arc::new(InMemoryOrderStore::with_order(order));
        let (service, _) = service(gateway, store.clone(), StripeSettings::for_tests());

        let response = service.process_payment(checkout_request(100)).await.unwrap();

        assert_eq!(response.result, "fail");
        assert_eq!(response.message.as_deref(), Some("Your card was declined."));
        assert_eq!(store.order(100).status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_tax_ineligible_customer_is_stripped_from_session() {
        let order = test_order(100, dec!(25.00));
        let session = test_session("cs_test_1", &order);
        let mut settings = StripeSettings::for_tests();
        settings.enable_auto_tax = true;

        let gateway = Arc::new(MockGateway::default());
        gateway
            .create_customer_responses
            .lock()
            .unwrap()
            .push_back(Ok(Customer {
                id: "cus_1".to_string(),
                tax: None,
            }));
        gateway
            .customer_tax_responses
            .lock()
            .unwrap()
            .push_back(Ok(Customer {
                id: "cus_1".to_string(),
                tax: Some(CustomerTax {
                    automatic_tax: "unrecognized_location".to_string(),
                }),
            }));
        gateway
            .create_session_responses
            .lock()
            .unwrap()
            .push_back(Ok(session));

        let store = Arc::new(InMemoryOrderStore::with_order(order));
        let (service, _) = service(gateway.clone(), store, settings);

        let response = service.process_payment(checkout_request(100)).await.unwrap();
        assert_eq!(response.result, "success");

        let requests = gateway.session_requests.lock().unwrap();
        assert!(requests[0].customer.is_none());
        assert!(requests[0].customer_update.is_none());
        assert_eq!(requests[0].customer_creation.as_deref(), Some("if_required"));
        assert!(requests[0].automatic_tax.is_some());
    }

    #[tokio::test]
    async fn test_verify_happy_path_completes_order() {
        let order = test_order(100, dec!(25.00));
        let gateway = Arc::new(MockGateway::default());
        let mut session = test_session("cs_test_1", &order);
        session.payment_intent = Some(Expandable::Object(Box::new(succeeded_intent(
            "pi_1",
            succeeded_charge("ch_1"),
        ))));
        gateway
            .retrieve_session_responses
            .lock()
            .unwrap()
            .push_back(Ok(session));

        let store = Arc::new(InMemoryOrderStore::with_order(order.clone()));
        let (service, locks) = service(gateway, store.clone(), StripeSettings::for_tests());

        let redirect = service
            .verify_session_checkout(verify_query(&service, &order, "cs_test_1"))
            .await
            .unwrap();

        assert!(redirect.starts_with("https://shop.example/order-received"));

        let saved = store.order(100);
        assert_eq!(saved.status, OrderStatus::Processing);
        assert_eq!(saved.payment.transaction_id.as_deref(), Some("ch_1"));
        assert_eq!(saved.payment.intent_id.as_deref(), Some("pi_1"));
        assert_eq!(saved.payment.charge_captured, Some(true));

        // The lock was released at the end of the finalize.
        assert!(!locks.lock(100, Some("pi_1")).await);
    }

    #[tokio::test]
    async fn test_verify_rejects_bad_nonce_and_key() {
        let order = test_order(100, dec!(25.00));
        let gateway = Arc::new(MockGateway::default());
        let store = Arc::new(InMemoryOrderStore::with_order(order.clone()));
        let (service, _) = service(gateway, store.clone(), StripeSettings::for_tests());

        let mut query = verify_query(&service, &order, "cs_test_1");
        query.nonce = "deadbeef".to_string();
        let err = service.verify_session_checkout(query).await.unwrap_err();
        assert!(matches!(err, DomainError::SignatureVerificationFailed));

        let mut query = verify_query(&service, &order, "cs_test_1");
        query.key = "order_wrong".to_string();
        let err = service.verify_session_checkout(query).await.unwrap_err();
        assert!(matches!(err, DomainError::SignatureVerificationFailed));

        assert_eq!(store.order(100).status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_verify_zero_total_completes_directly() {
        let order = test_order(100, dec!(0.00));
        let gateway = Arc::new(MockGateway::default());
        let mut session = test_session("cs_free", &order);
        session.amount_total = Some(0);
        gateway
            .retrieve_session_responses
            .lock()
            .unwrap()
            .push_back(Ok(session));

        let store = Arc::new(InMemoryOrderStore::with_order(order.clone()));
        let (service, _) = service(gateway, store.clone(), StripeSettings::for_tests());

        let redirect = service
            .verify_session_checkout(verify_query(&service, &order, "cs_free"))
            .await
            .unwrap();

        assert!(redirect.starts_with("https://shop.example/order-received"));
        let saved = store.order(100);
        assert_eq!(saved.status, OrderStatus::Processing);
        assert_eq!(saved.payment.transaction_id.as_deref(), Some("cs_free"));
    }

    #[tokio::test]
    async fn test_verify_requires_action_redirects_without_mutation() {
        let order = test_order(100, dec!(25.00));
        let gateway = Arc::new(MockGateway::default());
        let mut intent = PaymentIntent {
            id: "pi_1".to_string(),
            status: "requires_action".to_string(),
            ..Default::default()
        };
        intent.next_action = Some(NextAction {
            kind: "redirect_to_url".to_string(),
            redirect_to_url: Some(RedirectToUrl {
                url: Some("https://hooks.stripe.com/redirect/pi_1".to_string()),
            }),
        });
        let mut session = test_session("cs_test_1", &order);
        session.payment_intent = Some(Expandable::Object(Box::new(intent)));
        gateway
            .retrieve_session_responses
            .lock()
            .unwrap()
            .push_back(Ok(session));

        let store = Arc::new(InMemoryOrderStore::with_order(order.clone()));
        let (service, locks) = service(gateway, store.clone(), StripeSettings::for_tests());

        let redirect = service
            .verify_session_checkout(verify_query(&service, &order, "cs_test_1"))
            .await
            .unwrap();

        assert_eq!(redirect, "https://hooks.stripe.com/redirect/pi_1");
        assert_eq!(store.order(100).status, OrderStatus::Pending);
        assert!(!locks.lock(100, Some("pi_1")).await);
    }

    #[tokio::test]
    async fn test_verify_payment_error_fails_order_and_redirects_to_checkout() {
        let order = test_order(100, dec!(25.00));
        let gateway = Arc::new(MockGateway::default());
        let mut intent = succeeded_intent("pi_1", succeeded_charge("ch_1"));
        intent.status = "requires_payment_method".to_string();
        intent.last_payment_error = Some(LastPaymentError {
            code: Some("card_declined".to_string()),
            message: Some("raw decline".to_string()),
        });
        let mut session = test_session("cs_test_1", &order);
        session.payment_intent = Some(Expandable::Object(Box::new(intent)));
        gateway
            .retrieve_session_responses
            .lock()
            .unwrap()
            .push_back(Ok(session));

        let store = Arc::new(InMemoryOrderStore::with_order(order.clone()));
        let (service, _) = service(gateway, store.clone(), StripeSettings::for_tests());

        let redirect = service
            .verify_session_checkout(verify_query(&service, &order, "cs_test_1"))
            .await
            .unwrap();

        assert_eq!(redirect, "https://shop.example/checkout");
        let saved = store.order(100);
        assert_eq!(saved.status, OrderStatus::Failed);
        assert!(saved
            .notes
            .iter()
            .any(|note| note.text.contains("The card has been declined.")));
    }

    #[tokio::test]
    async fn test_verify_lock_contention_short_circuits() {
        let order = test_order(100, dec!(25.00));
        let gateway = Arc::new(MockGateway::default());
        let mut session = test_session("cs_test_1", &order);
        session.payment_intent = Some(Expandable::Object(Box::new(succeeded_intent(
            "pi_1",
            succeeded_charge("ch_1"),
        ))));
        gateway
            .retrieve_session_responses
            .lock()
            .unwrap()
            .push_back(Ok(session));

        let store = Arc::new(InMemoryOrderStore::with_order(order.clone()));
        let (service, locks) = service(gateway, store.clone(), StripeSettings::for_tests());

        // A webhook is already finalizing this intent.
        assert!(!locks.lock(100, Some("pi_1")).await);

        let redirect = service
            .verify_session_checkout(verify_query(&service, &order, "cs_test_1"))
            .await
            .unwrap();

        assert!(redirect.starts_with("https://shop.example/order-received"));
        let saved = store.order(100);
        assert_eq!(saved.status, OrderStatus::Pending);
        assert!(saved.payment.transaction_id.is_none());
        assert_eq!(store.stock_reduction_count(100), 0);
    }

    #[tokio::test]
    async fn test_process_response_is_idempotent_for_succeeded_charge() {
        let order = test_order(100, dec!(25.00));
        let gateway = Arc::new(MockGateway::default());
        let mut charge = succeeded_charge("ch_1");
        charge.balance_transaction = Some(Expandable::Id("txn_1".to_string()));
        gateway
            .balance_transaction_responses
            .lock()
            .unwrap()
            .push_back(Ok(BalanceTransaction {
                id: "txn_1".to_string(),
                fee: 59,
                net: 2441,
                currency: "usd".to_string(),
            }));

        let store = Arc::new(InMemoryOrderStore::with_order(order));
        let (service, _) = service(gateway, store.clone(), StripeSettings::for_tests());

        let mut order = store.order(100);
        service.process_response(&charge, &mut order).await.unwrap();

        let after_first = store.order(100);
        assert_eq!(after_first.status, OrderStatus::Processing);
        assert_eq!(after_first.payment.fee, Some(dec!(0.59)));
        assert_eq!(after_first.payment.net, Some(dec!(24.41)));
        let notes_after_first = after_first.notes.len();

        // Second delivery of the same terminal charge: nothing changes,
        // and crucially no second balance-transaction fetch happens (the
        // scripted queue is empty and would error).
        let mut order = store.order(100);
        service.process_response(&charge, &mut order).await.unwrap();

        let after_second = store.order(100);
        assert_eq!(after_second.status, OrderStatus::Processing);
        assert_eq!(after_second.payment.fee, Some(dec!(0.59)));
        assert_eq!(after_second.payment.net, Some(dec!(24.41)));
        assert_eq!(after_second.notes.len(), notes_after_first);
        assert_eq!(store.stock_reduction_count(100), 0);
    }

    #[tokio::test]
    async fn test_process_response_pending_charge_goes_on_hold_and_reduces_stock_once() {
        let order = test_order(100, dec!(25.00));
        let gateway = Arc::new(MockGateway::default());
        let mut charge = succeeded_charge("ch_1");
        charge.status = "pending".to_string();

        let store = Arc::new(InMemoryOrderStore::with_order(order));
        let (service, _) = service(gateway, store.clone(), StripeSettings::for_tests());

        let mut order = store.order(100);
        service.process_response(&charge, &mut order).await.unwrap();

        let saved = store.order(100);
        assert_eq!(saved.status, OrderStatus::OnHold);
        assert_eq!(saved.payment.transaction_id.as_deref(), Some("ch_1"));
        assert!(saved.payment.stock_reduced);
        assert_eq!(store.stock_reduction_count(100), 1);

        // Retried finalize while still pending must not decrement again.
        let mut order = store.order(100);
        service.process_response(&charge, &mut order).await.unwrap();
        assert_eq!(store.stock_reduction_count(100), 1);
    }

    #[tokio::test]
    async fn test_process_response_uncaptured_charge_authorizes_on_hold() {
        let order = test_order(100, dec!(25.00));
        let gateway = Arc::new(MockGateway::default());
        let mut charge = succeeded_charge("ch_1");
        charge.captured = false;

        let store = Arc::new(InMemoryOrderStore::with_order(order));
        let (service, _) = service(gateway, store.clone(), StripeSettings::for_tests());

        let mut order = store.order(100);
        service.process_response(&charge, &mut order).await.unwrap();

        let saved = store.order(100);
        assert_eq!(saved.status, OrderStatus::OnHold);
        assert_eq!(saved.payment.charge_captured, Some(false));
        assert!(saved.notes.iter().any(|note| note.text.contains("authorized")));
        assert_eq!(store.stock_reduction_count(100), 1);
    }

    #[tokio::test]
    async fn test_process_response_failed_charge_errors_with_note() {
        let order = test_order(100, dec!(25.00));
        let gateway = Arc::new(MockGateway::default());
        let mut charge = succeeded_charge("ch_1");
        charge.status = "failed".to_string();

        let store = Arc::new(InMemoryOrderStore::with_order(order));
        let (service, _) = service(gateway, store.clone(), StripeSettings::for_tests());

        let mut order = store.order(100);
        let err = service.process_response(&charge, &mut order).await.unwrap_err();

        assert!(matches!(err, DomainError::Stripe { .. }));
        assert!(store
            .order(100)
            .notes
            .iter()
            .any(|note| note.text.contains("Payment processing failed")));
    }

    #[tokio::test]
    async fn test_create_payment_intent_annotates_order_and_reuses_intent() {
        let order = test_order(100, dec!(25.00));
        let gateway = Arc::new(MockGateway::default());
        gateway
            .create_customer_responses
            .lock()
            .unwrap()
            .push_back(Ok(Customer {
                id: "cus_1".to_string(),
                tax: None,
            }));
        gateway
            .create_intent_responses
            .lock()
            .unwrap()
            .push_back(Ok(PaymentIntent {
                id: "pi_1".to_string(),
                client_secret: Some("pi_1_secret".to_string()),
                status: "requires_payment_method".to_string(),
                amount: 2500,
                currency: "usd".to_string(),
                ..Default::default()
            }));

        let store = Arc::new(InMemoryOrderStore::with_order(order));
        let (service, _) = service(gateway.clone(), store.clone(), StripeSettings::for_tests());

        let request = CreateIntentRequest {
            order_id: 100,
            express_checkout: false,
            save_payment_method: false,
        };
        let response = service.create_payment_intent(request).await.unwrap();

        assert_eq!(response.intent_id, "pi_1");
        assert_eq!(response.publishable_key, "pk_test_x");
        let saved = store.order(100);
        assert_eq!(saved.payment.intent_id.as_deref(), Some("pi_1"));
        assert!(saved.notes.iter().any(|note| note.text.contains("pi_1")));

        // Second call finds the stored intent unchanged: no new create,
        // no update round trip.
        gateway
            .retrieve_intent_responses
            .lock()
            .unwrap()
            .push_back(Ok(PaymentIntent {
                id: "pi_1".to_string(),
                status: "requires_payment_method".to_string(),
                amount: 2500,
                currency: "usd".to_string(),
                ..Default::default()
            }));
        let request = CreateIntentRequest {
            order_id: 100,
            express_checkout: false,
            save_payment_method: false,
        };
        let response = service.create_payment_intent(request).await.unwrap();
        assert_eq!(response.intent_id, "pi_1");
        assert_eq!(gateway.intent_requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_process_refund_records_refund_and_fees() {
        let mut order = test_order(100, dec!(25.00));
        order.payment.transaction_id = Some("ch_1".to_string());
        order.payment.charge_captured = Some(true);
        order.payment.intent_id = Some("pi_1".to_string());

        let gateway = Arc::new(MockGateway::default());
        gateway
            .retrieve_intent_responses
            .lock()
            .unwrap()
            .push_back(Ok(PaymentIntent {
                id: "pi_1".to_string(),
                status: "succeeded".to_string(),
                ..Default::default()
            }));
        gateway
            .create_refund_responses
            .lock()
            .unwrap()
            .push_back(Ok(Refund {
                id: "re_1".to_string(),
                amount: 1000,
                balance_transaction: Some("txn_2".to_string()),
                ..Default::default()
            }));
        gateway
            .balance_transaction_responses
            .lock()
            .unwrap()
            .push_back(Ok(BalanceTransaction {
                id: "txn_2".to_string(),
                fee: -29,
                net: -971,
                currency: "usd".to_string(),
            }));

        let store = Arc::new(InMemoryOrderStore::with_order(order));
        let (service, _) = service(gateway.clone(), store.clone(), StripeSettings::for_tests());

        let refunded = service
            .process_refund(100, Some(dec!(10.00)), "Requested by customer")
            .await
            .unwrap();

        assert!(refunded);
        let saved = store.order(100);
        assert_eq!(saved.payment.refund_id.as_deref(), Some("re_1"));
        assert_eq!(saved.payment.fee, Some(dec!(-0.29)));
        assert!(saved.notes.iter().any(|note| note.text.contains("Refund ID: re_1")));
        assert_eq!(
            gateway.refund_requests.lock().unwrap()[0].amount,
            Some(1000)
        );
    }

    #[tokio::test]
    async fn test_process_refund_voids_uncaptured_authorization() {
        let mut order = test_order(100, dec!(25.00));
        order.payment.transaction_id = Some("ch_1".to_string());
        order.payment.charge_captured = Some(false);
        order.payment.intent_id = Some("pi_1".to_string());

        let gateway = Arc::new(MockGateway::default());
        gateway
            .retrieve_intent_responses
            .lock()
            .unwrap()
            .push_back(Ok(PaymentIntent {
                id: "pi_1".to_string(),
                status: "requires_capture".to_string(),
                ..Default::default()
            }));
        let cancelled_charge = Charge {
            id: "ch_1".to_string(),
            refunds: Some(ApiList {
                data: vec![Refund {
                    id: "re_void".to_string(),
                    amount: 2500,
                    ..Default::default()
                }],
            }),
            ..Default::default()
        };
        gateway
            .cancel_intent_responses
            .lock()
            .unwrap()
            .push_back(Ok(PaymentIntent {
                id: "pi_1".to_string(),
                status: "canceled".to_string(),
                charges: Some(ApiList {
                    data: vec![cancelled_charge],
                }),
                ..Default::default()
            }));

        let store = Arc::new(InMemoryOrderStore::with_order(order));
        let (service, _) = service(gateway, store.clone(), StripeSettings::for_tests());

        let refunded = service.process_refund(100, None, "").await.unwrap();

        assert!(!refunded);
        let saved = store.order(100);
        assert_eq!(saved.status, OrderStatus::Cancelled);
        assert!(saved
            .notes
            .iter()
            .any(|note| note.text.contains("Pre-Authorization for 25.00 voided.")));
    }

    #[tokio::test]
    async fn test_intent_from_order_falls_back_to_setup_intent() {
        let mut order = test_order(100, dec!(0.00));
        order.payment.setup_intent_id = Some("seti_1".to_string());

        let gateway = Arc::new(MockGateway::default());
        gateway
            .retrieve_setup_intent_responses
            .lock()
            .unwrap()
            .push_back(Ok(crate::ports::stripe_gateway_port::SetupIntent {
                id: "seti_1".to_string(),
                status: "succeeded".to_string(),
                ..Default::default()
            }));

        let store = Arc::new(InMemoryOrderStore::with_order(order.clone()));
        let (service, _) = service(gateway, store, StripeSettings::for_tests());

        match service.intent_from_order(&order).await {
            Some(IntentHandle::Setup(intent)) => assert_eq!(intent.id, "seti_1"),
            _ => panic!("expected a setup intent handle"),
        }
    }

    #[tokio::test]
    async fn test_verify_with_save_payment_method_stores_card_token() {
        let mut order = test_order(100, dec!(25.00));
        order.user_id = Some(9);
        let mut settings = StripeSettings::for_tests();
        settings.saved_cards = true;

        let gateway = Arc::new(MockGateway::default());
        let mut intent = succeeded_intent("pi_1", succeeded_charge("ch_1"));
        intent.payment_method = Some(Expandable::Id("pm_1".to_string()));
        let mut session = test_session("cs_test_1", &order);
        session.payment_intent = Some(Expandable::Object(Box::new(intent)));
        gateway
            .retrieve_session_responses
            .lock()
            .unwrap()
            .push_back(Ok(session));
        gateway
            .payment_method_responses
            .lock()
            .unwrap()
            .push_back(Ok(crate::ports::stripe_gateway_port::PaymentMethod {
                id: "pm_1".to_string(),
                kind: "card".to_string(),
                card: Some(crate::ports::stripe_gateway_port::CardSummary {
                    brand: "visa".to_string(),
                    last4: "4242".to_string(),
                    exp_month: 4,
                    exp_year: 2030,
                }),
            }));

        let store = Arc::new(InMemoryOrderStore::with_order(order.clone()));
        let (service, _) = service(gateway, store.clone(), settings);

        let mut query = verify_query(&service, &order, "cs_test_1");
        query.save_payment_method = Some("yes".to_string());
        service.verify_session_checkout(query).await.unwrap();

        let tokens = store.tokens.lock().unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].0, 9);
        assert_eq!(tokens[0].1.payment_method_id, "pm_1");
        assert_eq!(tokens[0].1.last4, "4242");
    }

    #[tokio::test]
    async fn test_update_fees_accumulates_additively() {
        let order = test_order(100, dec!(25.00));
        let gateway = Arc::new(MockGateway::default());
        for (fee, net) in [(59, 2441), (-29, -971)] {
            gateway
                .balance_transaction_responses
                .lock()
                .unwrap()
                .push_back(Ok(BalanceTransaction {
                    id: "txn".to_string(),
                    fee,
                    net,
                    currency: "usd".to_string(),
                }));
        }

        let store = Arc::new(InMemoryOrderStore::with_order(order));
        let (service, _) = service(gateway, store.clone(), StripeSettings::for_tests());

        let mut order = store.order(100);
        service.update_fees(&mut order, "txn_1").await;
        service.update_fees(&mut order, "txn_2").await;

        let saved = store.order(100);
        assert_eq!(saved.payment.fee, Some(dec!(0.30)));
        assert_eq!(saved.payment.net, Some(dec!(14.70)));
        assert_eq!(saved.payment.stripe_currency.as_deref(), Some("USD"));
    }
}
