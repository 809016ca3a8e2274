use crate::application::payment_service::{resolve_session_intent, PaymentService};
use crate::domain::errors::DomainResult;
use crate::domain::events::{EventType, WebhookEvent};
use crate::domain::value_objects::{from_minor_units, OrderStatus};
use crate::domain::Order;
use crate::ports::stripe_gateway_port::{Charge, CheckoutSession, Invoice, PaymentIntent, Refund};
use crate::ports::{OrderStorePort, PaymentLockPort, StripeGatewayPort, SubscriptionSupport};
use std::sync::Arc;
use tracing::{debug, info};

/// Statuses a success notification may still act on; anything else means
/// another entry point already settled the order.
const PROCESSABLE: [OrderStatus; 3] =
    [OrderStatus::Pending, OrderStatus::Failed, OrderStatus::OnHold];

/// Routes inbound Stripe notifications to state-machine-safe handlers.
///
/// Delivery is at-least-once and unordered, so every handler re-checks the
/// order's current state and treats an already-processed event as success.
/// An order that cannot be resolved is logged and dropped; Stripe's own
/// retry schedule covers delivery.
pub struct WebhookService<G: StripeGatewayPort, S: OrderStorePort, L: PaymentLockPort> {
    payments: Arc<PaymentService<G, S, L>>,
    gateway: Arc<G>,
    store: Arc<S>,
    locks: Arc<L>,
    subscriptions: Arc<dyn SubscriptionSupport>,
}

impl<G: StripeGatewayPort, S: OrderStorePort, L: PaymentLockPort> WebhookService<G, S, L> {
    pub fn new(
        payments: Arc<PaymentService<G, S, L>>,
        gateway: Arc<G>,
        store: Arc<S>,
        locks: Arc<L>,
        subscriptions: Arc<dyn SubscriptionSupport>,
    ) -> Self {
        Self {
            payments,
            gateway,
            store,
            locks,
            subscriptions,
        }
    }

    pub async fn dispatch(&self, event: &WebhookEvent) -> DomainResult<()> {
        match event.event_type() {
            EventType::ChargeSucceeded => self.charge_succeeded(event).await,
            EventType::ChargeFailed => self.charge_failed(event).await,
            EventType::ChargeCaptured => self.charge_captured(event).await,
            EventType::ChargeRefunded => self.charge_refunded(event).await,
            EventType::ChargeRefundUpdated => self.refund_updated(event).await,
            EventType::CheckoutSessionCompleted
            | EventType::CheckoutSessionAsyncPaymentSucceeded
            | EventType::CheckoutSessionAsyncPaymentFailed
            | EventType::CheckoutSessionExpired => self.checkout_session(event).await,
            EventType::PaymentIntentSucceeded
            | EventType::PaymentIntentPaymentFailed
            | EventType::PaymentIntentAmountCapturableUpdated
            | EventType::PaymentIntentRequiresAction => self.payment_intent(event).await,
            EventType::InvoicePaid | EventType::InvoicePaymentFailed => self.invoice(event).await,
            EventType::Unknown(kind) => {
                debug!("Ignoring unhandled webhook event type: {}", kind);
                Ok(())
            }
        }
    }

    async fn order_by_charge_id(&self, charge_id: &str) -> DomainResult<Option<Order>> {
        let order = self.store.find_by_transaction_id(charge_id).await?;
        if order.is_none() {
            info!("Could not find order via charge ID: {}", charge_id);
        }
        Ok(order)
    }

    /// Asynchronous methods (SEPA, Sofort, bank transfers) settle through
    /// this event; synchronous card charges were already finalized at
    /// checkout and only need the defensive guards to hold.
    async fn charge_succeeded(&self, event: &WebhookEvent) -> DomainResult<()> {
        let charge: Charge = event.object()?;

        // Card-like legacy sources are settled synchronously.
        if charge
            .source
            .as_ref()
            .map(|source| matches!(source.kind.as_str(), "card" | "three_d_secure"))
            .unwrap_or(false)
        {
            return Ok(());
        }

        let Some(mut order) = self.order_by_charge_id(&charge.id).await? else {
            return Ok(());
        };

        if !order.has_status(&[OrderStatus::OnHold]) {
            return Ok(());
        }

        // Stripe fires charge.succeeded for authorize-only charges too;
        // completion has to wait for the capture.
        if !charge.captured {
            return Ok(());
        }

        order.set_transaction_id(&charge.id);

        if let Some(balance_transaction) = charge.balance_transaction_id() {
            let balance_transaction = balance_transaction.to_string();
            self.payments.update_fees(&mut order, &balance_transaction).await;
        }

        order.payment_complete(&charge.id)?;
        order.add_note(format!("Stripe charge complete (Charge ID: {})", charge.id));
        self.store.save(&order).await
    }

    async fn charge_failed(&self, event: &WebhookEvent) -> DomainResult<()> {
        let charge: Charge = event.object()?;

        let Some(mut order) = self.order_by_charge_id(&charge.id).await? else {
            return Ok(());
        };

        // Already failed: duplicate delivery, nothing to do.
        if order.has_status(&[OrderStatus::Failed]) {
            return Ok(());
        }

        self.payments
            .mark_order_failed(&mut order, "This payment failed to clear.")
            .await
    }

    /// An authorized-only charge was captured from the Stripe dashboard.
    async fn charge_captured(&self, event: &WebhookEvent) -> DomainResult<()> {
        let charge: Charge = event.object()?;

        let Some(mut order) = self.order_by_charge_id(&charge.id).await? else {
            return Ok(());
        };

        // The capture flag flips no -> yes exactly once.
        if order.payment.transaction_id.is_none()
            || order.payment.charge_captured != Some(false)
        {
            return Ok(());
        }

        order.payment.charge_captured = Some(true);
        order.set_transaction_id(&charge.id);

        if let Some(balance_transaction) = charge.balance_transaction_id() {
            let balance_transaction = balance_transaction.to_string();
            self.payments.update_fees(&mut order, &balance_transaction).await;
        }

        if charge.amount_refunded > 0 {
            // Partial capture: the order shrinks to the net captured
            // amount instead of completing in full.
            let partial =
                from_minor_units(charge.amount - charge.amount_refunded, &order.currency);
            order.set_total(partial);

            if let Some(refund) = self.refund_object(&charge).await? {
                if let Some(balance_transaction) = refund.balance_transaction {
                    self.payments.update_fees(&mut order, &balance_transaction).await;
                }
            }

            order.add_note(format!(
                "This charge was partially captured via Stripe Dashboard in the amount of: {}",
                partial
            ));
        } else {
            order.payment_complete(&charge.id)?;
            order.add_note(format!("Stripe charge complete (Charge ID: {})", charge.id));
        }

        self.store.save(&order).await
    }

    async fn charge_refunded(&self, event: &WebhookEvent) -> DomainResult<()> {
        let charge: Charge = event.object()?;

        let Some(mut order) = self.order_by_charge_id(&charge.id).await? else {
            return Ok(());
        };

        // A refund against an uncaptured charge is a voided
        // pre-authorization.
        if order.payment.charge_captured != Some(true) {
            if !order.has_status(&[OrderStatus::Cancelled]) {
                let Some(refund) = self.refund_object(&charge).await? else {
                    return Ok(());
                };
                let amount = from_minor_units(refund.amount, &order.currency);
                order.add_note(format!(
                    "Pre-Authorization for {} voided from the Stripe Dashboard.",
                    amount
                ));
                order.update_status(OrderStatus::Cancelled, None);
                self.store.save(&order).await?;
            }
            return Ok(());
        }

        let Some(refund) = self.refund_object(&charge).await? else {
            return Ok(());
        };

        // Matching refund id: this notification was already applied.
        if order.payment.refund_id.as_deref() == Some(refund.id.as_str()) {
            return Ok(());
        }

        if order.payment.transaction_id.is_none() {
            return Ok(());
        }

        let amount = from_minor_units(refund.amount, &order.currency);
        let reason = "Refunded via Stripe Dashboard";

        self.store.create_refund(order.id, amount, reason).await?;
        order.payment.refund_id = Some(refund.id.clone());

        if let Some(balance_transaction) = refund.balance_transaction {
            self.payments.update_fees(&mut order, &balance_transaction).await;
        }

        order.add_note(format!(
            "Refunded {} - Refund ID: {} - {}",
            amount, refund.id, reason
        ));
        self.store.save(&order).await
    }

    /// A refund this order already recorded changed state, e.g. the bank
    /// rejected it after the fact.
    async fn refund_updated(&self, event: &WebhookEvent) -> DomainResult<()> {
        let refund: Refund = event.object()?;

        let Some(charge_id) = refund.charge.clone() else {
            return Ok(());
        };
        let Some(order) = self.store.find_by_transaction_id(&charge_id).await? else {
            info!("Could not find order to update refund via charge ID: {}", charge_id);
            return Ok(());
        };
        let mut order = order;

        // A different refund id belongs to an already-superseded refund.
        if order.payment.refund_id.as_deref() != Some(refund.id.as_str()) {
            return Ok(());
        }

        if !matches!(refund.status.as_str(), "failed" | "canceled") {
            return Ok(());
        }

        if let Some(balance_transaction) = refund.failure_balance_transaction.clone() {
            self.payments.update_fees(&mut order, &balance_transaction).await;
        }

        // No refund record to roll back means nothing to update.
        if !self.store.delete_latest_refund(order.id).await? {
            return Ok(());
        }

        let amount = from_minor_units(refund.amount, &order.currency);
        let verb = if refund.status == "failed" {
            "failed"
        } else {
            "canceled"
        };
        order.add_note(format!(
            "Refund {} for {} - Refund ID: {} - Reason: {}",
            verb,
            amount,
            refund.id,
            refund.failure_reason.as_deref().unwrap_or("unknown")
        ));
        self.store.save(&order).await
    }

    async fn checkout_session(&self, event: &WebhookEvent) -> DomainResult<()> {
        let session: CheckoutSession = event.object()?;

        let Some(order_id) = session.order_id() else {
            info!("Checkout session {} carries no order id", session.id);
            return Ok(());
        };
        let Some(mut order) = self.store.find_by_id(order_id).await? else {
            info!("Could not find order via checkout_session ID: {}", session.id);
            return Ok(());
        };

        if !order.has_status(&PROCESSABLE) {
            debug!(
                "Order {} is {}, ignoring checkout session event",
                order.id, order.status
            );
            return Ok(());
        }

        // Re-fetch with expansions; the event payload embeds neither the
        // intent nor the invoice.
        let session = self.gateway.retrieve_checkout_session(&session.id).await?;

        if session.amount_total == Some(0) {
            if let Some(setup_intent) = &session.setup_intent {
                order.payment.setup_intent_id = Some(setup_intent.clone());
            }
            order.payment_complete(&session.id)?;
            order.add_note(format!("Stripe charge complete (Charge ID: {})", session.id));
            return self.store.save(&order).await;
        }

        let intent = resolve_session_intent(&session)?;

        match event.event_type() {
            EventType::CheckoutSessionCompleted
            | EventType::CheckoutSessionAsyncPaymentSucceeded => {
                if self.locks.lock(order.id, Some(&intent.id)).await {
                    debug!("Order {} locked for intent {}, skipping", order.id, intent.id);
                    return Ok(());
                }

                info!("Stripe PaymentIntent {} succeeded for order {}", intent.id, order.id);

                let result = match self.payments.resolve_latest_charge(&intent).await {
                    Ok(charge) => self.payments.process_response(&charge, &mut order).await,
                    Err(err) => Err(err),
                };
                self.locks.unlock(order.id).await;
                result
            }
            _ => {
                let reason = intent
                    .last_payment_error
                    .as_ref()
                    .and_then(|error| error.message.clone())
                    .unwrap_or_default();
                self.payments
                    .mark_order_failed(
                        &mut order,
                        &format!("Stripe SCA authentication failed. Reason: {}", reason),
                    )
                    .await
            }
        }
    }

    async fn payment_intent(&self, event: &WebhookEvent) -> DomainResult<()> {
        let intent: PaymentIntent = event.object()?;

        let Some(mut order) = self.store.find_by_intent_id(&intent.id).await? else {
            info!("Could not find order via intent ID: {}", intent.id);
            return Ok(());
        };

        if !order.has_status(&PROCESSABLE) {
            debug!("Order {} is {}, ignoring intent event", order.id, order.status);
            return Ok(());
        }

        if self.locks.lock(order.id, Some(&intent.id)).await {
            debug!("Order {} locked for intent {}, skipping", order.id, intent.id);
            return Ok(());
        }

        let result = match event.event_type() {
            EventType::PaymentIntentRequiresAction => Ok(()),
            EventType::PaymentIntentSucceeded
            | EventType::PaymentIntentAmountCapturableUpdated => {
                info!("Stripe PaymentIntent {} succeeded for order {}", intent.id, order.id);
                match self.payments.resolve_latest_charge(&intent).await {
                    Ok(charge) => self.payments.process_response(&charge, &mut order).await,
                    Err(err) => Err(err),
                }
            }
            _ => {
                let reason = intent
                    .last_payment_error
                    .as_ref()
                    .and_then(|error| error.message.clone())
                    .unwrap_or_default();
                self.payments
                    .mark_order_failed(
                        &mut order,
                        &format!("Stripe SCA authentication failed. Reason: {}", reason),
                    )
                    .await
            }
        };

        self.locks.unlock(order.id).await;
        result
    }

    /// Renewal invoices belong to the subscriptions capability; without
    /// one these are no-ops.
    async fn invoice(&self, event: &WebhookEvent) -> DomainResult<()> {
        let invoice: Invoice = event.object()?;

        let Some(intent_id) = invoice.payment_intent_id() else {
            return Ok(());
        };
        let Some(order) = self.store.find_by_intent_id(intent_id).await? else {
            info!("Could not find order via intent ID: {}", intent_id);
            return Ok(());
        };

        if invoice.subscription.is_none() {
            return Ok(());
        }

        match event.event_type() {
            EventType::InvoicePaid => {
                info!("Subscription renewal paid for order {}", order.id);
                self.subscriptions.renewal_paid(&order).await
            }
            EventType::InvoicePaymentFailed => {
                info!("Subscription renewal failed for order {}", order.id);
                self.subscriptions.renewal_failed(&order).await
            }
            _ => Ok(()),
        }
    }

    /// First refund attached to a charge: embedded when the API version
    /// still expands `refunds` by default, fetched explicitly otherwise.
    async fn refund_object(&self, charge: &Charge) -> DomainResult<Option<Refund>> {
        if let Some(refund) = charge.refunds.as_ref().and_then(|list| list.data.first()) {
            return Ok(Some(refund.clone()));
        }

        let fetched = self.gateway.retrieve_charge(&charge.id, true).await?;
        Ok(fetched
            .refunds
            .and_then(|list| list.data.first().cloned()))
    }
}
