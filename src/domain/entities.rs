use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::value_objects::OrderStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Billing or shipping address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    pub line2: String,
    pub city: String,
    pub state: String,
    pub postcode: String,
    pub country: String,
}

/// Billing contact attached to an order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: Address,
}

impl BillingDetails {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Shipping destination attached to an order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShippingDetails {
    pub first_name: String,
    pub last_name: String,
    pub address: Address,
}

impl ShippingDetails {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// A purchasable line on the order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    /// Product behind the line, when it is a stock-managed product
    pub product_id: Option<u64>,
    pub name: String,
    /// Unit price after discounts, in the order currency
    pub unit_amount: Decimal,
    pub quantity: u32,
    /// Stripe tax classification code, when the product carries one
    pub tax_code: Option<String>,
    pub image_url: Option<String>,
}

/// A timeline note on the order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderNote {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Stripe bookkeeping persisted on the order.
///
/// Key compatibility matters here: every field corresponds to a metadata
/// entry the reconciliation logic reads back on later deliveries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentMeta {
    /// Payment-intent id, set once per successful creation
    pub intent_id: Option<String>,
    /// Setup-intent id for $0 / saved-card-only orders
    pub setup_intent_id: Option<String>,
    /// Whether funds were captured vs merely authorized; `None` until a
    /// charge result has been processed
    pub charge_captured: Option<bool>,
    /// Charge id, the canonical handle once a charge exists
    pub transaction_id: Option<String>,
    /// Last refund id processed, dedupes refund notifications
    pub refund_id: Option<String>,
    /// Accumulated Stripe fee, in the Stripe account currency
    pub fee: Option<Decimal>,
    /// Accumulated net revenue, in the Stripe account currency
    pub net: Option<Decimal>,
    /// Currency of the Stripe balance transactions
    pub stripe_currency: Option<String>,
    /// Guards against double stock decrement on retried finalizes
    pub stock_reduced: bool,
    /// When set, a failure status must not overwrite the current status
    pub status_final: bool,
    /// Stripe customer id bound to this order
    pub customer_id: Option<String>,
    /// Card mandate id, when the charge carried one
    pub mandate_id: Option<String>,
}

/// Shop order, the shared mutable resource every payment entry point
/// converges on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,

    /// Capability token required by the return URL
    pub order_key: String,

    pub status: OrderStatus,

    pub currency: String,

    pub total: Decimal,

    pub billing: BillingDetails,

    pub shipping: Option<ShippingDetails>,

    pub line_items: Vec<LineItem>,

    /// Shipping cost, zero when nothing ships
    pub shipping_total: Decimal,

    /// Tax computed by the shop platform, zero when it is not taxing
    pub tax_total: Decimal,

    /// Registered user behind the order, `None` for guests
    pub user_id: Option<u64>,

    pub payment: PaymentMeta,

    pub notes: Vec<OrderNote>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub paid_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        id: u64,
        total: Decimal,
        currency: String,
        billing: BillingDetails,
        user_id: Option<u64>,
    ) -> DomainResult<Self> {
        if currency.len() != 3 {
            return Err(DomainError::ValidationError(
                "Currency must be a 3-letter ISO code".to_string(),
            ));
        }
        if total.is_sign_negative() {
            return Err(DomainError::InvalidAmount(
                "Order total cannot be negative".to_string(),
            ));
        }

        let now = Utc::now();

        Ok(Self {
            id,
            order_key: format!("order_{}", Uuid::new_v4().simple()),
            status: OrderStatus::Pending,
            currency,
            total,
            billing,
            shipping: None,
            line_items: Vec::new(),
            shipping_total: Decimal::ZERO,
            tax_total: Decimal::ZERO,
            user_id,
            payment: PaymentMeta::default(),
            notes: Vec::new(),
            created_at: now,
            updated_at: now,
            paid_at: None,
        })
    }

    pub fn number(&self) -> String {
        self.id.to_string()
    }

    /// An order still needs payment while pending or failed.
    pub fn needs_payment(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::Failed)
    }

    pub fn has_status(&self, statuses: &[OrderStatus]) -> bool {
        statuses.contains(&self.status)
    }

    pub fn add_note(&mut self, text: impl Into<String>) {
        self.notes.push(OrderNote {
            text: text.into(),
            created_at: Utc::now(),
        });
        self.updated_at = Utc::now();
    }

    /// Moves the order to a new status, recording a note when one is given.
    pub fn update_status(&mut self, status: OrderStatus, note: Option<&str>) {
        if let Some(note) = note {
            self.add_note(note);
        }
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn set_transaction_id(&mut self, transaction_id: impl Into<String>) {
        self.payment.transaction_id = Some(transaction_id.into());
        self.updated_at = Utc::now();
    }

    pub fn set_total(&mut self, total: Decimal) {
        self.total = total;
        self.updated_at = Utc::now();
    }

    /// Completes the payment. Invoking this twice with the same transaction
    /// id is a no-op; a repeat with a different id on a settled order is
    /// ignored as well, since the money has already moved.
    pub fn payment_complete(&mut self, transaction_id: &str) -> DomainResult<()> {
        let settled = matches!(
            self.status,
            OrderStatus::Processing | OrderStatus::Completed
        );
        if settled {
            if self.payment.transaction_id.as_deref() != Some(transaction_id) {
                self.add_note(format!(
                    "Ignored payment completion for {}: order already settled.",
                    transaction_id
                ));
            }
            return Ok(());
        }

        if !self.has_status(&[
            OrderStatus::Pending,
            OrderStatus::OnHold,
            OrderStatus::Failed,
            OrderStatus::Cancelled,
        ]) {
            return Err(DomainError::InvalidState {
                expected: "pending, on-hold, failed or cancelled".to_string(),
                actual: self.status.to_string(),
            });
        }

        self.payment.transaction_id = Some(transaction_id.to_string());
        self.status = OrderStatus::Processing;
        self.paid_at = Some(Utc::now());
        self.updated_at = Utc::now();
        Ok(())
    }
}
