use crate::domain::entities::{BillingDetails, LineItem, Order, OrderNote, PaymentMeta, ShippingDetails};
use crate::domain::errors::DomainResult;
use crate::domain::value_objects::OrderStatus;
use crate::ports::order_store_port::OrderStorePort;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{MySql, Pool};
use std::sync::Arc;
use tracing::debug;

/// MySQL order store.
///
/// The Stripe handle columns (`intent_id`, `setup_intent_id`,
/// `transaction_id`) carry unique indexes, so handle lookups resolve at
/// most one order.
#[derive(Clone)]
pub struct MySqlOrderStore {
    pool: Arc<Pool<MySql>>,
}

const SELECT_ORDER: &str = r#"
    SELECT id, order_key, status, currency, total, billing, shipping,
           line_items, user_id, payment, notes,
           created_at, updated_at, paid_at
    FROM orders
"#;

impl MySqlOrderStore {
    pub fn new(pool: Arc<Pool<MySql>>) -> Self {
        Self { pool }
    }

    async fn find_one(&self, condition: &str, value: &str) -> DomainResult<Option<Order>> {
        let query = format!("{} WHERE {} = ?", SELECT_ORDER, condition);

        let result = sqlx::query_as::<_, OrderRow>(&query)
            .bind(value)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(result.map(OrderRow::into_order))
    }
}

#[async_trait]
impl OrderStorePort for MySqlOrderStore {
    async fn find_by_id(&self, order_id: u64) -> DomainResult<Option<Order>> {
        let query = format!("{} WHERE id = ?", SELECT_ORDER);

        let result = sqlx::query_as::<_, OrderRow>(&query)
            .bind(order_id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(result.map(OrderRow::into_order))
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> DomainResult<Option<Order>> {
        self.find_one("transaction_id", transaction_id).await
    }

    async fn find_by_intent_id(&self, intent_id: &str) -> DomainResult<Option<Order>> {
        self.find_one("intent_id", intent_id).await
    }

    async fn find_by_setup_intent_id(&self, intent_id: &str) -> DomainResult<Option<Order>> {
        self.find_one("setup_intent_id", intent_id).await
    }

    async fn save(&self, order: &Order) -> DomainResult<()> {
        let query = r#"
            INSERT INTO orders (
                id, order_key, status, currency, total, billing, shipping,
                line_items, user_id, payment,
                intent_id, setup_intent_id, transaction_id,
                notes, created_at, updated_at, paid_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                status = VALUES(status),
                total = VALUES(total),
                billing = VALUES(billing),
                shipping = VALUES(shipping),
                line_items = VALUES(line_items),
                payment = VALUES(payment),
                intent_id = VALUES(intent_id),
                setup_intent_id = VALUES(setup_intent_id),
                transaction_id = VALUES(transaction_id),
                notes = VALUES(notes),
                updated_at = VALUES(updated_at),
                paid_at = VALUES(paid_at)
        "#;

        sqlx::query(query)
            .bind(order.id)
            .bind(&order.order_key)
            .bind(order.status.to_string())
            .bind(&order.currency)
            .bind(order.total)
            .bind(Json(&order.billing))
            .bind(order.shipping.as_ref().map(Json))
            .bind(Json(&order.line_items))
            .bind(order.user_id)
            .bind(Json(&order.payment))
            .bind(&order.payment.intent_id)
            .bind(&order.payment.setup_intent_id)
            .bind(&order.payment.transaction_id)
            .bind(Json(&order.notes))
            .bind(order.created_at)
            .bind(order.updated_at)
            .bind(order.paid_at)
            .execute(self.pool.as_ref())
            .await?;

        debug!("Order saved: {}", order.id);
        Ok(())
    }

    async fn reduce_stock(&self, order_id: u64) -> DomainResult<()> {
        let order = match self.find_by_id(order_id).await? {
            Some(order) => order,
            None => return Ok(()),
        };

        for item in &order.line_items {
            let Some(product_id) = item.product_id else {
                continue;
            };
            sqlx::query("UPDATE products SET stock_quantity = stock_quantity - ? WHERE id = ?")
                .bind(item.quantity)
                .bind(product_id)
                .execute(self.pool.as_ref())
                .await?;
        }

        debug!("Stock reduced for order: {}", order_id);
        Ok(())
    }

    async fn create_refund(
        &self,
        order_id: u64,
        amount: Decimal,
        reason: &str,
    ) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO order_refunds (order_id, amount, reason, created_at) VALUES (?, ?, ?, NOW())",
        )
        .bind(order_id)
        .bind(amount)
        .bind(reason)
        .execute(self.pool.as_ref())
        .await?;

        debug!("Refund recorded for order {}: {}", order_id, amount);
        Ok(())
    }

    async fn delete_latest_refund(&self, order_id: u64) -> DomainResult<bool> {
        let rows_affected =
            sqlx::query("DELETE FROM order_refunds WHERE order_id = ? ORDER BY id DESC LIMIT 1")
                .bind(order_id)
                .execute(self.pool.as_ref())
                .await?
                .rows_affected();

        Ok(rows_affected > 0)
    }

    async fn save_payment_token(
        &self,
        user_id: u64,
        token: crate::ports::order_store_port::PaymentTokenRecord,
    ) -> DomainResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_tokens (user_id, payment_method_id, brand, last4, exp_month, exp_year)
            VALUES (?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE brand = VALUES(brand), last4 = VALUES(last4),
                exp_month = VALUES(exp_month), exp_year = VALUES(exp_year)
            "#,
        )
        .bind(user_id)
        .bind(&token.payment_method_id)
        .bind(&token.brand)
        .bind(&token.last4)
        .bind(token.exp_month)
        .bind(token.exp_year)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn user_customer_id(&self, user_id: u64) -> DomainResult<Option<String>> {
        let result: Option<(String,)> =
            sqlx::query_as("SELECT customer_id FROM user_stripe_customers WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(self.pool.as_ref())
                .await?;

        Ok(result.map(|row| row.0))
    }

    async fn set_user_customer_id(&self, user_id: u64, customer_id: &str) -> DomainResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_stripe_customers (user_id, customer_id)
            VALUES (?, ?)
            ON DUPLICATE KEY UPDATE customer_id = VALUES(customer_id)
            "#,
        )
        .bind(user_id)
        .bind(customer_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn delete_user_customer_id(&self, user_id: u64) -> DomainResult<()> {
        sqlx::query("DELETE FROM user_stripe_customers WHERE user_id = ?")
            .bind(user_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }
}

/// Database row shape.
#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: u64,
    order_key: String,
    status: String,
    currency: String,
    total: Decimal,
    billing: Json<BillingDetails>,
    shipping: Option<Json<ShippingDetails>>,
    line_items: Json<Vec<LineItem>>,
    user_id: Option<u64>,
    payment: Json<PaymentMeta>,
    notes: Json<Vec<OrderNote>>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    paid_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl OrderRow {
    fn into_order(self) -> Order {
        let status = OrderStatus::parse(&self.status).unwrap_or(OrderStatus::Pending);

        Order {
            id: self.id,
            order_key: self.order_key,
            status,
            currency: self.currency,
            total: self.total,
            billing: self.billing.0,
            shipping: self.shipping.map(|json| json.0),
            line_items: self.line_items.0,
            shipping_total: Decimal::ZERO,
            tax_total: Decimal::ZERO,
            user_id: self.user_id,
            payment: self.payment.0,
            notes: self.notes.0,
            created_at: self.created_at,
            updated_at: self.updated_at,
            paid_at: self.paid_at,
        }
    }
}
