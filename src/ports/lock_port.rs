use async_trait::async_trait;

/// Advisory per-order processing lock.
///
/// The lock is keyed by order id with the in-flight intent id as the
/// holder, expires after five minutes with no heartbeat, and is the sole
/// concurrency primitive between the create, verify and webhook entry
/// points. Callers that skip it can still write; every finalize path must
/// take it.
#[async_trait]
pub trait PaymentLockPort: Send + Sync {
    /// Attempts to lock the order for the given intent. Returns `true`
    /// when the order is already being processed (by the sentinel holder
    /// or by the same intent) and the caller must back off; otherwise the
    /// lock is (re)taken for this holder and `false` is returned.
    async fn lock(&self, order_id: u64, intent_id: Option<&str>) -> bool;

    /// Releases the lock. Safe to call when not held.
    async fn unlock(&self, order_id: u64);
}
