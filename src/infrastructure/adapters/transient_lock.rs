use crate::ports::lock_port::PaymentLockPort;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Holder recorded when an order is locked without a specific intent.
const NO_INTENT_HOLDER: &str = "-1";

const LOCK_TTL: Duration = Duration::from_secs(5 * 60);

/// In-memory expiring lock store.
///
/// Entries auto-expire after five minutes; there is no heartbeat, so a
/// crashed holder simply stops blocking once the TTL lapses.
pub struct TransientLockStore {
    entries: Mutex<HashMap<u64, LockEntry>>,
    ttl: Duration,
}

struct LockEntry {
    holder: String,
    expires_at: Instant,
}

impl TransientLockStore {
    pub fn new() -> Self {
        Self::with_ttl(LOCK_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }
}

impl Default for TransientLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentLockPort for TransientLockStore {
    async fn lock(&self, order_id: u64, intent_id: Option<&str>) -> bool {
        let mut entries = self.entries.lock().expect("lock store poisoned");
        let now = Instant::now();

        if let Some(entry) = entries.get(&order_id) {
            let live = entry.expires_at > now;
            let same_holder = entry.holder == NO_INTENT_HOLDER
                || intent_id.map(|id| id == entry.holder).unwrap_or(false);
            if live && same_holder {
                return true;
            }
        }

        // Take over: either the entry expired or a different intent held it.
        entries.insert(
            order_id,
            LockEntry {
                holder: intent_id.unwrap_or(NO_INTENT_HOLDER).to_string(),
                expires_at: now + self.ttl,
            },
        );

        false
    }

    async fn unlock(&self, order_id: u64) {
        let mut entries = self.entries.lock().expect("lock store poisoned");
        entries.remove(&order_id);
    }
}
