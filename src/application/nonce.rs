use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Action name the redirect nonce is bound to.
const REDIRECT_ACTION: &str = "stripe_process_redirect_order";

fn redirect_mac(secret: &str, order_id: u64, order_key: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("{}|{}|{}", REDIRECT_ACTION, order_id, order_key).as_bytes());
    mac
}

/// Signs the return-URL parameters for an order.
pub fn create_redirect_nonce(secret: &str, order_id: u64, order_key: &str) -> String {
    hex::encode(redirect_mac(secret, order_id, order_key).finalize().into_bytes())
}

/// Validates a return-URL nonce. The comparison is constant-time; any
/// malformed nonce is simply a mismatch.
pub fn verify_redirect_nonce(secret: &str, order_id: u64, order_key: &str, nonce: &str) -> bool {
    let Ok(bytes) = hex::decode(nonce) else {
        return false;
    };
    redirect_mac(secret, order_id, order_key)
        .verify_slice(&bytes)
        .is_ok()
}
