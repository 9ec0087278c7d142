use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `message` under `secret`.
pub fn sign(secret: &str, message: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature over `message`.
pub fn verify(secret: &str, message: &[u8], signature_hex: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&signature).is_ok()
}

/// Webhook deliveries are signed over the raw request body.
pub fn verify_webhook(secret: &str, raw_body: &[u8], signature_hex: &str) -> bool {
    verify(secret, raw_body, signature_hex)
}

fn checkout_message(remote_order_id: &str, payment_id: &str) -> String {
    format!("{}|{}", remote_order_id, payment_id)
}

/// Signature the gateway hands the browser after checkout.
pub fn sign_checkout(key_secret: &str, remote_order_id: &str, payment_id: &str) -> String {
    sign(key_secret, checkout_message(remote_order_id, payment_id).as_bytes())
}

pub fn verify_checkout(
    key_secret: &str,
    remote_order_id: &str,
    payment_id: &str,
    signature_hex: &str,
) -> bool {
    verify(
        key_secret,
        checkout_message(remote_order_id, payment_id).as_bytes(),
        signature_hex,
    )
}
