use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tablebot_contracts::WebhookEvent;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-line-signature";

/// Checks the base64 HMAC-SHA256 of the raw body against the header value.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = STANDARD.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub fn sign(secret: &str, body: &[u8]) -> String {
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(body);
            STANDARD.encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

/// Key under which an event is deduplicated. Redeliveries carry the same
/// stable identity as the first delivery and collapse onto its key.
pub fn event_key(event: &WebhookEvent) -> String {
    if let Some(id) = event.webhook_event_id.as_deref().filter(|v| !v.is_empty()) {
        return format!("evt:{id}");
    }
    if let Some(id) = event
        .message
        .as_ref()
        .and_then(|m| m.id.as_deref())
        .filter(|v| !v.is_empty())
    {
        return format!("msg:{id}");
    }
    if let Some(data) = event.postback.as_ref().map(|p| p.data.as_str()) {
        return format!("fp:{}", fingerprint(event, data));
    }
    if let Some(token) = event.reply_token.as_deref().filter(|v| !v.is_empty()) {
        if event.is_redelivery() {
            let chat = event
                .actor()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return format!("redelivery:{chat}:{}", event.timestamp);
        }
        return format!("rt:{token}");
    }
    format!("anon:{}", uuid::Uuid::new_v4().as_simple())
}

fn fingerprint(event: &WebhookEvent, data: &str) -> String {
    let source = event
        .actor()
        .map(|a| a.to_string())
        .unwrap_or_default();
    let user = event.sender_user_id().unwrap_or_default();
    let timestamp = event.timestamp.to_string();

    let mut hasher = Sha256::new();
    for part in [source.as_str(), user, data, timestamp.as_str()] {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}
