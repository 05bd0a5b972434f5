use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::{errors::ServiceError, AppState};

type HmacSha256 = Hmac<Sha256>;

/// Gateway events that carry a checkout session whose payment may have settled.
const SESSION_EVENTS: &[&str] = &[
    "checkout.session.completed",
    "checkout.session.async_payment_succeeded",
    "checkout.session.async_payment_failed",
    "checkout.session.expired",
];

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type", default)]
    event_type: String,
    #[serde(default)]
    data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    #[serde(default)]
    id: Option<String>,
}

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    summary = "Payment gateway webhook",
    description = "Server-to-server notification from the gateway. Checkout session events run the same confirmation as the redirect endpoint.",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable, retry later", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.payment_webhook_secret.as_deref() {
        let now = chrono::Utc::now().timestamp();
        if !verify_signature(
            &headers,
            &payload,
            secret,
            state.config.payment_webhook_tolerance_secs,
            now,
        ) {
            warn!("Payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let event: WebhookEvent = serde_json::from_slice(&payload)
        .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;

    if !SESSION_EVENTS.contains(&event.event_type.as_str()) {
        info!(event_type = %event.event_type, "Unhandled payment webhook type");
        return Ok((StatusCode::OK, "ok"));
    }

    let session_id = event
        .data
        .and_then(|d| d.object.id)
        .ok_or_else(|| ServiceError::BadRequest("event has no session id".to_string()))?;

    match state.services.orders.confirm_session(&session_id).await {
        Ok(outcome) => {
            info!(
                order_id = %outcome.order.id,
                transitioned = outcome.transitioned,
                event_type = %event.event_type,
                "payment webhook processed"
            );
        }
        // Nothing to retry for: the session is unpaid or unknown to us
        Err(e @ (ServiceError::PaymentNotCompleted(_) | ServiceError::OrderNotFound(_))) => {
            info!(%session_id, error = %e, "payment webhook acknowledged without settlement");
        }
        Err(e) => return Err(e),
    }

    Ok((StatusCode::OK, "ok"))
}

fn sign(secret: &str, timestamp: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn within_tolerance(timestamp: &str, tolerance_secs: u64, now: i64) -> bool {
    timestamp
        .parse::<i64>()
        .ok()
        .and_then(|ts| now.checked_sub(ts))
        .map(|age| age.unsigned_abs() <= tolerance_secs)
        .unwrap_or(false)
}

fn verify_signature(
    headers: &HeaderMap,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> bool {
    // Stripe-Signature: t=<unix>,v1=<hex>
    if let Some(header) = headers.get("Stripe-Signature").and_then(|h| h.to_str().ok()) {
        let mut ts = "";
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", val)) => ts = val,
                Some(("v1", val)) => candidates.push(val),
                _ => {}
            }
        }
        if ts.is_empty() || candidates.is_empty() || !within_tolerance(ts, tolerance_secs, now) {
            return false;
        }
        return match sign(secret, ts, payload) {
            Some(expected) => candidates.iter().any(|c| constant_time_eq(&expected, c)),
            None => false,
        };
    }

    // Generic: x-timestamp and x-signature headers
    let ts = headers.get("x-timestamp").and_then(|h| h.to_str().ok());
    let sig = headers.get("x-signature").and_then(|h| h.to_str().ok());
    if let (Some(ts), Some(sig)) = (ts, sig) {
        if !within_tolerance(ts, tolerance_secs, now) {
            return false;
        }
        return sign(secret, ts, payload)
            .map(|expected| constant_time_eq(&expected, sig))
            .unwrap_or(false);
    }
    false
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"type":"checkout.session.completed","data":{"object":{"id":"cs_1"}}}"#;

    fn stripe_headers(ts: i64, sig: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Stripe-Signature",
            HeaderValue::from_str(&format!("t={ts},v1={sig}")).unwrap(),
        );
        headers
    }

    #[test]
    fn accepts_valid_stripe_signature() {
        let now = 1_700_000_000;
        let sig = sign(SECRET, &now.to_string(), BODY).unwrap();
        assert!(verify_signature(&stripe_headers(now, &sig), BODY, SECRET, 300, now));
    }

    #[test]
    fn rejects_tampered_payload() {
        let now = 1_700_000_000;
        let sig = sign(SECRET, &now.to_string(), BODY).unwrap();
        assert!(!verify_signature(&stripe_headers(now, &sig), b"{}", SECRET, 300, now));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let then = 1_700_000_000;
        let sig = sign(SECRET, &then.to_string(), BODY).unwrap();
        assert!(!verify_signature(&stripe_headers(then, &sig), BODY, SECRET, 300, then + 301));
    }

    #[test]
    fn accepts_generic_headers() {
        let now = 1_700_000_000;
        let sig = sign(SECRET, &now.to_string(), BODY).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", HeaderValue::from_str(&now.to_string()).unwrap());
        headers.insert("x-signature", HeaderValue::from_str(&sig).unwrap());
        assert!(verify_signature(&headers, BODY, SECRET, 300, now));
    }

    #[test]
    fn extreme_timestamps_are_rejected_without_overflow() {
        let now = 1_700_000_000;
        let headers = stripe_headers(i64::MIN, "00");
        assert!(!verify_signature(&headers, BODY, SECRET, 300, now));

        let mut generic = HeaderMap::new();
        generic.insert("x-timestamp", HeaderValue::from_str(&i64::MIN.to_string()).unwrap());
        generic.insert("x-signature", HeaderValue::from_static("00"));
        assert!(!verify_signature(&generic, BODY, SECRET, 300, now));

        assert!(!within_tolerance(&i64::MAX.to_string(), 300, -now));
    }

    #[test]
    fn missing_headers_fail() {
        assert!(!verify_signature(&HeaderMap::new(), BODY, SECRET, 300, 0));
    }

    #[test]
    fn parses_session_event() {
        let event: WebhookEvent = serde_json::from_slice(BODY).unwrap();
        assert_eq!(event.event_type, "checkout.session.completed");
        assert_eq!(event.data.unwrap().object.id.as_deref(), Some("cs_1"));
    }
}
