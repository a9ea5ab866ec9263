use crate::errors::ServiceError;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use tracing::{error, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Mercado Pago payment notification.
///
/// The notification only names a payment id; the current payment state is
/// fetched back from the processor, never trusted from the webhook body.
/// Replays and notifications for unknown payments return 200 so the
/// processor stops retrying them.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Notification accepted"),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let json: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::InvalidInput(format!("invalid webhook body: {}", e)))?;

    // The payment id arrives in the query string ("data.id") and in the
    // body; the query value is what the signature covers.
    let data_id = query
        .get("data.id")
        .cloned()
        .or_else(|| match &json["data"]["id"] {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

    let secret = state.config.payment_webhook_secret.as_deref().ok_or_else(|| {
        error!("Webhook received but payment_webhook_secret is not configured");
        ServiceError::Unauthorized("webhook verification unavailable".to_string())
    })?;
    if !verify_signature(
        &headers,
        data_id.as_deref(),
        secret,
        state.config.payment_webhook_tolerance_secs,
    ) {
        warn!("Payment webhook signature verification failed");
        return Err(ServiceError::Unauthorized(
            "invalid webhook signature".to_string(),
        ));
    }

    let event_type = json
        .get("type")
        .or_else(|| json.get("topic"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if event_type != "payment" {
        info!(event_type, "Ignoring non-payment webhook");
        return Ok((StatusCode::OK, "ok"));
    }

    let Some(payment_id) = data_id else {
        return Err(ServiceError::InvalidInput(
            "payment webhook without data.id".to_string(),
        ));
    };

    info!(%payment_id, "Payment webhook received");
    state
        .services
        .reconciliation
        .ingest_by_payment_id(&payment_id)
        .await?;

    Ok((StatusCode::OK, "ok"))
}

/// Verifies Mercado Pago's `x-signature` header: `ts=...,v1=...` where `v1`
/// is an HMAC-SHA256 over `id:{data.id};request-id:{x-request-id};ts:{ts};`
/// with the id lowercased. Rejects timestamps outside the tolerance window.
fn verify_signature(
    headers: &HeaderMap,
    data_id: Option<&str>,
    secret: &str,
    tolerance_secs: u64,
) -> bool {
    let Some(signature) = headers.get("x-signature").and_then(|h| h.to_str().ok()) else {
        return false;
    };

    let mut ts = "";
    let mut v1 = "";
    for part in signature.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("ts"), Some(val)) => ts = val,
            (Some("v1"), Some(val)) => v1 = val,
            _ => {}
        }
    }
    if ts.is_empty() || v1.is_empty() {
        return false;
    }

    if let Ok(ts_num) = ts.parse::<i64>() {
        let now = chrono::Utc::now().timestamp();
        if (now - ts_num).unsigned_abs() > tolerance_secs {
            return false;
        }
    } else {
        return false;
    }

    let mut manifest = String::new();
    if let Some(id) = data_id {
        manifest.push_str(&format!("id:{};", id.to_lowercase()));
    }
    if let Some(request_id) = headers.get("x-request-id").and_then(|h| h.to_str().ok()) {
        manifest.push_str(&format!("request-id:{};", request_id));
    }
    manifest.push_str(&format!("ts:{};", ts));

    let Ok(expected) = hex::decode(v1) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(manifest.as_bytes());
    mac.verify_slice(&expected).is_ok()
}
