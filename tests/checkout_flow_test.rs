mod common;

use axum::http::{Method, StatusCode};
use common::{gateway_payment, response_json, TestApp};
use golclub_api::errors::ServiceError;
use hmac::{Hmac, Mac};
use rust_decimal_macros::dec;
use serde_json::json;
use sha2::Sha256;
use std::sync::atomic::Ordering;
use uuid::Uuid;

fn pix_payload(product_name: &str, idempotency_key: Option<&str>) -> serde_json::Value {
    let mut payload = json!({
        "paymentMethod": "pix",
        "transactionAmount": 151.90,
        "productName": product_name,
        "size": "G",
        "payer": {
            "email": "torcedor@example.com",
            "firstName": "Ana",
            "identification": {"type": "CPF", "number": "12345678909"}
        }
    });
    if let Some(key) = idempotency_key {
        payload["idempotencyKey"] = json!(key);
    }
    payload
}

#[tokio::test]
async fn pix_checkout_confirms_order_and_returns_qr_code() {
    let app = TestApp::new().await;
    let product = app.seed_product("Camisa Flamengo Home 2024", dec!(151.90)).await;
    let customer_id = Uuid::new_v4();
    let token = app.token_for(customer_id, "torcedor@example.com");

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(pix_payload("Flamengo Home", None)),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "confirmed");
    assert!(body["payment"]["qr_code"].is_string());
    assert!(body["payment"]["qr_code_base64"].is_string());

    // The resolver linked the free-text name to the seeded product.
    let order_id = Uuid::parse_str(body["orderId"].as_str().unwrap()).unwrap();
    let items = app.state.services.orders.get_order_items(order_id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].product_id, Some(product.id));
    assert_eq!(items[0].size, "G");

    // Confirmation email went out.
    let sent = app.mailer.sent_messages();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("Pagamento Aprovado"));
    assert_eq!(sent[0].to, vec!["torcedor@example.com".to_string()]);
}

#[tokio::test]
async fn rejected_payment_cancels_order() {
    let app = TestApp::new().await;
    let customer_id = Uuid::new_v4();
    let token = app.token_for(customer_id, "torcedor@example.com");
    app.gateway
        .script_create(Ok(gateway_payment("9000000002", "rejected", None)));

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(pix_payload("Flamengo Home", None)),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "cancelled");

    let order_id = Uuid::parse_str(body["orderId"].as_str().unwrap()).unwrap();
    let order = app
        .state
        .services
        .orders
        .get_order(order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, "cancelled");
    assert_eq!(order.payment_status.as_deref(), Some("rejected"));
}

#[tokio::test]
async fn pending_payment_awaits_and_email_says_so() {
    let app = TestApp::new().await;
    let token = app.token_for(Uuid::new_v4(), "torcedor@example.com");
    app.gateway
        .script_create(Ok(gateway_payment("9000000003", "pending", None)));

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(pix_payload("Flamengo Home", None)),
            Some(&token),
        )
        .await;
    let body = response_json(response).await;
    assert_eq!(body["status"], "awaiting_payment");

    let sent = app.mailer.sent_messages();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("Aguardando Pagamento"));
}

#[tokio::test]
async fn unresolvable_product_still_creates_one_order_with_no_items() {
    let app = TestApp::new().await;
    // Two products both matching "Flamengo" makes the hint ambiguous.
    app.seed_product("Camisa Flamengo Home 2024", dec!(151.90)).await;
    app.seed_product("Camisa Flamengo Away 2024", dec!(151.90)).await;
    let token = app.token_for(Uuid::new_v4(), "torcedor@example.com");

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(pix_payload("Flamengo", None)),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // The order exists and charged, but no line item was linked.
    let body = response_json(response).await;
    let order_id = Uuid::parse_str(body["orderId"].as_str().unwrap()).unwrap();
    let order = app
        .state
        .services
        .orders
        .get_order(order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, "confirmed");
    let items = app.state.services.orders.get_order_items(order_id).await.unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn spec_minimum_payload_defaults_size_on_matched_item() {
    let app = TestApp::new().await;
    app.seed_product("Camisa Flamengo Home 2024", dec!(151.90)).await;
    let token = app.token_for(Uuid::new_v4(), "a@b.com");

    // Anonymous payer, no size collected by the chat flow.
    let payload = json!({
        "paymentMethod": "pix",
        "transactionAmount": 151.90,
        "productName": "Flamengo Home",
        "payer": {"email": "a@b.com"}
    });
    let response = app
        .request(Method::POST, "/api/v1/checkout", Some(payload), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert!(body["payment"]["qr_code"].is_string());
    let order_id = Uuid::parse_str(body["orderId"].as_str().unwrap()).unwrap();
    let items = app.state.services.orders.get_order_items(order_id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].size, "G");
    assert_eq!(items[0].price_at_purchase, dec!(151.90));
}

#[tokio::test]
async fn same_idempotency_key_charges_once() {
    let app = TestApp::new().await;
    let token = app.token_for(Uuid::new_v4(), "torcedor@example.com");

    let first = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(pix_payload("Flamengo Home", Some("chk_11111111"))),
            Some(&token),
        )
        .await;
    let first_body = response_json(first).await;

    let second = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(pix_payload("Flamengo Home", Some("chk_11111111"))),
            Some(&token),
        )
        .await;
    assert_eq!(second.status(), StatusCode::OK);
    let second_body = response_json(second).await;

    assert_eq!(first_body["orderId"], second_body["orderId"]);
    assert_eq!(app.gateway.create_call_count(), 1);
}

#[tokio::test]
async fn distinct_submissions_without_key_create_distinct_orders() {
    let app = TestApp::new().await;
    let token = app.token_for(Uuid::new_v4(), "torcedor@example.com");

    let first = response_json(
        app.request(
            Method::POST,
            "/api/v1/checkout",
            Some(pix_payload("Flamengo Home", None)),
            Some(&token),
        )
        .await,
    )
    .await;
    let second = response_json(
        app.request(
            Method::POST,
            "/api/v1/checkout",
            Some(pix_payload("Flamengo Home", None)),
            Some(&token),
        )
        .await,
    )
    .await;

    assert_ne!(first["orderId"], second["orderId"]);
    assert_eq!(app.gateway.create_call_count(), 2);
}

#[tokio::test]
async fn gateway_failure_leaves_order_pending() {
    let app = TestApp::new().await;
    let customer_id = Uuid::new_v4();
    let token = app.token_for(customer_id, "torcedor@example.com");
    app.gateway.script_create(Err(ServiceError::GatewayRequest(
        "connection refused".to_string(),
    )));

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(pix_payload("Flamengo Home", Some("chk_22222222"))),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    // The order row exists and is still pending, ready for a retry.
    let existing = app
        .state
        .services
        .orders
        .find_by_idempotency_key(customer_id, "chk_22222222")
        .await
        .unwrap()
        .expect("order should exist despite gateway failure");
    assert_eq!(existing.status, "pending");
    assert!(existing.payment_id.is_none());
    assert!(app.mailer.sent_messages().is_empty());
}

#[tokio::test]
async fn retry_after_gateway_failure_reuses_pending_order() {
    let app = TestApp::new().await;
    let customer_id = Uuid::new_v4();
    let token = app.token_for(customer_id, "torcedor@example.com");
    app.gateway.script_create(Err(ServiceError::GatewayRequest(
        "connection refused".to_string(),
    )));

    let first = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(pix_payload("Flamengo Home", Some("chk_33333333"))),
            Some(&token),
        )
        .await;
    assert_eq!(first.status(), StatusCode::BAD_GATEWAY);

    let retry = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(pix_payload("Flamengo Home", Some("chk_33333333"))),
            Some(&token),
        )
        .await;
    assert_eq!(retry.status(), StatusCode::OK);
    let body = response_json(retry).await;
    assert_eq!(body["status"], "confirmed");

    // One order total for the key; the retry resumed it.
    let order_id = Uuid::parse_str(body["orderId"].as_str().unwrap()).unwrap();
    let stored = app
        .state
        .services
        .orders
        .find_by_idempotency_key(customer_id, "chk_33333333")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, order_id);
    assert_eq!(app.gateway.create_call_count(), 2);
}

#[tokio::test]
async fn mailer_failure_does_not_change_checkout_result() {
    let app = TestApp::new().await;
    let token = app.token_for(Uuid::new_v4(), "torcedor@example.com");
    app.mailer.fail.store(true, Ordering::SeqCst);

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(pix_payload("Flamengo Home", None)),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "confirmed");
}

#[tokio::test]
async fn checkout_requires_authentication() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(pix_payload("Flamengo Home", None)),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn card_checkout_requires_token_fields() {
    let app = TestApp::new().await;
    let token = app.token_for(Uuid::new_v4(), "torcedor@example.com");

    let payload = json!({
        "paymentMethod": "credit_card",
        "transactionAmount": 151.90,
        "payer": {"email": "torcedor@example.com", "firstName": "Ana"}
    });
    let response = app
        .request(Method::POST, "/api/v1/checkout", Some(payload), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.gateway.create_call_count(), 0);
}

#[tokio::test]
async fn non_positive_amount_is_rejected() {
    let app = TestApp::new().await;
    let token = app.token_for(Uuid::new_v4(), "torcedor@example.com");

    let mut payload = pix_payload("Flamengo Home", None);
    payload["transactionAmount"] = json!(0);
    let response = app
        .request(Method::POST, "/api/v1/checkout", Some(payload), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.gateway.create_call_count(), 0);
}

#[tokio::test]
async fn customers_only_see_their_own_orders() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let owner_token = app.token_for(owner, "dona@example.com");
    let other_token = app.token_for(Uuid::new_v4(), "outro@example.com");

    let body = response_json(
        app.request(
            Method::POST,
            "/api/v1/checkout",
            Some(pix_payload("Flamengo Home", None)),
            Some(&owner_token),
        )
        .await,
    )
    .await;
    let order_id = body["orderId"].as_str().unwrap().to_string();

    let own = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            Some(&owner_token),
        )
        .await;
    assert_eq!(own.status(), StatusCode::OK);

    let foreign = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            Some(&other_token),
        )
        .await;
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);
}

type HmacSha256 = Hmac<Sha256>;

fn webhook_headers(payment_id: &str, ts: i64) -> Vec<(String, String)> {
    let manifest = format!("id:{};request-id:req-test;ts:{};", payment_id, ts);
    let mut mac = HmacSha256::new_from_slice(b"test-webhook-secret").unwrap();
    mac.update(manifest.as_bytes());
    let v1 = hex::encode(mac.finalize().into_bytes());
    vec![
        ("x-signature".to_string(), format!("ts={},v1={}", ts, v1)),
        ("x-request-id".to_string(), "req-test".to_string()),
    ]
}

#[tokio::test]
async fn webhook_moves_awaiting_order_to_confirmed() {
    let app = TestApp::new().await;
    let token = app.token_for(Uuid::new_v4(), "torcedor@example.com");
    app.gateway
        .script_create(Ok(gateway_payment("9000000010", "pending", None)));

    let body = response_json(
        app.request(
            Method::POST,
            "/api/v1/checkout",
            Some(pix_payload("Flamengo Home", None)),
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(body["status"], "awaiting_payment");
    let order_id = Uuid::parse_str(body["orderId"].as_str().unwrap()).unwrap();

    // The customer paid the PIX; the processor notifies us.
    app.gateway
        .script_get(Ok(gateway_payment("9000000010", "approved", Some(order_id))));

    let ts = chrono::Utc::now().timestamp();
    let headers = webhook_headers("9000000010", ts);
    let header_refs: Vec<(&str, &str)> = headers
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let response = app
        .request_with_headers(
            Method::POST,
            "/api/v1/payments/webhook?data.id=9000000010",
            Some(json!({"type": "payment", "data": {"id": "9000000010"}})),
            None,
            &header_refs,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app
        .state
        .services
        .orders
        .get_order(order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, "confirmed");
    assert_eq!(order.payment_status.as_deref(), Some("approved"));
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let app = TestApp::new().await;
    let ts = chrono::Utc::now().timestamp();
    let response = app
        .request_with_headers(
            Method::POST,
            "/api/v1/payments/webhook",
            Some(json!({"type": "payment", "data": {"id": "123"}})),
            None,
            &[
                ("x-signature", &format!("ts={},v1=deadbeef", ts)),
                ("x-request-id", "req-test"),
            ],
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_never_moves_terminal_order_backwards() {
    let app = TestApp::new().await;
    let token = app.token_for(Uuid::new_v4(), "torcedor@example.com");
    app.gateway
        .script_create(Ok(gateway_payment("9000000020", "approved", None)));

    let body = response_json(
        app.request(
            Method::POST,
            "/api/v1/checkout",
            Some(pix_payload("Flamengo Home", None)),
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(body["status"], "confirmed");
    let order_id = Uuid::parse_str(body["orderId"].as_str().unwrap()).unwrap();

    // Late out-of-order notification claiming the payment is pending again.
    app.gateway
        .script_get(Ok(gateway_payment("9000000020", "pending", Some(order_id))));
    let ts = chrono::Utc::now().timestamp();
    let headers = webhook_headers("9000000020", ts);
    let header_refs: Vec<(&str, &str)> = headers
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let response = app
        .request_with_headers(
            Method::POST,
            "/api/v1/payments/webhook?data.id=9000000020",
            Some(json!({"type": "payment", "data": {"id": "9000000020"}})),
            None,
            &header_refs,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app
        .state
        .services
        .orders
        .get_order(order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, "confirmed");
}

#[tokio::test]
async fn webhook_for_unknown_payment_returns_ok() {
    let app = TestApp::new().await;
    app.gateway
        .script_get(Ok(gateway_payment("7777777777", "approved", None)));

    let ts = chrono::Utc::now().timestamp();
    let headers = webhook_headers("7777777777", ts);
    let header_refs: Vec<(&str, &str)> = headers
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let response = app
        .request_with_headers(
            Method::POST,
            "/api/v1/payments/webhook?data.id=7777777777",
            Some(json!({"type": "payment", "data": {"id": "7777777777"}})),
            None,
            &header_refs,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}
