use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    middleware, Router,
};
use golclub_api::auth::AuthService;
use golclub_api::config::AppConfig;
use golclub_api::db;
use golclub_api::entities::product;
use golclub_api::errors::ServiceError;
use golclub_api::events::{event_channel, process_events};
use golclub_api::handlers::AppServices;
use golclub_api::services::catalog::CreateProductInput;
use golclub_api::services::notifications::{EmailMessage, Mailer};
use golclub_api::services::payments::{GatewayPayment, PaymentGateway, PaymentRequest};
use golclub_api::AppState;
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

/// Scriptable gateway double: each `create_payment` pops the next scripted
/// result and records the request it saw.
#[derive(Default)]
pub struct ScriptedGateway {
    create_results: Mutex<VecDeque<Result<GatewayPayment, ServiceError>>>,
    get_results: Mutex<VecDeque<Result<GatewayPayment, ServiceError>>>,
    pub create_calls: AtomicUsize,
    requests: Mutex<Vec<PaymentRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_create(&self, result: Result<GatewayPayment, ServiceError>) {
        self.create_results.lock().unwrap().push_back(result);
    }

    pub fn script_get(&self, result: Result<GatewayPayment, ServiceError>) {
        self.get_results.lock().unwrap().push_back(result);
    }

    pub fn seen_requests(&self) -> Vec<PaymentRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn create_call_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

/// Payment fixture in the shape Mercado Pago reports.
pub fn gateway_payment(id: &str, raw_status: &str, order_id: Option<Uuid>) -> GatewayPayment {
    GatewayPayment {
        id: id.to_string(),
        raw_status: raw_status.to_string(),
        external_reference: order_id.map(|o| o.to_string()),
        qr_code: Some("00020126580014br.gov.bcb.pix...".to_string()),
        qr_code_base64: Some("aVFSY29kZQ==".to_string()),
        ticket_url: Some("https://mercadopago.com.br/payments/ticket".to_string()),
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<GatewayPayment, ServiceError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.create_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(gateway_payment(
                    "9000000001",
                    "approved",
                    Some(request.order_id),
                ))
            })
    }

    async fn get_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError> {
        self.get_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(gateway_payment(payment_id, "approved", None)))
    }
}

/// Mailer double that records every message and can be told to fail.
#[derive(Default)]
pub struct RecordingMailer {
    pub fail: AtomicBool,
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_messages(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::NotificationError(
                "scripted mailer failure".to_string(),
            ));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Application harness backed by an in-memory SQLite database with the
/// gateway and mailer replaced by the doubles above.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<ScriptedGateway>,
    pub mailer: Arc<RecordingMailer>,
    auth_service: Arc<AuthService>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let config = AppConfig::new_for_test();

        let pool = db::establish_connection_with_config(&db::DbConfig {
            url: config.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_sender, event_receiver) = event_channel(256);
        let event_task = tokio::spawn(process_events(event_receiver));

        let gateway = Arc::new(ScriptedGateway::new());
        let mailer = Arc::new(RecordingMailer::new());
        let services = AppServices::new(
            db_arc.clone(),
            &config,
            event_sender.clone(),
            gateway.clone(),
            mailer.clone(),
        );

        let auth_service = Arc::new(AuthService::new(&config.jwt_secret, config.jwt_expiration));

        let state = AppState {
            db: db_arc,
            config: Arc::new(config),
            event_sender,
            services,
        };

        let auth_for_layer = auth_service.clone();
        let api_router = golclub_api::api_v1_routes().layer(middleware::from_fn(
            move |mut req: Request<Body>, next: axum::middleware::Next| {
                let auth = auth_for_layer.clone();
                async move {
                    req.extensions_mut().insert(auth);
                    next.run(req).await
                }
            },
        ));

        let router = Router::new()
            .nest("/api/v1", api_router)
            .with_state(state.clone());

        Self {
            router,
            state,
            gateway,
            mailer,
            auth_service,
            _event_task: event_task,
        }
    }

    pub fn token_for(&self, customer_id: Uuid, email: &str) -> String {
        self.auth_service
            .issue_token(customer_id, email, Some("Ana"))
            .expect("issue test token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        self.request_with_headers(method, uri, body, token, &[])
            .await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> product::Model {
        self.state
            .services
            .catalog
            .create_product(CreateProductInput {
                name: name.to_string(),
                team: "Flamengo".to_string(),
                season: "2024/25".to_string(),
                kind: "home".to_string(),
                price_sale: price,
                image_url: None,
                stock_br: 10,
            })
            .await
            .expect("seed product for tests")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}
