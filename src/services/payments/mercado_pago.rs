use super::{GatewayPayment, PayerInfo, PaymentGateway, PaymentMethod, PaymentRequest};
use crate::config::AppConfig;
use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, instrument};

/// Mercado Pago payments API client. Holds no token when the deployment is
/// unconfigured; calls then fail with a configuration error instead of
/// reaching the network.
#[derive(Clone)]
pub struct MercadoPagoGateway {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreatePaymentBody<'a> {
    #[serde(with = "rust_decimal::serde::float")]
    transaction_amount: Decimal,
    description: &'a str,
    payment_method_id: &'a str,
    payer: &'a PayerInfo,
    external_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    installments: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    issuer_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: Value,
    status: String,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    point_of_interaction: Option<PointOfInteraction>,
}

#[derive(Debug, Deserialize)]
struct PointOfInteraction {
    #[serde(default)]
    transaction_data: Option<TransactionData>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    #[serde(default)]
    qr_code: Option<String>,
    #[serde(default)]
    qr_code_base64: Option<String>,
    #[serde(default)]
    ticket_url: Option<String>,
}

impl PaymentResponse {
    fn into_gateway_payment(self) -> GatewayPayment {
        let transaction = self
            .point_of_interaction
            .and_then(|poi| poi.transaction_data);
        // Mercado Pago returns the id as a JSON number.
        let id = match self.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        GatewayPayment {
            id,
            raw_status: self.status,
            external_reference: self.external_reference,
            qr_code: transaction.as_ref().and_then(|t| t.qr_code.clone()),
            qr_code_base64: transaction.as_ref().and_then(|t| t.qr_code_base64.clone()),
            ticket_url: transaction.and_then(|t| t.ticket_url),
        }
    }
}

impl MercadoPagoGateway {
    pub fn new(base_url: String, access_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            access_token,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.mercado_pago_base_url.clone(),
            config.mercado_pago_access_token.clone(),
        )
    }

    fn token(&self) -> Result<&str, ServiceError> {
        self.access_token.as_deref().ok_or_else(|| {
            ServiceError::GatewayConfig("Mercado Pago access token is not configured".to_string())
        })
    }

    fn build_body<'a>(request: &'a PaymentRequest) -> CreatePaymentBody<'a> {
        let card = request.card.as_ref();
        let payment_method_id = match request.method {
            PaymentMethod::Pix => "pix",
            // For cards the concrete brand id comes from the tokenizer.
            PaymentMethod::CreditCard => card.map(|c| c.payment_method_id.as_str()).unwrap_or(""),
        };
        CreatePaymentBody {
            transaction_amount: request.amount,
            description: &request.description,
            payment_method_id,
            payer: &request.payer,
            external_reference: request.order_id.to_string(),
            token: card.map(|c| c.token.as_str()),
            installments: card.map(|c| c.installments),
            issuer_id: card.and_then(|c| c.issuer_id.as_deref()),
        }
    }

    async fn parse_response(
        &self,
        response: reqwest::Response,
    ) -> Result<GatewayPayment, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, %body, "Mercado Pago request failed");
            return Err(ServiceError::GatewayRequest(format!(
                "payment processor returned {}",
                status
            )));
        }
        let payment: PaymentResponse = response.json().await.map_err(|e| {
            ServiceError::GatewayRequest(format!("invalid payment processor response: {}", e))
        })?;
        Ok(payment.into_gateway_payment())
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<GatewayPayment, ServiceError> {
        let token = self.token()?;
        let body = Self::build_body(request);

        let mut builder = self
            .http
            .post(format!("{}/v1/payments", self.base_url))
            .bearer_auth(token)
            .json(&body);
        if let Some(key) = &request.idempotency_key {
            builder = builder.header("X-Idempotency-Key", key);
        }

        let response = builder.send().await.map_err(|e| {
            error!("Mercado Pago request error: {}", e);
            ServiceError::GatewayRequest(format!("payment processor unreachable: {}", e))
        })?;
        self.parse_response(response).await
    }

    #[instrument(skip(self))]
    async fn get_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError> {
        let token = self.token()?;
        let response = self
            .http
            .get(format!("{}/v1/payments/{}", self.base_url, payment_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                error!("Mercado Pago request error: {}", e);
                ServiceError::GatewayRequest(format!("payment processor unreachable: {}", e))
            })?;
        self.parse_response(response).await
    }
}
