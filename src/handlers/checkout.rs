use crate::auth::AuthenticatedUser;
use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use crate::handlers::common::{success_response, validate_input};
use crate::services::checkout::{CheckoutInput, CheckoutOutcome};
use crate::services::payments::{
    CardPayment, GatewayPayment, PayerIdentification, PayerInfo, PaymentMethod,
};
use crate::AppState;
use axum::{extract::State, response::Response, Json};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Checkout request as submitted by the storefront chat widget.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutPayload {
    pub payment_method: PaymentMethod,
    pub transaction_amount: Decimal,
    /// Free-text jersey name as the customer typed it in chat.
    #[validate(length(max = 200))]
    pub product_name: Option<String>,
    #[serde(default = "default_size")]
    #[validate(length(min = 1, max = 10))]
    pub size: String,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    pub payer: PayerPayload,
    /// Card-only fields, produced by the client-side tokenizer.
    pub token: Option<String>,
    pub payment_method_id: Option<String>,
    pub installments: Option<u32>,
    pub issuer_id: Option<String>,
    /// Client-generated key deduplicating double submissions.
    #[validate(length(min = 8, max = 100))]
    pub idempotency_key: Option<String>,
}

fn default_size() -> String {
    "G".to_string()
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PayerPayload {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 100))]
    pub first_name: Option<String>,
    pub identification: Option<IdentificationPayload>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct IdentificationPayload {
    /// CPF or CNPJ.
    #[serde(rename = "type")]
    pub kind: String,
    pub number: String,
}

/// Payment block mirrors the processor's field names so the storefront's
/// existing PIX rendering keeps working.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentSummary {
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_url: Option<String>,
}

impl From<GatewayPayment> for PaymentSummary {
    fn from(payment: GatewayPayment) -> Self {
        Self {
            id: payment.id,
            status: payment.raw_status,
            qr_code: payment.qr_code,
            qr_code_base64: payment.qr_code_base64,
            ticket_url: payment.ticket_url,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub success: bool,
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub payment: PaymentSummary,
}

impl From<CheckoutOutcome> for CheckoutResponse {
    fn from(outcome: CheckoutOutcome) -> Self {
        Self {
            success: true,
            order_id: outcome.order_id,
            status: outcome.status,
            payment: outcome.payment.into(),
        }
    }
}

/// Process a checkout: create the order, charge via Mercado Pago, and
/// return the payment details (QR code for PIX).
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutPayload,
    responses(
        (status = 200, description = "Payment processed", body = CheckoutResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Not signed in", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment processor unreachable", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "checkout"
)]
pub async fn process_checkout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CheckoutPayload>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    validate_input(&payload.payer)?;

    let card = match payload.payment_method {
        PaymentMethod::Pix => None,
        PaymentMethod::CreditCard => {
            let (token, payment_method_id) =
                match (payload.token.clone(), payload.payment_method_id.clone()) {
                    (Some(t), Some(m)) if !t.is_empty() && !m.is_empty() => (t, m),
                    _ => {
                        return Err(ServiceError::ValidationError(
                            "card payments require token and paymentMethodId".to_string(),
                        ))
                    }
                };
            Some(CardPayment {
                token,
                payment_method_id,
                installments: payload.installments.unwrap_or(1),
                issuer_id: payload.issuer_id.clone(),
            })
        }
    };

    let input = CheckoutInput {
        customer_id: user.id,
        customer_email: user.email.clone(),
        customer_name: user.name.clone(),
        amount: payload.transaction_amount,
        currency: state.config.currency.clone(),
        method: payload.payment_method,
        product_name: payload.product_name,
        size: payload.size,
        quantity: payload.quantity,
        payer: PayerInfo {
            email: payload.payer.email,
            first_name: payload.payer.first_name,
            identification: payload.payer.identification.map(|id| PayerIdentification {
                kind: id.kind,
                number: id.number,
            }),
        },
        card,
        idempotency_key: payload.idempotency_key,
    };

    let outcome = state.services.checkout.checkout(input).await?;
    Ok(success_response(CheckoutResponse::from(outcome)))
}
