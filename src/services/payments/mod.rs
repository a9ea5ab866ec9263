pub mod mercado_pago;

use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub use mercado_pago::MercadoPagoGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Pix,
    CreditCard,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Pix => "pix",
            PaymentMethod::CreditCard => "credit_card",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PayerIdentification {
    /// CPF or CNPJ.
    #[serde(rename = "type")]
    pub kind: String,
    pub number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PayerInfo {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identification: Option<PayerIdentification>,
}

/// Card fields forwarded verbatim to the processor. The card number itself
/// never reaches this service; `token` stands in for it.
#[derive(Debug, Clone)]
pub struct CardPayment {
    pub token: String,
    pub payment_method_id: String,
    pub installments: u32,
    pub issuer_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub order_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub description: String,
    pub payer: PayerInfo,
    pub card: Option<CardPayment>,
    /// Forwarded to the processor so retried submissions collapse into one
    /// charge.
    pub idempotency_key: Option<String>,
}

/// Gateway-reported payment state, normalized only as far as stringifying
/// the processor's id. `raw_status` keeps the processor vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GatewayPayment {
    pub id: String,
    pub raw_status: String,
    /// Order id echoed back by the processor.
    pub external_reference: Option<String>,
    pub qr_code: Option<String>,
    pub qr_code_base64: Option<String>,
    pub ticket_url: Option<String>,
}

/// Seam between checkout and the payment processor. Injected so tests can
/// script outcomes without network access.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(&self, request: &PaymentRequest)
        -> Result<GatewayPayment, ServiceError>;

    async fn get_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError>;
}

/// Maps the processor's status vocabulary onto the order lifecycle:
/// `approved` confirms, `rejected` cancels, anything else (including
/// vocabulary added later) waits.
pub fn normalize_status(raw: &str) -> OrderStatus {
    match raw {
        "approved" => OrderStatus::Confirmed,
        "rejected" => OrderStatus::Cancelled,
        _ => OrderStatus::AwaitingPayment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_normalization_table() {
        let cases = [
            ("approved", OrderStatus::Confirmed),
            ("rejected", OrderStatus::Cancelled),
            ("cancelled", OrderStatus::AwaitingPayment),
            ("pending", OrderStatus::AwaitingPayment),
            ("authorized", OrderStatus::AwaitingPayment),
            ("in_process", OrderStatus::AwaitingPayment),
            ("in_mediation", OrderStatus::AwaitingPayment),
            ("refunded", OrderStatus::AwaitingPayment),
            ("charged_back", OrderStatus::AwaitingPayment),
            ("some_future_status", OrderStatus::AwaitingPayment),
            ("", OrderStatus::AwaitingPayment),
        ];
        for (raw, expected) in cases {
            assert_eq!(normalize_status(raw), expected, "raw status {:?}", raw);
        }
    }

    #[test]
    fn payment_method_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(PaymentMethod::CreditCard).unwrap(),
            serde_json::json!("credit_card")
        );
        assert_eq!(PaymentMethod::Pix.as_str(), "pix");
    }
}
