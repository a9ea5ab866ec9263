use crate::config::AppConfig;
use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

/// Outbound email seam. Checkout treats every failure here as non-fatal.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError>;
}

/// Resend HTTP client. Without an API key it silently skips sends, which
/// keeps local development working with no email account.
#[derive(Clone)]
pub struct ResendMailer {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ResendMailer {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.resend_base_url.clone(), config.resend_api_key.clone())
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    #[instrument(skip(self, message), fields(subject = %message.subject))]
    async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError> {
        let Some(api_key) = &self.api_key else {
            debug!("Resend API key not configured; skipping email");
            return Ok(());
        };

        let response = self
            .http
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(api_key)
            .json(message)
            .send()
            .await
            .map_err(|e| ServiceError::NotificationError(format!("email send failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, %body, "Resend rejected email");
            return Err(ServiceError::NotificationError(format!(
                "email provider returned {}",
                status
            )));
        }
        Ok(())
    }
}

/// Builds the order confirmation email. Subject and body are in Portuguese,
/// matching the storefront audience; the order id is shortened to its first
/// 8 hex characters for display.
pub fn order_outcome_email(
    order_id: Uuid,
    status: OrderStatus,
    amount: Decimal,
    payment_method: &str,
    customer_name: Option<&str>,
) -> (String, String) {
    let short_id = &order_id.simple().to_string()[..8];
    let approved = status == OrderStatus::Confirmed;

    let subject = if approved {
        format!("Pedido #{} - Pagamento Aprovado", short_id)
    } else {
        format!("Pedido #{} - Aguardando Pagamento", short_id)
    };

    let greeting = match customer_name {
        Some(name) => format!("Olá, {}!", name),
        None => "Olá!".to_string(),
    };
    let method_label = match payment_method {
        "pix" => "PIX",
        "credit_card" => "Cartão de Crédito",
        other => other,
    };
    let status_line = if approved {
        "Seu pagamento foi aprovado e seu pedido está confirmado."
    } else {
        "Recebemos seu pedido e estamos aguardando a confirmação do pagamento."
    };

    let mut html = format!(
        "<h1>GolClub</h1>\
         <p>{}</p>\
         <p>{}</p>\
         <p>Pedido: <strong>#{}</strong><br>\
         Valor: <strong>R$ {:.2}</strong><br>\
         Forma de pagamento: <strong>{}</strong></p>",
        greeting, status_line, short_id, amount, method_label
    );
    if !approved && payment_method == "pix" {
        html.push_str(
            "<p>Conclua o pagamento pelo QR Code PIX exibido na tela de checkout. \
             O código expira em 30 minutos.</p>",
        );
    }
    html.push_str("<p>Obrigado por comprar na GolClub!</p>");

    (subject, html)
}
