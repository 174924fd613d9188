//! Order-confirmation and shipping-notification handlers (other handler
//! payloads). Both route through the `Mailer` boundary and never talk to
//! SMTP directly.

use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::handler::{HandlerContext, HandlerOutcome, JobHandler};
use crate::mailer::Mailer;

pub const ORDER_CONFIRMATION_QUEUE: &str = "order_confirmation_email";
pub const SHIPPING_NOTIFICATION_QUEUE: &str = "shipping_notification";

#[derive(Debug, Deserialize)]
pub struct OrderConfirmationPayload {
    pub order_id: String,
    pub recipient_email: String,
    pub template_id: String,
}

pub struct OrderConfirmationEmailHandler {
    pub mailer: Arc<dyn Mailer>,
}

#[async_trait::async_trait]
impl JobHandler for OrderConfirmationEmailHandler {
    fn queue_name(&self) -> &'static str {
        ORDER_CONFIRMATION_QUEUE
    }

    async fn execute(&self, payload: &serde_json::Value, _ctx: HandlerContext) -> HandlerOutcome {
        let payload: OrderConfirmationPayload = match serde_json::from_value(payload.clone()) {
            Ok(payload) => payload,
            Err(error) => {
                return HandlerOutcome::TerminalFailure {
                    reason: format!("invalid payload: {error}"),
                }
            }
        };

        let subject = format!("Your calyx order {} is confirmed", payload.order_id);
        let body = format!(
            "Thanks for your order! We'll notify you again once it ships. (template: {})",
            payload.template_id
        );

        match self.mailer.send(&payload.recipient_email, &subject, &body).await {
            Ok(()) => HandlerOutcome::Success,
            Err(error) => {
                warn!(error = %error, "order confirmation email send failed");
                HandlerOutcome::RetryableFailure {
                    reason: "mailer_unavailable".to_owned(),
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ShippingNotificationPayload {
    pub order_id: String,
    pub recipient_email: String,
    pub carrier: String,
    pub tracking_number: String,
}

pub struct ShippingNotificationHandler {
    pub mailer: Arc<dyn Mailer>,
}

#[async_trait::async_trait]
impl JobHandler for ShippingNotificationHandler {
    fn queue_name(&self) -> &'static str {
        SHIPPING_NOTIFICATION_QUEUE
    }

    async fn execute(&self, payload: &serde_json::Value, _ctx: HandlerContext) -> HandlerOutcome {
        let payload: ShippingNotificationPayload = match serde_json::from_value(payload.clone()) {
            Ok(payload) => payload,
            Err(error) => {
                return HandlerOutcome::TerminalFailure {
                    reason: format!("invalid payload: {error}"),
                }
            }
        };

        let subject = format!("Your calyx order {} has shipped", payload.order_id);
        let body = format!(
            "Shipped via {} — tracking number {}.",
            payload.carrier, payload.tracking_number
        );

        match self.mailer.send(&payload.recipient_email, &subject, &body).await {
            Ok(()) => HandlerOutcome::Success,
            Err(error) => {
                warn!(error = %error, "shipping notification email send failed");
                HandlerOutcome::RetryableFailure {
                    reason: "mailer_unavailable".to_owned(),
                }
            }
        }
    }
}
