use async_trait::async_trait;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::entities::user;
use crate::models::{OrderKind, OrderView};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Email delivery failed: {0}")]
    Delivery(String),
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
}

/// Outbound email transport.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, email: Email) -> Result<(), NotificationError>;
}

/// Writes emails to the log instead of delivering them.
#[derive(Debug, Clone)]
pub struct LoggingEmailSender {
    from: String,
}

impl LoggingEmailSender {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl EmailSender for LoggingEmailSender {
    async fn send_email(&self, email: Email) -> Result<(), NotificationError> {
        if !email.to.contains('@') {
            return Err(NotificationError::InvalidRecipient(email.to));
        }
        info!(from = %self.from, to = %email.to, subject = %email.subject, "email sent");
        Ok(())
    }
}

/// Variables a template may reference as `{{NAME}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum TemplateVar {
    UserName,
    OrderId,
    Amount,
    Currency,
    Items,
    PlanName,
    SupportEmail,
}

pub type TemplateVars = HashMap<TemplateVar, String>;

/// Replaces `{{NAME}}` tokens with values from `vars`.
///
/// Names match case-insensitively and may carry surrounding whitespace.
/// Unknown or unset names render as empty strings; an unterminated `{{` is
/// copied through verbatim.
pub fn render_template(template: &str, vars: &TemplateVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find("}}") {
            Some(close) => {
                let name = after_open[..close].trim();
                if let Some(value) = TemplateVar::from_str(name).ok().and_then(|v| vars.get(&v)) {
                    out.push_str(value);
                }
                rest = &after_open[close + 2..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

const CONFIRMATION_SUBJECT: &str = "Your order {{ORDER_ID}} is confirmed";

const CONFIRMATION_BODY: &str = "<p>Hi {{user_name}},</p>\
<p>Thanks for your purchase. We received {{CURRENCY}} {{AMOUNT}} for order {{ORDER_ID}}.</p>\
<p>{{ITEMS}}{{PLAN_NAME}}</p>\
<p>Questions? Write to {{SUPPORT_EMAIL}}.</p>";

/// Builds the confirmation email for a paid order.
pub fn order_confirmation_email(order: &OrderView, user: &user::Model, support_email: &str) -> Email {
    let mut vars = TemplateVars::new();
    vars.insert(TemplateVar::UserName, user.name.clone());
    vars.insert(TemplateVar::OrderId, order.id.to_string());
    vars.insert(TemplateVar::Amount, order.amounts.total.round_dp(2).to_string());
    vars.insert(TemplateVar::Currency, order.currency.clone());
    vars.insert(TemplateVar::SupportEmail, support_email.to_string());
    match &order.kind {
        OrderKind::Products { items } => {
            let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
            vars.insert(TemplateVar::Items, format!("Your downloads: {}", titles.join(", ")));
        }
        OrderKind::Membership { plan_key, months } => {
            vars.insert(
                TemplateVar::PlanName,
                format!("Membership: {} for {} month(s)", plan_key, months),
            );
        }
    }

    Email {
        to: user.email.clone(),
        subject: render_template(CONFIRMATION_SUBJECT, &vars),
        html: render_template(CONFIRMATION_BODY, &vars),
    }
}

/// Sends the confirmation email in the background. Failures are logged only.
#[instrument(skip_all, fields(order_id = %order.id))]
pub fn spawn_confirmation(
    sender: Arc<dyn EmailSender>,
    order: OrderView,
    user: user::Model,
    support_email: String,
) {
    let email = order_confirmation_email(&order, &user, &support_email);
    let order_id = order.id;
    tokio::spawn(async move {
        if let Err(e) = sender.send_email(email).await {
            warn!(order_id = %order_id, error = %e, "confirmation email failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> TemplateVars {
        let mut vars = TemplateVars::new();
        vars.insert(TemplateVar::UserName, "Asha".into());
        vars.insert(TemplateVar::Amount, "100.00".into());
        vars
    }

    #[test]
    fn substitutes_known_variables() {
        assert_eq!(
            render_template("Hi {{USER_NAME}}, you paid {{AMOUNT}}", &vars()),
            "Hi Asha, you paid 100.00"
        );
    }

    #[test]
    fn keys_match_case_insensitively() {
        assert_eq!(render_template("{{ user_name }}", &vars()), "Asha");
        assert_eq!(render_template("{{User_Name}}", &vars()), "Asha");
    }

    #[test]
    fn unknown_and_unset_keys_render_empty() {
        assert_eq!(render_template("[{{PASSWORD}}][{{PLAN_NAME}}]", &vars()), "[][]");
    }

    #[test]
    fn unterminated_token_is_kept() {
        assert_eq!(render_template("total {{AMOUNT", &vars()), "total {{AMOUNT");
    }

    #[test]
    fn values_are_not_re_expanded() {
        let mut vars = TemplateVars::new();
        vars.insert(TemplateVar::UserName, "{{AMOUNT}}".into());
        vars.insert(TemplateVar::Amount, "9".into());
        assert_eq!(render_template("{{USER_NAME}}", &vars), "{{AMOUNT}}");
    }
}
