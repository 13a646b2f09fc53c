//! Outgoing mail for verification codes and recovery links.
//!
//! Delivery is fire and forget: a sender error is logged and never changes the
//! outcome of the request that produced the message.

use anyhow::Result;
use serde_json::Value;
use tracing::{error, info};

pub const TEMPLATE_VERIFICATION: &str = "verification";
pub const TEMPLATE_PASSWORD_RECOVERY: &str = "password_recovery";

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

impl EmailMessage {
    #[must_use]
    pub fn new(to_email: &str, template: &str, payload: &Value) -> Self {
        Self {
            to_email: to_email.to_string(),
            template: template.to_string(),
            payload_json: payload.to_string(),
        }
    }
}

pub trait EmailSender: Send + Sync {
    /// Deliver a message.
    ///
    /// # Errors
    /// Returns an error when the message could not be handed off.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Logs the message instead of delivering it.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload = %message.payload_json,
            "email send stub"
        );
        Ok(())
    }
}

pub(crate) fn dispatch(sender: &dyn EmailSender, message: &EmailMessage) {
    if let Err(err) = sender.send(message) {
        error!(
            to_email = %message.to_email,
            template = %message.template,
            "failed to send email: {err:#}"
        );
    }
}
