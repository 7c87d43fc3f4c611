// Recipient notifications: new-low alerts and failure reports

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{error::Error as StdError, time::Duration};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::models::FlightOption;
use crate::search::SearchFilters;

pub const ALERT_SUBJECT: &str = "Flight Price Alert";
pub const FAILURE_SUBJECT: &str = "Flight Price Alert Service - Error";

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Delivery to {recipient} failed: {status_code} - {message}")]
    DeliveryError {
        recipient: String,
        status_code: u16,
        message: String,
    },

    #[error("Render error: {0}")]
    RenderError(String),
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify_new_minimum(
        &self,
        filters: &SearchFilters,
        flight: &FlightOption,
    ) -> Result<(), NotifyError>;

    /// Best effort. Callers log a failure here and keep the original error.
    async fn notify_failure(&self, cause: &(dyn StdError + Send + Sync)) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub body: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageBody {
    Html(String),
    Text(String),
}

/// Alert for a new lowest price, built from the first leg of the winning option.
pub fn render_alert(filters: &SearchFilters, flight: &FlightOption) -> Result<Message, NotifyError> {
    let leg = flight.primary_leg().ok_or_else(|| {
        NotifyError::RenderError(format!(
            "option {} has no flight legs",
            flight.departure_token
        ))
    })?;

    let details = format!(
        "<p>{airline}</p><br>\
         <p>Passengers: {adults} adults and {children} children</p><br>\
         <p>Departure {dep_time} from {dep_name}</p><br>\
         <p>Arrival {arr_time} at {arr_name}</p><br>\
         <p>Duration: {hours} h</p><br>\
         <p>{currency} {price}</p><br>\
         <p>Departure airport: {dep_id}</p><br>",
        airline = leg.airline,
        adults = filters.get("adults").unwrap_or("-"),
        children = filters.get("children").unwrap_or("-"),
        dep_time = leg.departure_airport.time,
        dep_name = leg.departure_airport.name,
        arr_time = leg.arrival_airport.time,
        arr_name = leg.arrival_airport.name,
        hours = leg.duration / 60,
        currency = filters.get("currency").unwrap_or(""),
        price = flight.price,
        dep_id = leg.departure_airport.id,
    );

    Ok(Message {
        subject: ALERT_SUBJECT.to_string(),
        body: MessageBody::Html(format!(
            "<h1>Price Alert</h1><p>Found a flight cheaper than the recorded lowest price</p>{}",
            details
        )),
    })
}

pub fn render_failure(cause: &(dyn StdError + Send + Sync)) -> Message {
    Message {
        subject: FAILURE_SUBJECT.to_string(),
        body: MessageBody::Text(format!(
            "The flight price alert service failed: {}",
            cause
        )),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierBackend {
    Log,
    Email,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_backend")]
    pub backend: NotifierBackend,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_backend() -> NotifierBackend {
    NotifierBackend::Log
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            endpoint: String::new(),
            api_key: String::new(),
            from: String::new(),
            recipients: vec![],
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    #[serde(flatten)]
    body: &'a MessageBody,
}

/// Sends mail through an HTTP transactional-mail API, one message per recipient.
pub struct EmailNotifier {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
    recipients: Vec<String>,
}

// The mail service rejects recipients that have not confirmed their address yet
fn is_unverified_recipient(status_code: u16, message: &str) -> bool {
    matches!(status_code, 403 | 422) && message.to_lowercase().contains("not verified")
}

impl EmailNotifier {
    pub fn new(config: &NotifierConfig) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| NotifyError::NetworkError(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            from: config.from.clone(),
            recipients: config.recipients.clone(),
        })
    }

    async fn deliver(&self, message: &Message) -> Result<(), NotifyError> {
        for recipient in &self.recipients {
            let request = MailRequest {
                from: &self.from,
                to: [recipient.as_str()],
                subject: &message.subject,
                body: &message.body,
            };

            let response = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
                .map_err(|e| NotifyError::NetworkError(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                info!(%recipient, subject = %message.subject, "email sent");
                continue;
            }

            let text = response.text().await.unwrap_or_default();
            // The HTTP mail API has no verification endpoint, so the address is only skipped
            if is_unverified_recipient(status.as_u16(), &text) {
                warn!(%recipient, "recipient not verified, skipping");
                continue;
            }

            return Err(NotifyError::DeliveryError {
                recipient: recipient.clone(),
                status_code: status.as_u16(),
                message: text,
            });
        }

        info!(recipients = self.recipients.len(), "sent to all recipients");
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify_new_minimum(
        &self,
        filters: &SearchFilters,
        flight: &FlightOption,
    ) -> Result<(), NotifyError> {
        let message = render_alert(filters, flight)?;
        self.deliver(&message).await
    }

    async fn notify_failure(&self, cause: &(dyn StdError + Send + Sync)) -> Result<(), NotifyError> {
        error!(error = %cause, "reporting failure to recipients");
        self.deliver(&render_failure(cause)).await
    }
}

/// Writes notifications to the log only. Used for local runs.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_new_minimum(
        &self,
        filters: &SearchFilters,
        flight: &FlightOption,
    ) -> Result<(), NotifyError> {
        let message = render_alert(filters, flight)?;
        info!(subject = %message.subject, body = ?message.body, "new minimum alert");
        Ok(())
    }

    async fn notify_failure(&self, cause: &(dyn StdError + Send + Sync)) -> Result<(), NotifyError> {
        error!(error = %cause, "run failed");
        Ok(())
    }
}
