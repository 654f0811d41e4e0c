//! WhatsApp Cloud API delivery adapter.
//!
//! One HTTPS request per message against
//! `POST {base}/{phone_number_id}/messages` with the account's bearer token.
//! A send is successful only when the response status is 200/201 AND the body
//! carries a non-empty `messages[].id` — a 2xx without a message id is
//! ambiguous for id tracking and is treated as failed.
//!
//! The adapter never raises to the caller: every path collapses into a
//! structured [`WhatsAppOutcome`].

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use courier_common::types::{Message, WhatsAppAccount};

/// Structured outcome of one WhatsApp send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhatsAppOutcome {
    Sent { message_id: String },
    Failed { reason: String },
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessageId>,
}

#[derive(Debug, Deserialize)]
struct SentMessageId {
    #[serde(default)]
    id: String,
}

/// Thin client over the WhatsApp Cloud API.
#[derive(Clone)]
pub struct WhatsAppClient {
    http: reqwest::Client,
    base_url: String,
}

impl WhatsAppClient {
    /// Build a client with a bounded request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Send one message through `account`.
    ///
    /// A message with a `template_name` is sent as a template reference;
    /// otherwise its body is sent literally as text.
    pub async fn send(&self, account: &WhatsAppAccount, message: &Message) -> WhatsAppOutcome {
        let payload = match &message.template_name {
            Some(template) => json!({
                "messaging_product": "whatsapp",
                "to": message.recipient,
                "type": "template",
                "template": {
                    "name": template,
                    "language": { "code": "en_US" }
                }
            }),
            None => json!({
                "messaging_product": "whatsapp",
                "to": message.recipient,
                "type": "text",
                "text": { "body": message.body }
            }),
        };

        let url = format!("{}/{}/messages", self.base_url, account.phone_number_id);

        let response = match self
            .http
            .post(&url)
            .bearer_auth(&account.access_token)
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return WhatsAppOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !matches!(status.as_u16(), 200 | 201) {
            return WhatsAppOutcome::Failed {
                reason: format!("API error ({status}): {body}"),
            };
        }

        // Status-only success without a message id is ambiguous — failed for
        // id-tracking purposes.
        match serde_json::from_str::<SendResponse>(&body) {
            Ok(parsed) => match parsed.messages.into_iter().next() {
                Some(m) if !m.id.is_empty() => WhatsAppOutcome::Sent { message_id: m.id },
                _ => WhatsAppOutcome::Failed {
                    reason: format!("Accepted without a message id: {body}"),
                },
            },
            Err(_) => WhatsAppOutcome::Failed {
                reason: format!("Unparseable response body: {body}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_common::types::{Channel, MessageStatus};
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_account() -> WhatsAppAccount {
        WhatsAppAccount {
            id: Uuid::new_v4(),
            name: "business-1".to_string(),
            phone_number_id: "123456789".to_string(),
            access_token: "token-abc".to_string(),
            is_active: true,
            daily_limit: 1000,
            messages_sent_today: 0,
            last_reset_date: Utc::now().date_naive(),
        }
    }

    fn make_whatsapp(template: Option<&str>) -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            channel: Channel::Whatsapp,
            recipient: "+15551234567".to_string(),
            subject: None,
            body: "Your order has shipped".to_string(),
            template_name: template.map(String::from),
            status: MessageStatus::Processing,
            provider_message_id: None,
            error_message: None,
            smtp_server_id: None,
            whatsapp_account_id: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn test_text_send_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/123456789/messages"))
            .and(header("authorization", "Bearer token-abc"))
            .and(body_partial_json(json!({
                "messaging_product": "whatsapp",
                "to": "+15551234567",
                "type": "text",
                "text": { "body": "Your order has shipped" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{ "id": "wamid.test123" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = WhatsAppClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let outcome = client.send(&make_account(), &make_whatsapp(None)).await;

        assert_eq!(
            outcome,
            WhatsAppOutcome::Sent {
                message_id: "wamid.test123".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_template_send_carries_template_reference() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/123456789/messages"))
            .and(body_partial_json(json!({
                "type": "template",
                "template": { "name": "order_update", "language": { "code": "en_US" } }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "messages": [{ "id": "wamid.tmpl1" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = WhatsAppClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let outcome = client
            .send(&make_account(), &make_whatsapp(Some("order_update")))
            .await;

        assert_eq!(
            outcome,
            WhatsAppOutcome::Sent {
                message_id: "wamid.tmpl1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_accepted_without_message_id_is_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "messages": [] })))
            .mount(&server)
            .await;

        let client = WhatsAppClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let outcome = client.send(&make_account(), &make_whatsapp(None)).await;

        match outcome {
            WhatsAppOutcome::Failed { reason } => {
                assert!(reason.contains("without a message id"))
            }
            other => panic!("Expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_provider_rejection_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({ "error": { "message": "Invalid recipient" } })),
            )
            .mount(&server)
            .await;

        let client = WhatsAppClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let outcome = client.send(&make_account(), &make_whatsapp(None)).await;

        match outcome {
            WhatsAppOutcome::Failed { reason } => {
                assert!(reason.contains("Invalid recipient"));
                assert!(reason.contains("400"));
            }
            other => panic!("Expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_error_is_failed_not_panic() {
        // Nothing listening on this port.
        let client =
            WhatsAppClient::new("http://127.0.0.1:1", Duration::from_millis(200)).unwrap();
        let outcome = client.send(&make_account(), &make_whatsapp(None)).await;
        assert!(matches!(outcome, WhatsAppOutcome::Failed { .. }));
    }
}
