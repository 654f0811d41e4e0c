//! SMTP delivery adapter.
//!
//! One async SMTP transport is built per batch from the selected server's
//! credentials and dropped at scope exit, closing the session deterministically
//! regardless of outcome. The underlying transport has no per-message partial
//! result for a batch, so email batches are all-or-nothing: the first send
//! error fails the whole batch.

use std::time::Duration;

use lettre::message::{Mailbox, header};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use courier_common::types::{Message, SmtpServer};

/// Build the transport for one SMTP server, with a bounded timeout so a stuck
/// session cannot hold a claimed batch indefinitely.
pub fn build_transport(
    server: &SmtpServer,
    timeout: Duration,
) -> anyhow::Result<AsyncSmtpTransport<Tokio1Executor>> {
    let credentials = Credentials::new(server.username.clone(), server.password.clone());

    let builder = if server.use_tls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&server.host)?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&server.host)
    };

    Ok(builder
        .port(server.port as u16)
        .credentials(credentials)
        .timeout(Some(timeout))
        .build())
}

/// Build the wire message for one outbound email.
///
/// The sending identity is the server's username; the message subject falls
/// back to empty when absent.
pub fn build_message(server: &SmtpServer, message: &Message) -> anyhow::Result<lettre::Message> {
    let from: Mailbox = server
        .username
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid sender address '{}'", server.username))?;
    let to: Mailbox = message
        .recipient
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid recipient address '{}'", message.recipient))?;

    let email = lettre::Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject.as_deref().unwrap_or_default())
        .header(header::ContentType::TEXT_PLAIN)
        .body(message.body.clone())?;

    Ok(email)
}

/// Send a batch of same-server emails over one transport session.
///
/// Returns the transport error text on failure; the caller degrades the whole
/// batch with it.
pub async fn send_batch(
    server: &SmtpServer,
    batch: &[Message],
    timeout: Duration,
) -> Result<(), String> {
    let transport = build_transport(server, timeout).map_err(|e| e.to_string())?;

    for message in batch {
        let email = build_message(server, message).map_err(|e| e.to_string())?;
        transport
            .send(email)
            .await
            .map_err(|e| format!("SMTP error: {e}"))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_common::types::{Channel, MessageStatus};
    use uuid::Uuid;

    fn make_server() -> SmtpServer {
        SmtpServer {
            id: Uuid::new_v4(),
            name: "primary".to_string(),
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "sender@example.com".to_string(),
            password: "secret".to_string(),
            use_tls: true,
            is_active: true,
            daily_limit: 1000,
            messages_sent_today: 0,
            last_reset_date: Utc::now().date_naive(),
        }
    }

    fn make_email(recipient: &str, subject: Option<&str>) -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            channel: Channel::Email,
            recipient: recipient.to_string(),
            subject: subject.map(String::from),
            body: "Hello from the dispatch engine".to_string(),
            template_name: None,
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

    #[test]
    fn test_build_message_sets_headers() {
        let server = make_server();
        let message = make_email("alice@example.com", Some("Greetings"));

        let email = build_message(&server, &message).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();

        assert!(raw.contains("From: sender@example.com"));
        assert!(raw.contains("To: alice@example.com"));
        assert!(raw.contains("Subject: Greetings"));
        assert!(raw.contains("Hello from the dispatch engine"));
    }

    #[test]
    fn test_build_message_without_subject() {
        let server = make_server();
        let message = make_email("alice@example.com", None);

        let email = build_message(&server, &message).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Subject:"));
    }

    #[test]
    fn test_build_message_rejects_bad_recipient() {
        let server = make_server();
        let message = make_email("not-an-address", Some("x"));

        let err = build_message(&server, &message).unwrap_err();
        assert!(err.to_string().contains("Invalid recipient"));
    }

    #[test]
    fn test_build_transport_plain() {
        let mut server = make_server();
        server.use_tls = false;
        server.port = 2525;
        assert!(build_transport(&server, Duration::from_secs(5)).is_ok());
    }
}
