//! Firebase Cloud Messaging HTTP v1 dispatcher.
//!
//! Posts to `<base_url>/v1/projects/<project>/messages:send` with a bearer
//! token resolved at startup.

use super::NotificationDispatcher;
use crate::config::PushConfig;
use crate::error::DispatchError;
use crate::model::NotificationMessage;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    message: Message<'a>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    token: &'a str,
    notification: Notification<'a>,
}

#[derive(Debug, Serialize)]
struct Notification<'a> {
    title: &'a str,
    body: &'a str,
}

impl<'a> From<&'a NotificationMessage> for SendRequest<'a> {
    fn from(msg: &'a NotificationMessage) -> Self {
        Self {
            message: Message {
                token: &msg.recipient_token,
                notification: Notification {
                    title: &msg.title,
                    body: &msg.body,
                },
            },
        }
    }
}

pub struct FcmDispatcher {
    endpoint: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl FcmDispatcher {
    pub fn new(config: &PushConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        if config.access_token.is_none() {
            warn!("[Push] FCM_ACCESS_TOKEN not set; notifications will fail");
        }

        Ok(Self {
            endpoint: format!(
                "{}/v1/projects/{}/messages:send",
                config.base_url.trim_end_matches('/'),
                config.project_id
            ),
            access_token: config.access_token.clone(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl NotificationDispatcher for FcmDispatcher {
    async fn send(&self, message: &NotificationMessage) -> Result<(), DispatchError> {
        let token = self
            .access_token
            .as_deref()
            .ok_or(DispatchError::Unauthenticated)?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&SendRequest::from(message))
            .send()
            .await?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());

        if status.is_success() {
            info!("[Push] Message sent for delivery");
            debug!("[Push] Response: {}", body);
            Ok(())
        } else {
            Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn message() -> NotificationMessage {
        NotificationMessage {
            recipient_token: "device-token".into(),
            title: "Sensor Notification".into(),
            body: "Door: open, Temp: 73\u{00B0}F, Humidity: 45%".into(),
        }
    }

    fn config(base_url: String, access_token: Option<&str>) -> PushConfig {
        PushConfig {
            project_id: "sensors-test".into(),
            base_url,
            access_token: access_token.map(str::to_string),
            timeout_secs: 5,
        }
    }

    fn content_length(header: &str) -> Option<usize> {
        let (name, value) = header.split_once(':')?;
        name.eq_ignore_ascii_case("content-length")
            .then(|| value.trim().parse().ok())
            .flatten()
    }

    /// Serve one canned HTTP response and hand back the raw request.
    async fn serve_once(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut request = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(idx) = text.find("\r\n\r\n") {
                    let len = text[..idx]
                        .lines()
                        .find_map(content_length)
                        .unwrap_or(0);
                    if request.len() >= idx + 4 + len {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let body = "{\"name\":\"projects/x/messages/1\"}";
            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn test_request_shape() {
        let msg = message();
        let json = serde_json::to_value(SendRequest::from(&msg)).unwrap();
        assert_eq!(json["message"]["token"], "device-token");
        assert_eq!(json["message"]["notification"]["title"], "Sensor Notification");
        assert!(json["message"]["notification"]["body"]
            .as_str()
            .unwrap()
            .starts_with("Door: open"));
    }

    #[test]
    fn test_endpoint_path() {
        let dispatcher =
            FcmDispatcher::new(&config("https://fcm.example.com/".into(), Some("t"))).unwrap();
        assert_eq!(
            dispatcher.endpoint(),
            "https://fcm.example.com/v1/projects/sensors-test/messages:send"
        );
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthenticated() {
        let dispatcher = FcmDispatcher::new(&config("http://127.0.0.1:9".into(), None)).unwrap();
        let err = dispatcher.send(&message()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_success_sends_bearer_and_payload() {
        let (base, server) = serve_once("HTTP/1.1 200 OK").await;
        let dispatcher = FcmDispatcher::new(&config(base, Some("secret"))).unwrap();
        tokio_test::assert_ok!(dispatcher.send(&message()).await);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/projects/sensors-test/messages:send"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"));
        assert!(request.contains("\"token\":\"device-token\""));
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejected() {
        let (base, server) = serve_once("HTTP/1.1 500 Internal Server Error").await;
        let dispatcher = FcmDispatcher::new(&config(base, Some("secret"))).unwrap();
        let err = dispatcher.send(&message()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected { status: 500, .. }));
        server.await.unwrap();
    }
}
