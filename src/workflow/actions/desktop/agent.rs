use serde_json::Value;
use tracing::debug;

use crate::{AutoflowError, Result};

use super::models::{DesktopConfig, Preflight};

/// HTTP client for a desktop agent process.
///
/// The agent executes one operation per `POST /run` and answers
/// `{"ok": false, "error": ..}` when the operation could not be performed.
#[derive(Debug, Clone)]
pub struct DesktopAgent {
    base_url: String,
    client: reqwest::Client,
}

impl DesktopAgent {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(
        base_url: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Performs one operation, returning the agent's reply.
    pub async fn run(
        &self,
        config: &DesktopConfig,
    ) -> Result<Value> {
        let request = config.request();
        debug!("desktop agent {} {}", self.base_url, request.kind);
        let response = self
            .client
            .post(format!("{}/run", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| AutoflowError::Action(format!("desktop agent unreachable: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AutoflowError::Action(format!("desktop agent returned status {}", status.as_u16())));
        }
        let body = response.json::<Value>().await.map_err(|e| AutoflowError::Action(format!("desktop agent sent an invalid reply: {}", e)))?;
        interpret(request.kind, body)
    }

    /// Reports whether the agent can reach a display.
    pub async fn preflight(&self) -> Result<Preflight> {
        let response = self
            .client
            .get(format!("{}/preflight", self.base_url))
            .send()
            .await
            .map_err(|e| AutoflowError::Action(format!("desktop agent unreachable: {}", e)))?;
        response.json::<Preflight>().await.map_err(|e| AutoflowError::Action(format!("desktop agent sent an invalid preflight reply: {}", e)))
    }
}

/// Maps an agent reply to an attempt outcome.
pub(super) fn interpret(
    kind: &str,
    body: Value,
) -> Result<Value> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }
    let error = body.get("error").and_then(Value::as_str).unwrap_or("unknown error");
    Err(AutoflowError::Action(format!("{} failed: {}", kind, error)))
}

#[cfg(test)]
pub(super) mod tests {
    use serde_json::json;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        task::JoinHandle,
    };

    use super::*;
    use crate::workflow::actions::desktop::Screen;

    /// Answers a single request with `reply`, yielding the request's JSON body.
    pub async fn serve_once(reply: Value) -> (String, JoinHandle<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            let body = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let len = text[..end]
                        .lines()
                        .find_map(|line| line.to_ascii_lowercase().strip_prefix("content-length:").and_then(|v| v.trim().parse::<usize>().ok()))
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + len {
                        break serde_json::from_slice(&buf[end + 4..end + 4 + len]).unwrap_or(Value::Null);
                    }
                }
                if n == 0 {
                    break Value::Null;
                }
            };
            let payload = reply.to_string();
            let response = format!("HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}", payload.len(), payload);
            socket.write_all(response.as_bytes()).await.unwrap();
            body
        });
        (format!("http://{}", addr), handle)
    }

    pub fn local_agent(url: &str) -> DesktopAgent {
        DesktopAgent::with_client(url, reqwest::Client::builder().no_proxy().build().unwrap())
    }

    #[test]
    fn test_interpret() {
        let ok = interpret("desktop_click", json!({"ok": true, "matched": false})).unwrap();
        assert_eq!(ok["matched"], json!(false));

        let err = interpret("desktop_click_image", json!({"ok": false, "error": "image_not_found"})).unwrap_err();
        assert_eq!(err.to_string(), "desktop_click_image failed: image_not_found");

        let err = interpret("desktop_type", json!({"detail": "boom"})).unwrap_err();
        assert!(err.to_string().contains("unknown error"));
    }

    #[tokio::test]
    async fn test_run_posts_operation() {
        let (url, request) = serve_once(json!({"ok": true, "matched": true})).await;
        let agent = local_agent(&format!("{}/", url));
        let config = DesktopConfig::ClickImage {
            image_path: Some("/recordings/submit.png".into()),
            confidence: 0.9,
            x: Some(120.0),
            y: Some(48.0),
            button: "left".into(),
        };

        let reply = agent.run(&config).await.unwrap();
        assert_eq!(reply["matched"], json!(true));
        assert_eq!(
            request.await.unwrap(),
            json!({
                "type": "desktop_click_image",
                "data": {"imagePath": "/recordings/submit.png", "confidence": 0.9, "x": 120.0, "y": 48.0, "button": "left"}
            })
        );
    }

    #[tokio::test]
    async fn test_agent_refusal_is_an_error() {
        let (url, _) = serve_once(json!({"ok": false, "error": "timeout"})).await;
        let config = DesktopConfig::WaitForImage {
            image_path: "/recordings/dialog.png".into(),
            timeout_ms: 50,
        };
        let err = local_agent(&url).run(&config).await.unwrap_err();
        assert!(matches!(err, AutoflowError::Action(msg) if msg == "desktop_wait_for_image failed: timeout"));
    }

    #[tokio::test]
    async fn test_preflight() {
        let (url, _) = serve_once(json!({"ok": true, "display": ":99", "screen": {"width": 1920, "height": 1080}})).await;
        let preflight = local_agent(&url).preflight().await.unwrap();
        assert!(preflight.ok);
        assert_eq!(
            preflight.screen,
            Some(Screen {
                width: 1920,
                height: 1080
            })
        );

        let (url, _) = serve_once(json!({"ok": false, "display": "", "error": "cannot open display", "hint": "start Xvfb"})).await;
        let preflight = local_agent(&url).preflight().await.unwrap();
        assert!(!preflight.ok);
        assert_eq!(preflight.hint.as_deref(), Some("start Xvfb"));
    }

    #[tokio::test]
    async fn test_unreachable_agent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let config = DesktopConfig::Type {
            value: "hello".into(),
        };
        let err = local_agent(&url).run(&config).await.unwrap_err();
        assert!(err.to_string().contains("desktop agent unreachable"));
    }
}
