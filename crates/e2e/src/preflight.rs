//! Preflight checks - waiting for the application and the WebDriver server
//! before any scenario starts

use std::time::Duration;

use tracing::{info, warn};
use url::Url;

use crate::error::{E2eError, E2eResult};
use crate::wait::{Poller, WaitPolicy};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

fn client() -> E2eResult<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

/// Wait until the application answers on its base URL.
///
/// Any response below 500 counts; the root page may well redirect to login.
pub async fn wait_for_app(base_url: &Url, policy: &WaitPolicy) -> E2eResult<()> {
    let client = client()?;
    let mut poller = Poller::start(policy);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match client.get(base_url.clone()).send().await {
            Ok(resp) if !resp.status().is_server_error() => {
                info!("Application is up at {}", base_url);
                return Ok(());
            }
            Ok(resp) => warn!("Application returned {}", resp.status()),
            Err(e) => {
                if attempts == 1 {
                    info!("Waiting for application at {}...", base_url);
                }
                if !e.is_connect() {
                    warn!("Application check error: {}", e);
                }
            }
        }

        if poller.tick().await.is_err() {
            return Err(E2eError::AppUnavailable {
                url: base_url.to_string(),
                attempts,
            });
        }
    }
}

/// Wait until the WebDriver server reports itself ready on `/status`.
pub async fn wait_for_webdriver(webdriver_url: &Url, policy: &WaitPolicy) -> E2eResult<()> {
    let client = client()?;
    let status_url = webdriver_url.join("status")?;
    let mut poller = Poller::start(policy);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match client.get(status_url.clone()).send().await {
            Ok(resp) if resp.status().is_success() => {
                let body: serde_json::Value = resp.json().await.unwrap_or_default();
                if status_ready(&body) {
                    info!("WebDriver is ready at {}", webdriver_url);
                    return Ok(());
                }
                warn!("WebDriver is up but not ready: {}", body);
            }
            Ok(resp) => warn!("WebDriver status returned {}", resp.status()),
            Err(e) => {
                if attempts == 1 {
                    info!("Waiting for WebDriver at {}...", webdriver_url);
                }
                if !e.is_connect() {
                    warn!("WebDriver check error: {}", e);
                }
            }
        }

        if poller.tick().await.is_err() {
            return Err(E2eError::WebDriverUnavailable {
                url: webdriver_url.to_string(),
                attempts,
            });
        }
    }
}

/// Servers that omit `value.ready` are taken as ready once they answer.
fn status_ready(body: &serde_json::Value) -> bool {
    body.pointer("/value/ready")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer every connection with the same HTTP response.
    async fn serve(status: &'static str, body: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    async fn closed_port() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    #[test]
    fn test_status_ready_flag() {
        assert!(status_ready(&serde_json::json!({"value": {"ready": true}})));
        assert!(!status_ready(&serde_json::json!({"value": {"ready": false}})));
        assert!(status_ready(&serde_json::json!({})));
    }

    #[tokio::test]
    async fn test_app_redirect_counts_as_up() {
        let url = serve("302 Found", "").await;
        wait_for_app(&url, &WaitPolicy::from_millis(2000, 50))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_app_unavailable_reports_attempts() {
        let url = closed_port().await;
        match wait_for_app(&url, &WaitPolicy::from_millis(300, 50)).await {
            Err(E2eError::AppUnavailable { attempts, .. }) => assert!(attempts >= 2),
            other => panic!("expected AppUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_webdriver_ready() {
        let url = serve("200 OK", r#"{"value":{"ready":true,"message":"ok"}}"#).await;
        wait_for_webdriver(&url, &WaitPolicy::from_millis(2000, 50))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webdriver_not_ready_times_out() {
        let url = serve("200 OK", r#"{"value":{"ready":false}}"#).await;
        let err = wait_for_webdriver(&url, &WaitPolicy::from_millis(300, 50))
            .await
            .unwrap_err();
        assert!(matches!(err, E2eError::WebDriverUnavailable { .. }));
    }
}
