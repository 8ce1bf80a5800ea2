//! One-shot loopback callback listener.
//!
//! Binds a fixed loopback port, accepts connections until exactly one
//! request hits the callback path, answers it with a static confirmation
//! page, and tears down. The listener never lingers past one matching
//! request or its timeout; the port is a scarce shared resource and a
//! failed bind is a fatal configuration error, never retried.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};
use url::Url;

use kirobridge_core::redact;

use crate::error::OAuthError;

/// Path the authorization server redirects back to.
pub const CALLBACK_PATH: &str = "/oauth/callback";

/// Cap on the request head we are willing to buffer.
const MAX_REQUEST_BYTES: usize = 8 * 1024;

// ============================================================================
// Callback Outcome
// ============================================================================

/// What the authorization server sent back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Authorization code received.
    Code {
        /// The authorization code.
        code: String,
        /// The echoed CSRF state, if present.
        state: Option<String>,
    },
    /// The authorization server reported an error.
    Error {
        /// OAuth error code.
        error: String,
        /// Human-readable description.
        description: String,
    },
}

// ============================================================================
// Callback Listener
// ============================================================================

/// Loopback HTTP listener that accepts a single OAuth callback.
#[derive(Debug)]
pub struct CallbackListener {
    listener: TcpListener,
    port: u16,
}

impl CallbackListener {
    /// Binds the listener on `127.0.0.1:port`.
    ///
    /// Port 0 asks the OS for an ephemeral port; the bound port is
    /// reported by [`port`](Self::port). A bind failure means another flow
    /// owns the port and is fatal.
    pub async fn bind(port: u16) -> Result<Self, OAuthError> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|source| OAuthError::ListenerBind { port, source })?;
        let port = listener.local_addr()?.port();
        debug!(port, "Callback listener bound");
        Ok(Self { listener, port })
    }

    /// The bound loopback port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The redirect URI to register with the authorization request.
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}{CALLBACK_PATH}", self.port)
    }

    /// Waits for the callback, consuming the listener.
    ///
    /// Connections to other paths are answered 404 and do not consume the
    /// listener; the first request on the callback path does, whatever it
    /// carries. The socket is closed on return in every path, including
    /// timeout.
    pub async fn wait(self, timeout: Duration) -> Result<CallbackOutcome, OAuthError> {
        match tokio::time::timeout(timeout, self.accept_until_callback()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(OAuthError::Timeout(timeout.as_secs())),
        }
    }

    async fn accept_until_callback(&self) -> Result<CallbackOutcome, OAuthError> {
        loop {
            let (mut stream, peer) = self.listener.accept().await?;
            debug!(%peer, "Callback connection");

            match handle_connection(&mut stream).await {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Error handling callback connection"),
            }
        }
    }
}

// ============================================================================
// Connection Handling
// ============================================================================

/// Reads one request and answers it. Returns `Some` only for requests on
/// the callback path.
async fn handle_connection(stream: &mut TcpStream) -> Result<Option<CallbackOutcome>, OAuthError> {
    let head = read_request_head(stream).await?;
    let Some(path) = request_path(&head) else {
        respond(stream, "400 Bad Request", "text/plain", "Invalid request").await?;
        return Ok(None);
    };

    if !path.starts_with(CALLBACK_PATH) {
        respond(stream, "404 Not Found", "text/plain", "Not found").await?;
        return Ok(None);
    }

    let Ok(url) = Url::parse(&format!("http://127.0.0.1{path}")) else {
        respond(stream, "400 Bad Request", "text/plain", "Invalid OAuth callback").await?;
        return Ok(None);
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(code) = code {
        debug!(code = %redact(&code), "Authorization code received");
        respond(stream, "200 OK", "text/html; charset=utf-8", SUCCESS_PAGE).await?;
        return Ok(Some(CallbackOutcome::Code { code, state }));
    }

    if let Some(error) = error {
        let description = error_description.unwrap_or_else(|| "Unknown error".to_string());
        warn!(%error, %description, "Authorization error callback");
        let page = error_page(&error, &description);
        respond(stream, "400 Bad Request", "text/html; charset=utf-8", &page).await?;
        return Ok(Some(CallbackOutcome::Error { error, description }));
    }

    respond(stream, "400 Bad Request", "text/plain", "Invalid OAuth callback").await?;
    Ok(None)
}

async fn read_request_head(stream: &mut TcpStream) -> Result<String, OAuthError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Extracts the request path from `GET <path> HTTP/1.1`.
fn request_path(head: &str) -> Option<&str> {
    let line = head.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    if method != "GET" {
        return None;
    }
    parts.next()
}

async fn respond(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
) -> Result<(), OAuthError> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

// ============================================================================
// Pages
// ============================================================================

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Authorization Successful</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 4em;">
  <h1>&#10003; Authorization Successful</h1>
  <p>You can close this window and return to the application.</p>
  <p style="color: #666;">The authorization code has been received.<br>Token exchange is in progress...</p>
  <script>setTimeout(function() { window.close(); }, 3000);</script>
</body>
</html>"#;

fn error_page(error: &str, description: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Authorization Failed</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 4em;">
  <h1>&#10007; Authorization Failed</h1>
  <p><strong>{}</strong></p>
  <p style="color: #666;">{}</p>
</body>
</html>"#,
        escape_html(error),
        escape_html(description)
    )
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn send_request(port: u16, target: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request = format!("GET {target} HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_code_callback() {
        let listener = CallbackListener::bind(0).await.unwrap();
        let port = listener.port();

        let client = tokio::spawn(async move {
            send_request(port, "/oauth/callback?code=abc123&state=xyz").await
        });

        let outcome = listener.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::Code {
                code: "abc123".to_string(),
                state: Some("xyz".to_string()),
            }
        );

        let response = client.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Authorization Successful"));
    }

    #[tokio::test]
    async fn test_error_callback() {
        let listener = CallbackListener::bind(0).await.unwrap();
        let port = listener.port();

        let client = tokio::spawn(async move {
            send_request(
                port,
                "/oauth/callback?error=access_denied&error_description=User%20cancelled",
            )
            .await
        });

        let outcome = listener.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::Error {
                error: "access_denied".to_string(),
                description: "User cancelled".to_string(),
            }
        );

        let response = client.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 400"));
        assert!(response.contains("Authorization Failed"));
    }

    #[tokio::test]
    async fn test_non_matching_requests_do_not_consume_listener() {
        let listener = CallbackListener::bind(0).await.unwrap();
        let port = listener.port();

        let client = tokio::spawn(async move {
            let favicon = send_request(port, "/favicon.ico").await;
            assert!(favicon.starts_with("HTTP/1.1 404"));
            send_request(port, "/oauth/callback?code=later").await
        });

        let outcome = listener.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::Code {
                code: "later".to_string(),
                state: None,
            }
        );
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_query_values_are_percent_decoded() {
        let listener = CallbackListener::bind(0).await.unwrap();
        let port = listener.port();

        tokio::spawn(async move {
            send_request(port, "/oauth/callback?code=a%2Fb%3D&state=s%20p").await
        });

        let outcome = listener.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::Code {
                code: "a/b=".to_string(),
                state: Some("s p".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let listener = CallbackListener::bind(0).await.unwrap();
        let err = listener.wait(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, OAuthError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_bound_port_cannot_be_rebound() {
        let listener = CallbackListener::bind(0).await.unwrap();
        let port = listener.port();
        let err = CallbackListener::bind(port).await.unwrap_err();
        assert!(matches!(err, OAuthError::ListenerBind { .. }));
    }

    #[tokio::test]
    async fn test_redirect_uri_shape() {
        let listener = CallbackListener::bind(0).await.unwrap();
        let uri = listener.redirect_uri();
        assert!(uri.starts_with("http://127.0.0.1:"));
        assert!(uri.ends_with("/oauth/callback"));
        assert!(uri.contains(&listener.port().to_string()));
    }

    #[test]
    fn test_request_path_parsing() {
        assert_eq!(
            request_path("GET /oauth/callback?code=1 HTTP/1.1\r\nHost: x\r\n\r\n"),
            Some("/oauth/callback?code=1")
        );
        assert_eq!(request_path("POST /oauth/callback HTTP/1.1"), None);
        assert_eq!(request_path(""), None);
    }

    #[test]
    fn test_error_page_escapes_html() {
        let page = error_page("<script>", "a & b");
        assert!(page.contains("&lt;script&gt;"));
        assert!(page.contains("a &amp; b"));
        assert!(!page.contains("<script>"));
    }
}
