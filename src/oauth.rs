//! One-shot OAuth callback listener.
//!
//! Binds the redirect port, accepts a single request, pulls `code` out of
//! its query string and answers with a short page telling the athlete to
//! close the window.

use log::{info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use url::Url;

use crate::error::Result;

const CALLBACK_RESPONSE: &str = "HTTP/1.1 200 OK\r\n\
    Content-Type: text/html\r\n\
    Connection: close\r\n\r\n\
    You can close this window now.";

/// Extract the `code` query parameter from an HTTP request line.
///
/// ```rust
/// use track_merge::oauth::parse_callback_code;
///
/// let line = "GET /?state=&code=abc123&scope=read,activity:read_all HTTP/1.1\r\n";
/// assert_eq!(parse_callback_code(line).as_deref(), Some("abc123"));
/// assert_eq!(parse_callback_code("GET /?error=access_denied HTTP/1.1"), None);
/// ```
pub fn parse_callback_code(request_line: &str) -> Option<String> {
    let target = request_line.split_whitespace().nth(1)?;
    let url = Url::parse(&format!("http://localhost{}", target)).ok()?;

    url.query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
        .filter(|code| !code.is_empty())
}

/// Serve exactly one callback request on `listener`.
pub async fn accept_callback(listener: TcpListener) -> Result<Option<String>> {
    let (socket, peer) = listener.accept().await?;
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // Drain headers so the socket closes cleanly
    let mut header = String::new();
    while reader.read_line(&mut header).await? > 0 && !header.trim().is_empty() {
        header.clear();
    }

    let code = parse_callback_code(&request_line);
    match &code {
        Some(_) => info!("Authorization code received"),
        None => warn!("Callback from {} carried no authorization code", peer),
    }

    writer.write_all(CALLBACK_RESPONSE.as_bytes()).await?;
    writer.shutdown().await?;
    Ok(code)
}

/// Listen on `port` for the provider's redirect and return its code.
pub async fn wait_for_authorization_code(port: u16) -> Result<Option<String>> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Starting HTTP server for OAuth callback on port {}", port);
    accept_callback(listener).await
}

/// Blocking [`wait_for_authorization_code`] for callers without a runtime.
pub fn wait_for_authorization_code_sync(port: u16) -> Result<Option<String>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(wait_for_authorization_code(port))
}
