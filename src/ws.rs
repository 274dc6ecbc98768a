//! WebSocket connection primitives.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves. The transport adapter is the only consumer; it
//! should use this module rather than `tokio-tungstenite` directly.
//!
//! # Architecture
//!
//! A single [`connect`] function handles URL→request building, header
//! insertion, the optional HTTP CONNECT proxy tunnel and TLS negotiation.
//! It returns a ([`WsWriter`], [`WsReader`]) pair ready for use in
//! `tokio::select!` loops.
//!
//! Data and control frames are surfaced individually. Fragmented messages
//! are reassembled by tungstenite and arrive as one final text or binary
//! frame; [`WsMessage::Continuation`] only covers raw frames handed up
//! unassembled.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::Connector;

use crate::constants::CLOSE_CODE_NO_STATUS;
use crate::message::FrameKind;

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// How to reach the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// ws:// or wss:// URL.
    pub url: String,
    /// Extra handshake headers, in order.
    pub headers: Vec<(String, String)>,
    /// HTTP proxy (`http://host:port`) to tunnel through.
    pub proxy: Option<String>,
    /// Verify the server certificate chain and host name.
    pub verify_tls: bool,
}

impl ConnectOptions {
    /// Options for a direct, verified connection without extra headers.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            proxy: None,
            verify_tls: true,
        }
    }
}

/// Received WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Raw frame passed up without reassembly. tungstenite does not do
    /// this when reading, so fragments normally arrive as one
    /// [`WsMessage::Text`] or [`WsMessage::Binary`].
    Continuation {
        /// Fragment payload.
        payload: Vec<u8>,
        /// Final fragment flag.
        fin: bool,
    },
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send one frame of the given kind.
    ///
    /// Text frames whose payload is not valid UTF-8 are sent lossily.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails (connection closed, I/O error).
    pub async fn send(&mut self, frame: FrameKind, payload: Vec<u8>) -> Result<()> {
        let message = match frame {
            FrameKind::Text => tungstenite::Message::Text(
                String::from_utf8_lossy(&payload).into_owned().into(),
            ),
            FrameKind::Binary => tungstenite::Message::Binary(payload.into()),
            FrameKind::Ping => tungstenite::Message::Ping(payload.into()),
            FrameKind::Pong => tungstenite::Message::Pong(payload.into()),
            FrameKind::Close => tungstenite::Message::Close(None),
            FrameKind::Continuation => tungstenite::Message::Frame(Frame::message(
                payload,
                OpCode::Data(Data::Continue),
                true,
            )),
        };
        self.sink
            .send(message)
            .await
            .with_context(|| format!("WebSocket send of {frame:?} frame failed"))
    }

    /// Flush pending writes and close the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next frame, returning `None` when the stream ends.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        let next = self.stream.next().await?;
        Some(match next {
            Ok(message) => Ok(translate(message)),
            Err(e) => Err(anyhow::anyhow!("WebSocket read error: {e}")),
        })
    }
}

fn translate(message: tungstenite::Message) -> WsMessage {
    match message {
        tungstenite::Message::Text(text) => WsMessage::Text(text.to_string()),
        tungstenite::Message::Binary(data) => WsMessage::Binary(data.to_vec()),
        tungstenite::Message::Ping(data) => WsMessage::Ping(data.to_vec()),
        tungstenite::Message::Pong(data) => WsMessage::Pong(data.to_vec()),
        tungstenite::Message::Close(close_frame) => {
            let (code, reason) = close_frame
                .map(|cf| (cf.code.into(), cf.reason.to_string()))
                .unwrap_or((CLOSE_CODE_NO_STATUS, String::new()));
            WsMessage::Close { code, reason }
        }
        tungstenite::Message::Frame(frame) => WsMessage::Continuation {
            fin: frame.header().is_final,
            payload: frame.payload().to_vec(),
        },
    }
}

/// Connect to a WebSocket server.
///
/// Builds an HTTP request from the URL, inserts each header, tunnels
/// through the proxy when one is set, then performs the TLS and WebSocket
/// handshakes. Returns split (writer, reader) halves for independent use
/// in `tokio::select!` loops.
///
/// # Errors
///
/// Returns an error if the URL is invalid, header values are malformed,
/// the proxy refuses the tunnel, or the handshake fails.
pub async fn connect(options: &ConnectOptions) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let url = options.url.as_str();
    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    for (name, value) in &options.headers {
        let header_name = tungstenite::http::HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name: {name}"))?;
        let header_value = tungstenite::http::HeaderValue::from_str(value)
            .with_context(|| format!("invalid header value for {name}"))?;
        request.headers_mut().insert(header_name, header_value);
    }

    let connector = Connector::Rustls(Arc::new(tls_config(options.verify_tls)?));

    let ws_stream = match &options.proxy {
        Some(proxy) => {
            let (host, port) = target_authority(url)?;
            let stream = proxy_tunnel(proxy, &host, port).await?;
            let (ws_stream, _response) = tokio_tungstenite::client_async_tls_with_config(
                request,
                stream,
                None,
                Some(connector),
            )
            .await
            .context("WebSocket connect through proxy failed")?;
            ws_stream
        }
        None => {
            let (ws_stream, _response) = tokio_tungstenite::connect_async_tls_with_config(
                request,
                None,
                false,
                Some(connector),
            )
            .await
            .context("WebSocket connect failed")?;
            ws_stream
        }
    };

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged. Other schemes are
/// returned as-is.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

// ============================================================================
// Proxy tunnel
// ============================================================================

/// Host and port the tunnel has to reach.
fn target_authority(url: &str) -> Result<(String, u16)> {
    let uri: Uri = url
        .parse()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;
    let host = uri
        .host()
        .with_context(|| format!("WebSocket URL has no host: {url}"))?
        .to_string();
    let default_port = if uri.scheme_str() == Some("wss") { 443 } else { 80 };
    Ok((host, uri.port_u16().unwrap_or(default_port)))
}

/// Open a TCP stream to `host:port` through an HTTP CONNECT proxy.
async fn proxy_tunnel(proxy: &str, host: &str, port: u16) -> Result<TcpStream> {
    let proxy_uri: Uri = proxy
        .parse()
        .with_context(|| format!("invalid proxy address: {proxy}"))?;
    let proxy_host = proxy_uri
        .host()
        .with_context(|| format!("proxy address has no host: {proxy}"))?;
    let proxy_port = proxy_uri.port_u16().unwrap_or(8080);

    let mut stream = TcpStream::connect((proxy_host, proxy_port))
        .await
        .with_context(|| format!("Failed to reach proxy {proxy_host}:{proxy_port}"))?;

    let connect = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n");
    stream
        .write_all(connect.as_bytes())
        .await
        .context("Failed to send CONNECT to proxy")?;

    let mut reader = BufReader::new(&mut stream);
    let mut status = String::new();
    reader
        .read_line(&mut status)
        .await
        .context("Failed to read proxy response")?;
    if !is_success_status(&status) {
        bail!("Proxy refused tunnel: {}", status.trim());
    }
    // Drain the remaining response headers.
    loop {
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .await
            .context("Failed to read proxy response")?;
        if read == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }
    log::debug!("[ws] Tunnel to {host}:{port} open via {proxy_host}:{proxy_port}");

    Ok(stream)
}

fn is_success_status(status_line: &str) -> bool {
    let mut parts = status_line.split_whitespace();
    matches!(
        (parts.next(), parts.next()),
        (Some(version), Some(code)) if version.starts_with("HTTP/") && code.starts_with('2')
    )
}

// ============================================================================
// TLS
// ============================================================================

fn tls_config(verify: bool) -> Result<ClientConfig> {
    let provider = Arc::new(ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .context("Failed to configure TLS protocol versions")?;

    let config = if verify {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth()
    };
    Ok(config)
}

/// Verifier for `--insecure`: accepts any chain, still checks handshake
/// signatures.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_to_ws_scheme_https() {
        assert_eq!(
            http_to_ws_scheme("https://example.com"),
            "wss://example.com"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_http() {
        assert_eq!(
            http_to_ws_scheme("http://localhost:3000"),
            "ws://localhost:3000"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_passthrough() {
        assert_eq!(
            http_to_ws_scheme("wss://example.com/cable"),
            "wss://example.com/cable"
        );
        assert_eq!(http_to_ws_scheme("ftp://example.com"), "ftp://example.com");
    }

    #[test]
    fn test_http_to_ws_scheme_only_rewrites_prefix() {
        assert_eq!(
            http_to_ws_scheme("https://example.com/?next=http://other"),
            "wss://example.com/?next=http://other"
        );
    }

    #[test]
    fn test_target_authority_default_ports() {
        assert_eq!(
            target_authority("wss://example.com/ws").unwrap(),
            ("example.com".to_string(), 443)
        );
        assert_eq!(
            target_authority("ws://example.com:9000").unwrap(),
            ("example.com".to_string(), 9000)
        );
    }

    #[test]
    fn test_proxy_status_line() {
        assert!(is_success_status("HTTP/1.1 200 Connection established\r\n"));
        assert!(is_success_status("HTTP/1.0 200 OK\r\n"));
        assert!(!is_success_status("HTTP/1.1 407 Proxy Authentication Required\r\n"));
        assert!(!is_success_status("garbage"));
    }

    #[test]
    fn test_translate_close_without_frame() {
        assert_eq!(
            translate(tungstenite::Message::Close(None)),
            WsMessage::Close {
                code: 1005,
                reason: String::new()
            }
        );
    }

    #[test]
    fn test_translate_raw_frame_as_continuation() {
        let frame = Frame::message(b"tail".to_vec(), OpCode::Data(Data::Continue), false);
        assert_eq!(
            translate(tungstenite::Message::Frame(frame)),
            WsMessage::Continuation {
                payload: b"tail".to_vec(),
                fin: false
            }
        );
    }

    #[test]
    fn test_tls_config_builds_both_modes() {
        assert!(tls_config(true).is_ok());
        assert!(tls_config(false).is_ok());
    }

    #[tokio::test]
    async fn test_connect_invalid_url_returns_error() {
        let result = connect(&ConnectOptions::new("not-a-url")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_unreachable_host_returns_error() {
        let result = connect(&ConnectOptions::new("wss://127.0.0.1:1/invalid")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_through_refusing_proxy_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n")
                    .await;
            }
        });

        let options = ConnectOptions {
            proxy: Some(format!("http://{addr}")),
            ..ConnectOptions::new("ws://example.invalid/ws")
        };
        let err = connect(&options).await.unwrap_err();
        assert!(err.to_string().contains("Proxy refused tunnel"));
    }
}
