use crate::infrastructure::error::InfraError;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use url::Url;

pub const CALLBACK_PATH: &str = "/callback";
pub const DEFAULT_CALLBACK_PORT: u16 = 5000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Default for TlsFiles {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from("localhost.pem"),
            key_path: PathBuf::from("localhost-key.pem"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackRoute {
    Start,
    Callback(CallbackParams),
    NotFound(String),
}

pub fn redirect_uri(port: u16) -> String {
    format!("https://localhost:{port}{CALLBACK_PATH}")
}

/// Creates a self-signed localhost certificate with `openssl` unless both files exist.
pub async fn ensure_self_signed_certificate(files: &TlsFiles) -> Result<(), InfraError> {
    if files.cert_path.exists() && files.key_path.exists() {
        return Ok(());
    }

    tracing::info!(cert = %files.cert_path.display(), "generating self-signed certificate for localhost");
    let status = Command::new("openssl")
        .args(["req", "-x509", "-newkey", "rsa:2048", "-keyout"])
        .arg(&files.key_path)
        .arg("-out")
        .arg(&files.cert_path)
        .args(["-days", "365", "-nodes", "-subj", "/CN=localhost"])
        .args(["-addext", "subjectAltName=DNS:localhost"])
        .status()
        .await
        .map_err(|error| InfraError::InvalidConfig(format!("failed to run openssl: {error}")))?;

    if !status.success() {
        return Err(InfraError::InvalidConfig(format!(
            "openssl exited with {status} while generating {}",
            files.cert_path.display()
        )));
    }
    Ok(())
}

pub fn tls_acceptor(files: &TlsFiles) -> Result<TlsAcceptor, InfraError> {
    let tls_error = |context: &str, error: &dyn std::fmt::Display| {
        InfraError::InvalidConfig(format!("{context}: {error}"))
    };

    let certs = CertificateDer::pem_file_iter(&files.cert_path)
        .map_err(|error| tls_error("cannot read certificate", &error))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| tls_error("invalid certificate", &error))?;
    let key = PrivateKeyDer::from_pem_file(&files.key_path)
        .map_err(|error| tls_error("cannot read private key", &error))?;

    let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|error| tls_error("unsupported tls configuration", &error))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|error| tls_error("invalid certificate/key pair", &error))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Routes an HTTP request line such as `GET /callback?code=x&state=y HTTP/1.1`.
pub fn route_request(request_line: &str) -> Result<CallbackRoute, InfraError> {
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(InfraError::Parse(format!("invalid HTTP request line: {request_line:?}")));
    };
    if method != "GET" {
        return Ok(CallbackRoute::NotFound(target.to_string()));
    }

    let url = Url::parse(&format!("https://localhost{target}"))
        .map_err(|error| InfraError::Parse(format!("invalid request target '{target}': {error}")))?;

    match url.path() {
        "/" => Ok(CallbackRoute::Start),
        CALLBACK_PATH => {
            let mut params = CallbackParams::default();
            for (key, value) in url.query_pairs() {
                match key.as_ref() {
                    "code" => params.code = Some(value.into_owned()),
                    "state" => params.state = Some(value.into_owned()),
                    "error" => params.error = Some(value.into_owned()),
                    _ => {}
                }
            }
            Ok(CallbackRoute::Callback(params))
        }
        other => Ok(CallbackRoute::NotFound(other.to_string())),
    }
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

async fn write_response<S>(
    stream: &mut S,
    status: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    response.push_str(body);

    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await
}

/// Serves `/` (redirect to the provider) and `/callback` over HTTPS until
/// `on_callback` succeeds once. Failed callbacks answer 500 and keep serving.
pub async fn serve_oauth_callback<F, Fut>(
    port: u16,
    acceptor: TlsAcceptor,
    authorization_url: &str,
    on_callback: F,
) -> Result<String, InfraError>
where
    F: FnMut(CallbackParams) -> Fut,
    Fut: Future<Output = Result<String, InfraError>>,
{
    let listener = TcpListener::bind(("localhost", port)).await?;
    tracing::info!(url = %format!("https://localhost:{port}/"), "waiting for OAuth authorization");
    serve_on(listener, acceptor, authorization_url, REQUEST_TIMEOUT, on_callback).await
}

struct PendingRequest {
    stream: TlsStream<TcpStream>,
    peer: SocketAddr,
    request_line: String,
}

/// Handshake and request line of one connection, bounded by `timeout`.
async fn read_request(
    acceptor: TlsAcceptor,
    tcp: TcpStream,
    peer: SocketAddr,
    timeout: Duration,
) -> Option<PendingRequest> {
    let handshake_and_read = async {
        let mut stream = match acceptor.accept(tcp).await {
            Ok(stream) => stream,
            Err(error) => {
                // Browsers abort the first handshake until the self-signed cert is accepted.
                tracing::debug!(%peer, %error, "tls handshake failed");
                return None;
            }
        };

        let mut request_line = String::new();
        if let Err(error) = BufReader::new(&mut stream).read_line(&mut request_line).await {
            tracing::warn!(%peer, %error, "failed reading callback request");
            return None;
        }
        Some(PendingRequest { stream, peer, request_line })
    };

    match tokio::time::timeout(timeout, handshake_and_read).await {
        Ok(request) => request,
        Err(_) => {
            tracing::debug!(%peer, "connection idle, dropping it");
            None
        }
    }
}

async fn serve_on<F, Fut>(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    authorization_url: &str,
    request_timeout: Duration,
    mut on_callback: F,
) -> Result<String, InfraError>
where
    F: FnMut(CallbackParams) -> Fut,
    Fut: Future<Output = Result<String, InfraError>>,
{
    let (requests_tx, mut requests_rx) = mpsc::channel::<PendingRequest>(16);

    loop {
        let PendingRequest { mut stream, peer, request_line } = tokio::select! {
            accepted = listener.accept() => {
                let (tcp, peer) = accepted?;
                let acceptor = acceptor.clone();
                let requests_tx = requests_tx.clone();
                tokio::spawn(async move {
                    if let Some(request) = read_request(acceptor, tcp, peer, request_timeout).await {
                        let _ = requests_tx.send(request).await;
                    }
                });
                continue;
            }
            Some(request) = requests_rx.recv() => request,
        };

        let written = match route_request(&request_line) {
            Ok(CallbackRoute::Start) => {
                write_response(&mut stream, "302 Found", &[("Location", authorization_url)], "").await
            }
            Ok(CallbackRoute::Callback(params)) => match on_callback(params).await {
                Ok(message) => {
                    let body = format!("<html><body><p>{}</p></body></html>", escape_html(&message));
                    if let Err(error) = write_response(&mut stream, "200 OK", &[], &body).await {
                        tracing::warn!(%peer, %error, "failed writing callback confirmation");
                    }
                    return Ok(message);
                }
                Err(error) => {
                    tracing::error!(%error, "error obtaining token");
                    let body = format!(
                        "<html><body><p>Error obtaining token: {}</p></body></html>",
                        escape_html(&error.to_string())
                    );
                    write_response(&mut stream, "500 Internal Server Error", &[], &body).await
                }
            },
            Ok(CallbackRoute::NotFound(path)) => {
                tracing::debug!(%path, "unknown callback path");
                write_response(&mut stream, "404 Not Found", &[], "").await
            }
            Err(error) => {
                write_response(&mut stream, "400 Bad Request", &[], &escape_html(&error.to_string())).await
            }
        };

        if let Err(error) = written {
            tracing::warn!(%peer, %error, "failed writing callback response");
        }
    }
}
