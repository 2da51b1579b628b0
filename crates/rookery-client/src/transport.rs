//! Request engine: resolved-server HTTP dispatch with cross-server retry.
//!
//! The engine is protocol-agnostic: it resolves a base URL through the
//! active [`ClusterResolver`], applies the embedding application's request
//! middleware, dispatches, and hands the raw status/body back to the caller
//! for interpretation. Connect failures and 5xx responses are retried
//! against the next resolved server with a fixed delay, up to `maxRetries`;
//! every other status is delivered as-is.

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use hyper::{Method, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use rookery_common::{ClientConfig, Result, RookeryError, TlsConfig};

use crate::resolver::ClusterResolver;

type HttpsClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// One request as the engine sees it: a method, a path relative to the
/// resolved server URL, headers and an optional body.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RequestOptions {
    fn new(method: Method, path: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Self {
            method,
            path: path.into(),
            headers,
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post_json(path: impl Into<String>, body: Bytes) -> Self {
        let mut options = Self::new(Method::POST, path);
        options
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        options.body = Some(body);
        options
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }
}

/// Raw response delivered to the calling operation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl RawResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Body for error messages: the literal `null` when empty.
    pub fn body_or_null(&self) -> String {
        if self.body.is_empty() {
            "null".to_string()
        } else {
            self.body_text()
        }
    }
}

/// Hook applied to every request before dispatch, e.g. to inject headers
/// sourced from local configuration. Returning `Err` fails the request with
/// a middleware error; the engine never retries it.
pub trait RequestMiddleware: Send + Sync {
    fn apply(&self, options: RequestOptions) -> std::result::Result<RequestOptions, String>;
}

impl<F> RequestMiddleware for F
where
    F: Fn(RequestOptions) -> std::result::Result<RequestOptions, String> + Send + Sync,
{
    fn apply(&self, options: RequestOptions) -> std::result::Result<RequestOptions, String> {
        self(options)
    }
}

pub struct RequestEngine {
    resolver: Arc<dyn ClusterResolver>,
    middleware: Option<Arc<dyn RequestMiddleware>>,
    client: HttpsClient,
    max_retries: u32,
    retry_delay: Duration,
}

impl RequestEngine {
    pub fn new(
        config: &ClientConfig,
        resolver: Arc<dyn ClusterResolver>,
        middleware: Option<Arc<dyn RequestMiddleware>>,
    ) -> Result<Self> {
        let client = build_client(config.tls.as_ref())?;
        Ok(Self {
            resolver,
            middleware,
            client,
            max_retries: config.eureka.max_retries,
            retry_delay: config.eureka.request_retry_delay(),
        })
    }

    /// Dispatches `options`, walking the cluster on failure. The final
    /// outcome after retries are exhausted is surfaced verbatim: a transport
    /// failure as an error, a 5xx response as a normal [`RawResponse`].
    pub async fn request(&self, options: RequestOptions) -> Result<RawResponse> {
        let mut attempt: u32 = 0;
        loop {
            let base = self.resolver.resolve_server_url(attempt).await?;
            let url = join_url(&base, &options.path);

            let prepared = match &self.middleware {
                Some(middleware) => middleware
                    .apply(options.clone())
                    .map_err(RookeryError::Middleware)?,
                None => options.clone(),
            };

            let outcome = self.dispatch(&url, prepared).await;
            let retriable = match &outcome {
                Ok(response) => response.status.is_server_error(),
                Err(_) => true,
            };
            if !retriable || attempt >= self.max_retries {
                return outcome;
            }

            warn!(
                "request to {url} failed (attempt {}/{}), retrying against next server",
                attempt + 1,
                self.max_retries + 1
            );
            attempt += 1;
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    async fn dispatch(&self, url: &str, options: RequestOptions) -> Result<RawResponse> {
        let uri: hyper::Uri = url
            .parse()
            .map_err(|e| RookeryError::Transport(format!("Invalid request URL {url}: {e}")))?;

        let mut builder = hyper::Request::builder().method(options.method).uri(uri);
        for (name, value) in &options.headers {
            builder = builder.header(name, value);
        }
        let request = builder
            .body(Full::new(options.body.unwrap_or_default()))
            .map_err(|e| RookeryError::Transport(format!("Failed to build request: {e}")))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| RookeryError::Transport(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| RookeryError::Transport(format!("Failed to read response: {e}")))?
            .to_bytes();

        Ok(RawResponse { status, body })
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        base.to_string()
    } else if base.ends_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()))
}

fn build_client(tls: Option<&TlsConfig>) -> Result<HttpsClient> {
    let tls_config = build_tls_config(tls)?;
    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .build();
    Ok(Client::builder(TokioExecutor::new()).build(connector))
}

fn build_tls_config(tls: Option<&TlsConfig>) -> Result<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    match tls.and_then(|t| t.ca_file.as_deref()) {
        Some(ca_file) => {
            for cert in read_pem_certs(ca_file)? {
                roots.add(cert).map_err(|e| {
                    RookeryError::Configuration(format!(
                        "Invalid CA certificate in {}: {e}",
                        ca_file.display()
                    ))
                })?;
            }
        }
        None => {
            let loaded = rustls_native_certs::load_native_certs();
            for err in &loaded.errors {
                warn!("error loading native root certificate: {err}");
            }
            for cert in loaded.certs {
                // certs the OS trusts but rustls rejects are skipped
                let _ = roots.add(cert);
            }
        }
    }

    let builder = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| RookeryError::Configuration(format!("TLS setup failed: {e}")))?
        .with_root_certificates(roots);

    match tls {
        Some(tls) => {
            let certs = read_pem_certs(&tls.certificate)?;
            let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(&tls.keystore)?))?
                .ok_or_else(|| {
                    RookeryError::Configuration(format!(
                        "No private key found in {}",
                        tls.keystore.display()
                    ))
                })?;
            builder.with_client_auth_cert(certs, key).map_err(|e| {
                RookeryError::Configuration(format!("Invalid TLS client material: {e}"))
            })
        }
        None => Ok(builder.with_no_client_auth()),
    }
}

fn read_pem_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(RookeryError::from)
}
