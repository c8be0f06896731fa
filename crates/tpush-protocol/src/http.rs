use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{Certificate, Client, Identity, Method, RequestBuilder, Response};
use serde::Deserialize;
use tpush_store::{ObjectKind, StoredObject};
use tpush_types::ObjectHash;
use tracing::{debug, info, warn};

use crate::auth::{AuthMethod, ServerCredentials};
use crate::endpoint::{endpoints, RemoteEndpoint};
use crate::error::{ProtocolError, ProtocolResult};
use crate::transport::{
    classify_status, RemoteConnector, RemoteTransport, StatusClass, TransferOutcome,
};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client(endpoint: &RemoteEndpoint, timeout: Duration) -> ProtocolResult<Client> {
    let mut builder = Client::builder().timeout(timeout);
    if let Some(pem) = &endpoint.ca_certificate {
        let certs =
            Certificate::from_pem_bundle(pem).map_err(|e| ProtocolError::Tls(e.to_string()))?;
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }
    if let Some(pem) = &endpoint.identity_pem {
        let identity = Identity::from_pem(pem).map_err(|e| ProtocolError::Tls(e.to_string()))?;
        builder = builder.identity(identity);
    }
    Ok(builder.build()?)
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn failure_outcome(response: &Response, what: &str) -> TransferOutcome {
    let code = response.status().as_u16();
    match classify_status(code) {
        StatusClass::Transient => TransferOutcome::Transient {
            code: Some(code),
            reason: format!("{what} failed"),
            retry_after: retry_after(response),
        },
        _ => TransferOutcome::fatal(Some(code), format!("{what} rejected")),
    }
}

fn error_outcome(err: &reqwest::Error, what: &str) -> TransferOutcome {
    if err.is_builder() {
        TransferOutcome::fatal(None, format!("{what}: {err}"))
    } else {
        // Timeouts, refused or reset connections.
        TransferOutcome::transient(None, format!("{what}: {err}"))
    }
}

/// [`RemoteTransport`] speaking plain HTTP(S) to the artifact host.
pub struct HttpTransport {
    client: Client,
    endpoint: RemoteEndpoint,
}

impl HttpTransport {
    pub fn new(endpoint: RemoteEndpoint, timeout: Duration) -> ProtocolResult<Self> {
        let client = build_client(&endpoint, timeout)?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.endpoint
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        if self.endpoint.verbose {
            info!(%method, url, "request");
        } else {
            debug!(%method, url, "request");
        }
        let builder = self.client.request(method, url);
        match &self.endpoint.authorization {
            Some(value) => builder.header(AUTHORIZATION, value),
            None => builder,
        }
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn check(&self, hash: ObjectHash, kind: ObjectKind) -> TransferOutcome {
        let url = self.endpoint.object_url(&hash, kind);
        let head = match self.request(Method::HEAD, &url).send().await {
            Ok(response) => response,
            Err(err) => return error_outcome(&err, "existence check"),
        };
        match classify_status(head.status().as_u16()) {
            StatusClass::Success => TransferOutcome::AlreadyPresent,
            StatusClass::NotFound => TransferOutcome::Absent,
            _ => failure_outcome(&head, "existence check"),
        }
    }

    async fn upload(&self, hash: ObjectHash, object: StoredObject) -> TransferOutcome {
        let url = self.endpoint.object_url(&hash, object.kind);
        let put = match self.request(Method::PUT, &url).body(object.data).send().await {
            Ok(response) => response,
            Err(err) => return error_outcome(&err, "upload"),
        };
        match classify_status(put.status().as_u16()) {
            StatusClass::Success => TransferOutcome::Accepted,
            _ => failure_outcome(&put, "upload"),
        }
    }

    async fn push_ref(&self, name: &str, commit: &ObjectHash) -> ProtocolResult<()> {
        let url = self.endpoint.ref_url(name);
        let response = self
            .request(Method::POST, &url)
            .body(commit.to_hex())
            .send()
            .await?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(ProtocolError::UnexpectedStatus { url, status });
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// [`RemoteConnector`] that authenticates over HTTP and hands out
/// [`HttpTransport`]s.
#[derive(Clone, Debug)]
pub struct HttpConnector {
    timeout: Duration,
    verbose: bool,
}

impl HttpConnector {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            verbose: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    async fn fetch_token(
        &self,
        endpoint: &RemoteEndpoint,
        server: &str,
        client_id: &str,
        client_secret: &str,
    ) -> ProtocolResult<String> {
        let url = format!("{}/{}", server.trim_end_matches('/'), endpoints::TOKEN);
        let client = build_client(endpoint, self.timeout)?;
        let response = client
            .post(&url)
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let status = response.status().as_u16();
        if classify_status(status) != StatusClass::Success {
            return Err(ProtocolError::AuthRejected {
                server: server.to_string(),
                status,
            });
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteConnector for HttpConnector {
    async fn authenticate(
        &self,
        credentials: &ServerCredentials,
        ca_certificates: Option<&Path>,
    ) -> ProtocolResult<RemoteEndpoint> {
        let mut endpoint =
            RemoteEndpoint::new(credentials.server.clone())?.with_verbose(self.verbose);
        if let Some(path) = ca_certificates {
            endpoint.ca_certificate = Some(tokio::fs::read(path).await?);
        }

        match &credentials.auth {
            AuthMethod::Anonymous => {
                warn!(
                    server = %credentials.server,
                    "no authentication configured, pushing anonymously"
                );
            }
            AuthMethod::Bearer { token } => {
                endpoint = endpoint.with_bearer(token);
            }
            AuthMethod::OAuth2 {
                server,
                client_id,
                client_secret,
            } => {
                let token = self
                    .fetch_token(&endpoint, server, client_id, client_secret)
                    .await?;
                endpoint = endpoint.with_bearer(&token);
            }
            AuthMethod::MutualTls { cert_path, key_path } => {
                let mut pem = tokio::fs::read(cert_path).await?;
                pem.push(b'\n');
                pem.extend(tokio::fs::read(key_path).await?);
                // Fail here rather than on the first transfer.
                Identity::from_pem(&pem).map_err(|e| ProtocolError::Tls(e.to_string()))?;
                endpoint.identity_pem = Some(pem);
            }
        }

        debug!(endpoint = ?endpoint, method = credentials.auth.display_name(), "authenticated");
        Ok(endpoint)
    }

    fn transport(&self, endpoint: RemoteEndpoint) -> ProtocolResult<Arc<dyn RemoteTransport>> {
        Ok(Arc::new(HttpTransport::new(endpoint, self.timeout)?))
    }
}
