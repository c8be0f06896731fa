use tpush_store::ObjectKind;
use tpush_types::ObjectHash;

use crate::error::{ProtocolError, ProtocolResult};

/// URL path segments on the remote artifact host.
pub mod endpoints {
    pub const OBJECTS: &str = "objects";
    pub const REFS_HEADS: &str = "refs/heads";
    /// Token path on the OAuth2 server.
    pub const TOKEN: &str = "token";
}

/// Authenticated handle to the remote artifact host.
///
/// Produced once by authentication and never mutated afterwards; every
/// in-flight transfer reads it concurrently.
#[derive(Clone)]
pub struct RemoteEndpoint {
    base_url: String,
    /// Value of the `Authorization` header, if any.
    pub authorization: Option<String>,
    /// PEM client certificate followed by its private key.
    pub identity_pem: Option<Vec<u8>>,
    /// PEM CA bundle to trust in addition to the system roots.
    pub ca_certificate: Option<Vec<u8>>,
    /// Log every request at info level.
    pub verbose: bool,
}

impl RemoteEndpoint {
    /// Create an unauthenticated endpoint for a base URL.
    ///
    /// Only `http` and `https` URLs are accepted. A trailing slash is dropped.
    pub fn new(base_url: impl Into<String>) -> ProtocolResult<Self> {
        let base_url = base_url.into();
        let parsed = reqwest::Url::parse(&base_url).map_err(|e| ProtocolError::InvalidUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProtocolError::InvalidUrl {
                url: base_url,
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization: None,
            identity_pem: None,
            ca_certificate: None,
            verbose: false,
        })
    }

    pub fn with_bearer(mut self, token: &str) -> Self {
        self.authorization = Some(format!("Bearer {token}"));
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `<base>/objects/<xx>/<rest>.<kind>`
    pub fn object_url(&self, hash: &ObjectHash, kind: ObjectKind) -> String {
        let (prefix, rest) = hash.split_hex();
        format!(
            "{}/{}/{prefix}/{rest}.{}",
            self.base_url,
            endpoints::OBJECTS,
            kind.extension()
        )
    }

    /// `<base>/refs/heads/<name>`
    pub fn ref_url(&self, name: &str) -> String {
        format!("{}/{}/{name}", self.base_url, endpoints::REFS_HEADS)
    }
}

impl std::fmt::Debug for RemoteEndpoint {
    // Credentials stay out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("base_url", &self.base_url)
            .field("authorized", &self.authorization.is_some())
            .field("client_identity", &self.identity_pem.is_some())
            .field("custom_ca", &self.ca_certificate.is_some())
            .field("verbose", &self.verbose)
            .finish()
    }
}
