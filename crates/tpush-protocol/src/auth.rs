use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Authentication method for connecting to the remote artifact host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    Anonymous,
    /// Pre-issued bearer token.
    Bearer { token: String },
    /// OAuth2 client-credentials grant against a token server.
    #[serde(rename = "oauth2")]
    OAuth2 {
        server: String,
        client_id: String,
        client_secret: String,
    },
    /// Client certificate authentication.
    MutualTls { cert_path: PathBuf, key_path: PathBuf },
}

impl AuthMethod {
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::Anonymous)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Bearer { .. } => "bearer-token",
            Self::OAuth2 { .. } => "oauth2",
            Self::MutualTls { .. } => "mutual-tls",
        }
    }
}

/// Push credentials: where the remote lives and how to authenticate to it.
///
/// Stored on disk as JSON:
///
/// ```json
/// {
///   "server": "https://treehub.example.com/api/v3",
///   "auth": { "method": "oauth2", "server": "https://auth.example.com",
///             "client_id": "id", "client_secret": "secret" },
///   "signing_keys": "keys/targets.sec"
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCredentials {
    /// Base URL of the remote object repository.
    pub server: String,
    #[serde(default)]
    pub auth: AuthMethod,
    /// Private key material for signing targets offline, if shipped with the
    /// credentials.
    #[serde(default)]
    pub signing_keys: Option<PathBuf>,
    /// Where these credentials were loaded from, if from disk.
    #[serde(skip)]
    pub path_on_disk: Option<PathBuf>,
}

impl ServerCredentials {
    pub fn new(server: impl Into<String>, auth: AuthMethod) -> Self {
        Self {
            server: server.into(),
            auth,
            signing_keys: None,
            path_on_disk: None,
        }
    }

    /// Load credentials from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> ProtocolResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let mut creds = Self::from_json(&data)?;
        creds.path_on_disk = Some(path.to_path_buf());
        Ok(creds)
    }

    pub fn from_json(data: &[u8]) -> ProtocolResult<Self> {
        let creds: Self = serde_json::from_slice(data)?;
        if creds.server.trim().is_empty() {
            return Err(ProtocolError::InvalidCredentials(
                "missing remote server URL".into(),
            ));
        }
        Ok(creds)
    }

    /// Whether the credentials carry key material for offline target signing.
    pub fn can_sign_offline(&self) -> bool {
        self.signing_keys.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_not_authenticated() {
        assert!(!AuthMethod::Anonymous.is_authenticated());
        assert!(AuthMethod::Bearer { token: "t".into() }.is_authenticated());
    }

    #[test]
    fn display_names() {
        assert_eq!(AuthMethod::Anonymous.display_name(), "anonymous");
        assert_eq!(
            AuthMethod::MutualTls {
                cert_path: "c".into(),
                key_path: "k".into()
            }
            .display_name(),
            "mutual-tls"
        );
    }

    #[test]
    fn parse_oauth2_credentials() {
        let json = br#"{
            "server": "https://repo.example.com/api/v3",
            "auth": {"method": "oauth2", "server": "https://auth.example.com",
                     "client_id": "id", "client_secret": "secret"}
        }"#;
        let creds = ServerCredentials::from_json(json).unwrap();
        assert_eq!(creds.server, "https://repo.example.com/api/v3");
        assert!(matches!(
            creds.auth,
            AuthMethod::OAuth2 { ref client_id, .. } if client_id == "id"
        ));
        assert!(!creds.can_sign_offline());
    }

    #[test]
    fn auth_defaults_to_anonymous() {
        let creds = ServerCredentials::from_json(br#"{"server": "http://localhost"}"#).unwrap();
        assert_eq!(creds.auth, AuthMethod::Anonymous);
    }

    #[test]
    fn signing_keys_enable_offline_signing() {
        let json = br#"{"server": "http://x", "signing_keys": "keys/targets.sec"}"#;
        assert!(ServerCredentials::from_json(json).unwrap().can_sign_offline());
    }

    #[test]
    fn empty_server_rejected() {
        let err = ServerCredentials::from_json(br#"{"server": "  "}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidCredentials(_)));
    }

    #[test]
    fn load_records_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(
            &path,
            br#"{"server": "http://x", "auth": {"method": "bearer", "token": "abc"}}"#,
        )
        .unwrap();
        let creds = ServerCredentials::load(&path).unwrap();
        assert_eq!(creds.path_on_disk.as_deref(), Some(path.as_path()));
        assert_eq!(creds.auth, AuthMethod::Bearer { token: "abc".into() });
    }
}
