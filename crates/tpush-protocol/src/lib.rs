//! Remote artifact host protocol for tpush.
//!
//! Objects are addressed on the remote with the same fan-out layout used
//! locally (`<base>/objects/<xx>/<rest>.<kind>`). Delivering an object is an
//! existence check (`HEAD`) followed, only when the remote lacks it, by an
//! upload (`PUT`). Root references are published with a single `POST` to
//! `<base>/refs/heads/<name>`.
//!
//! Authentication turns [`ServerCredentials`] into an immutable
//! [`RemoteEndpoint`], which every transfer shares read-only.

pub mod auth;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod transport;

pub use auth::{AuthMethod, ServerCredentials};
pub use endpoint::{endpoints, RemoteEndpoint};
pub use error::{ProtocolError, ProtocolResult};
pub use http::{HttpConnector, HttpTransport};
pub use transport::{
    classify_status, RemoteConnector, RemoteTransport, StatusClass, TransferOutcome,
};
