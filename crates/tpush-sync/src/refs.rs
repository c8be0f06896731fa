use std::path::Path;

use tracing::{error, info, warn};

use tpush_protocol::{RemoteConnector, ServerCredentials};
use tpush_types::ObjectHash;

use crate::error::{SyncError, SyncResult};

/// Point `refs/heads/<ref_name>` on the remote at `commit`.
///
/// Authenticates, then issues a single ref update unless `dry_run` is set.
/// The commit's objects are expected to be on the remote already.
pub async fn push_root_ref(
    connector: &dyn RemoteConnector,
    credentials: &ServerCredentials,
    ref_name: &str,
    commit: &ObjectHash,
    ca_certificates: Option<&Path>,
    dry_run: bool,
) -> SyncResult<()> {
    if credentials.can_sign_offline() {
        warn!("pushing by ref name although the credentials can sign offline");
    }

    let endpoint = connector
        .authenticate(credentials, ca_certificates)
        .await
        .map_err(|e| {
            error!(%e, "authentication failed");
            SyncError::AuthenticationFailed(e.to_string())
        })?;
    let transport = connector
        .transport(endpoint)
        .map_err(|e| SyncError::AuthenticationFailed(e.to_string()))?;

    if dry_run {
        info!(ref_name, commit = %commit.short_hex(), "dry run, ref not pushed");
        return Ok(());
    }
    transport.push_ref(ref_name, commit).await.map_err(|e| {
        error!(ref_name, %e, "error pushing root ref");
        SyncError::Protocol(e)
    })?;
    info!(ref_name, commit = %commit.short_hex(), "pushed root ref");
    Ok(())
}
