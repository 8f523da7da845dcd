//! Backup rotation across the identity pool
//!
//! Each identity in the pool holds at most one backup under the destination
//! folder. While unused identities remain, the next backup goes to one of
//! them; once every identity holds a backup, the oldest backup is deleted and
//! its owner is reused for the new one.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::info;

use crate::session::Session;

use super::clean::delete_own_files;
use super::clone;

/// Pause after deleting a backup, letting the remote quota accounting settle
/// before the pre-flight check of the clone that follows.
const QUOTA_SETTLE: Duration = Duration::from_secs(10);

/// Rotate in a new backup of `source` under `destination` named `new_name`
pub async fn run(
    session: &mut Session,
    source: &str,
    destination: &str,
    new_name: &str,
    dry_run: bool,
) -> Result<()> {
    let query = format!("'{}' in parents", destination);
    session
        .cache
        .fetch(Some(&query), true, &["createdTime"], false)
        .await;

    let backups = session.cache.folder_children(destination, false);
    let used: HashSet<String> = backups
        .iter()
        .flat_map(|(_, node)| node.owners.iter().map(|o| o.email_address.clone()))
        .collect();
    info!(
        backups = backups.len(),
        pool = session.pool_size(),
        "Existing backups under destination"
    );

    if backups.len() >= session.pool_size() {
        // every identity holds a backup; evict the oldest and reuse its owner
        let (oldest_id, oldest) = backups
            .iter()
            .min_by_key(|(_, node)| node.created_time.clone())
            .ok_or_else(|| anyhow!("No backups under {}", destination))?;
        let owner = oldest
            .owners
            .first()
            .map(|o| o.email_address.clone())
            .ok_or_else(|| anyhow!("Backup {} has no owner on record", oldest_id))?;
        info!(id = %oldest_id, name = %oldest.name, owner = %owner, "Deleting oldest backup");

        session.switch_identity(&owner)?;
        // refetch under the new identity so ownership is relative to it
        session.cache.fetch_files(&[oldest_id.as_str()], &[]).await;
        delete_own_files(session, std::slice::from_ref(oldest_id), dry_run).await?;

        // ownership flags and aggregates are stale across the identity switch
        session.cache.clear();
        if !dry_run {
            tokio::time::sleep(QUOTA_SETTLE).await;
        }
    } else {
        let next = session
            .accounts()
            .into_iter()
            .find(|email| !used.contains(email))
            .ok_or_else(|| anyhow!("No unused identity in the pool"))?;
        info!(email = %next, "Using an identity without a backup");
        session.switch_identity(&next)?;
        session.cache.clear();
    }

    clone::run(session, source, destination, new_name, dry_run).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::ScriptedTransport;
    use crate::api::{ApiRequest, FOLDER_MIME};
    use crate::session::{Credential, IdentityPool};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn pool() -> IdentityPool {
        IdentityPool::from_credentials(vec![
            Credential {
                client_email: "a@example.com".to_string(),
                token: "ta".to_string(),
            },
            Credential {
                client_email: "b@example.com".to_string(),
                token: "tb".to_string(),
            },
        ])
    }

    fn handler(existing_backups: usize) -> impl Fn(&ApiRequest) -> Result<Value, crate::api::ApiError> + Send + Sync
    {
        move |request| {
            Ok(match request {
                ApiRequest::List { query, .. } => match query.as_deref() {
                    Some("'dest' in parents") => {
                        let backups = [
                            json!({"id": "bak1", "name": "drive_backup_2024-01-01",
                                   "mimeType": FOLDER_MIME, "parents": ["dest"],
                                   "createdTime": "2024-01-01T00:00:00.000Z",
                                   "owners": [{"emailAddress": "a@example.com"}]}),
                            json!({"id": "bak2", "name": "drive_backup_2024-02-01",
                                   "mimeType": FOLDER_MIME, "parents": ["dest"],
                                   "createdTime": "2024-02-01T00:00:00.000Z",
                                   "owners": [{"emailAddress": "b@example.com"}]}),
                        ];
                        json!({"files": &backups[..existing_backups]})
                    }
                    Some("'src' in parents") => json!({"files": [
                        {"id": "f1", "name": "a.txt", "size": "5", "parents": ["src"],
                         "createdTime": "2024-01-01T00:00:00.000Z"},
                    ]}),
                    other => panic!("unexpected listing {:?}", other),
                },
                ApiRequest::Get { file_id, .. } if file_id == "src" => json!({
                    "id": "src", "name": "stuff", "mimeType": FOLDER_MIME,
                }),
                ApiRequest::Get { file_id, .. } if file_id == "bak1" => json!({
                    "id": "bak1", "name": "drive_backup_2024-01-01",
                    "owners": [{"emailAddress": "a@example.com", "me": true}],
                }),
                ApiRequest::About => json!({"storageQuota": {
                    "limit": "1000000", "usage": "0",
                    "usageInDrive": "0", "usageInDriveTrash": "0",
                }}),
                ApiRequest::Create { .. } => json!({"id": "new-root"}),
                ApiRequest::Copy { file_id, .. } => json!({"id": format!("copy-of-{}", file_id)}),
                ApiRequest::Delete { .. } => Value::Null,
                other => panic!("unexpected request {:?}", other),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_pool_evicts_oldest_and_reuses_its_owner() {
        let transport = ScriptedTransport::new(handler(2));
        let mut session = Session::with_transport(pool(), 2, transport.clone()).unwrap();

        run(&mut session, "src", "dest", "drive_backup_2024-03-01", false)
            .await
            .unwrap();

        // oldest backup (bak1, owned by a@) was deleted
        let deletes: Vec<String> = transport
            .mutation_calls()
            .iter()
            .filter_map(|r| match r {
                ApiRequest::Delete { file_id } => Some(file_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(deletes, vec!["bak1"]);
        assert_eq!(session.email(), "a@example.com");

        // and the new backup was created in its place
        assert!(transport
            .mutation_calls()
            .iter()
            .any(|r| matches!(r, ApiRequest::Create { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_pool_picks_unused_identity_without_deleting() {
        let transport = ScriptedTransport::new(handler(1));
        let mut session = Session::with_transport(pool(), 1, transport.clone()).unwrap();

        run(&mut session, "src", "dest", "drive_backup_2024-03-01", false)
            .await
            .unwrap();

        // a@ already holds bak1, so b@ takes the new backup
        assert_eq!(session.email(), "b@example.com");
        assert!(!transport
            .mutation_calls()
            .iter()
            .any(|r| matches!(r, ApiRequest::Delete { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_issues_no_mutations() {
        let transport = ScriptedTransport::new(handler(2));
        let mut session = Session::with_transport(pool(), 1, transport.clone()).unwrap();

        run(&mut session, "src", "dest", "drive_backup_2024-03-01", true)
            .await
            .unwrap();

        assert!(transport.mutation_calls().is_empty());
    }
}
