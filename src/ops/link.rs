//! Shortcut creation

use anyhow::{anyhow, Result};
use tracing::info;

use crate::api::{ApiRequest, NodeMetadata, RawNode, ShortcutDetails, SHORTCUT_MIME};
use crate::session::Session;

/// Create a shortcut to `target`, optionally parented at `destination`
pub async fn run(session: &Session, target: &str, destination: Option<&str>) -> Result<()> {
    let metadata = NodeMetadata {
        mime_type: Some(SHORTCUT_MIME.to_string()),
        shortcut_details: Some(ShortcutDetails {
            target_id: target.to_string(),
        }),
        parents: destination.map(|d| vec![d.to_string()]),
        ..Default::default()
    };

    let response = session
        .batcher
        .submit(ApiRequest::Create { metadata }, false)
        .await
        .ok_or_else(|| anyhow!("Shortcut creation failed for target {}", target))?;

    let created: RawNode = serde_json::from_value(response)?;
    info!(id = %created.id, target = target, "Created shortcut");
    Ok(())
}
