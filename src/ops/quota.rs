//! Storage quota report for the active identity

use anyhow::{anyhow, Context, Result};

use crate::api::{About, ApiRequest, StorageQuota};
use crate::session::Session;

const GIB: f64 = (1u64 << 30) as f64;

/// Fetch the active identity's storage quota
pub async fn fetch_quota(session: &Session) -> Result<StorageQuota> {
    let response = session
        .batcher
        .submit(ApiRequest::About, true)
        .await
        .ok_or_else(|| anyhow!("Could not fetch storage quota"))?;
    let about: About =
        serde_json::from_value(response).context("Unexpected quota response shape")?;
    Ok(about.storage_quota)
}

pub fn format_storage_quota(quota: &StorageQuota) -> String {
    [
        ("limit", quota.limit),
        ("usage", quota.usage),
        ("usageInDrive", quota.usage_in_drive),
        ("usageInDriveTrash", quota.usage_in_drive_trash),
    ]
    .iter()
    .map(|(key, bytes)| format!("{:<30}: {:.3} GiB", key, *bytes as f64 / GIB))
    .collect::<Vec<_>>()
    .join("\n")
}

pub async fn run(session: &Session) -> Result<()> {
    let quota = fetch_quota(session).await?;
    println!("{}", format_storage_quota(&quota));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_storage_quota() {
        let quota = StorageQuota {
            limit: 1 << 30,
            usage: 1 << 29,
            usage_in_drive: 1 << 29,
            usage_in_drive_trash: 0,
        };
        let formatted = format_storage_quota(&quota);
        assert!(formatted.contains("limit"));
        assert!(formatted.contains("1.000 GiB"));
        assert!(formatted.contains("0.500 GiB"));
    }
}
