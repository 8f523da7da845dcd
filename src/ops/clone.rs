//! Subtree cloning
//!
//! Recreates a folder hierarchy under a new parent, then copies the files
//! into it. Free quota is checked against the subtree size before any
//! mutation is issued, so an oversized clone aborts with nothing created.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use futures_util::future::{join_all, BoxFuture};
use indicatif::ProgressBar;
use tracing::{info, warn};

use crate::api::{ApiRequest, NodeKind, NodeMetadata, RawNode, FOLDER_MIME};
use crate::session::Session;

use super::quota::fetch_quota;

/// What a finished (or dry-run) clone produced
#[derive(Debug, PartialEq, Eq)]
pub struct CloneOutcome {
    pub folders: usize,
    pub files: usize,
}

pub struct Cloner<'a> {
    session: &'a Session,
    dry_run: bool,
    /// (source file id, destination folder id) pairs deferred until the
    /// folder structure exists
    files_to_copy: Mutex<Vec<(String, String)>>,
    files_copied: Mutex<HashSet<String>>,
    folders_copied: Mutex<HashSet<String>>,
    progress: ProgressBar,
}

impl<'a> Cloner<'a> {
    pub fn new(session: &'a Session, dry_run: bool, total: u64) -> Self {
        Self {
            session,
            dry_run,
            files_to_copy: Mutex::new(Vec::new()),
            files_copied: Mutex::new(HashSet::new()),
            folders_copied: Mutex::new(HashSet::new()),
            progress: ProgressBar::new(total),
        }
    }

    /// Recreate `folder_id` under `destination`, then recurse into its
    /// subfolders concurrently. Files are deferred to `files_to_copy`.
    ///
    /// `new_name` is set only for the clone root; the root also gets fresh
    /// timestamps, so the copy's creation time reflects when the backup was
    /// made rather than when the source was.
    fn copy_folder_structure(
        &self,
        folder_id: String,
        destination: String,
        new_name: Option<String>,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self
                .folders_copied
                .lock()
                .unwrap()
                .insert(folder_id.clone())
            {
                // shortcut edge back into an already-copied folder
                return Ok(());
            }
            let node = self
                .session
                .cache
                .node(&folder_id)
                .ok_or_else(|| anyhow!("Folder {} is not cached", folder_id))?;

            let is_root = new_name.is_some();
            let metadata = NodeMetadata {
                name: Some(new_name.unwrap_or_else(|| node.name.clone())),
                mime_type: Some(FOLDER_MIME.to_string()),
                parents: Some(vec![destination]),
                created_time: if is_root { None } else { node.created_time.clone() },
                modified_time: if is_root { None } else { node.modified_time.clone() },
                ..Default::default()
            };

            let created_id = if self.dry_run {
                String::new()
            } else {
                let response = self
                    .session
                    .batcher
                    .submit(ApiRequest::Create { metadata }, false)
                    .await
                    .ok_or_else(|| anyhow!("Folder creation failed for {}", node.name))?;
                serde_json::from_value::<RawNode>(response)?.id
            };
            self.progress.inc(1);

            let mut subfolders = Vec::new();
            for (child_id, child) in self.session.cache.folder_children(&folder_id, true) {
                match child.kind() {
                    NodeKind::Folder => subfolders.push(child_id),
                    _ => self
                        .files_to_copy
                        .lock()
                        .unwrap()
                        .push((child_id, created_id.clone())),
                }
            }

            let copies = subfolders
                .into_iter()
                .map(|sub| self.copy_folder_structure(sub, created_id.clone(), None));
            for result in join_all(copies).await {
                result?;
            }
            Ok(())
        })
    }

    /// Copy one file into its already-created destination folder, keeping the
    /// source timestamps. Returns whether a copy was counted.
    async fn copy_file(&self, file_id: &str, destination: &str) -> bool {
        let node = match self.session.cache.node(file_id) {
            Some(node) => node,
            None => return false,
        };
        if self.session.cache.is_ignored(&node.name) || node.is_folder() {
            return false;
        }
        if !self.files_copied.lock().unwrap().insert(file_id.to_string()) {
            return false;
        }

        if !self.dry_run {
            let metadata = NodeMetadata {
                name: Some(node.name.clone()),
                parents: Some(vec![destination.to_string()]),
                created_time: node.created_time.clone(),
                modified_time: node.modified_time.clone(),
                ..Default::default()
            };
            let response = self
                .session
                .batcher
                .submit(
                    ApiRequest::Copy {
                        file_id: file_id.to_string(),
                        metadata,
                    },
                    false,
                )
                .await;
            if response.is_none() {
                warn!(id = file_id, name = %node.name, "File copy failed");
                return false;
            }
        }
        self.progress.inc(1);
        true
    }

    async fn copy_deferred_files(&self) -> usize {
        let deferred = std::mem::take(&mut *self.files_to_copy.lock().unwrap());
        let copies = deferred
            .iter()
            .map(|(file_id, destination)| self.copy_file(file_id, destination));
        join_all(copies).await.into_iter().filter(|&c| c).count()
    }
}

/// Clone `source` into `destination` as `new_name`.
///
/// Fetches the whole source subtree, verifies the active identity has enough
/// free quota for it, then creates the folder structure top-down and copies
/// the files concurrently.
pub async fn clone(
    session: &Session,
    source: &str,
    destination: &str,
    new_name: &str,
    dry_run: bool,
) -> Result<CloneOutcome> {
    session
        .cache
        .fetch_folder_and_descendants(source, &["createdTime", "modifiedTime"])
        .await;

    let items = session.cache.files_in_hierarchy(source, true);
    let folders = session.cache.count_folders(source) + 1;
    let needed = session.cache.folder_size(source);
    info!(
        items = items.len(),
        folders = folders,
        bytes = needed,
        "Source subtree fetched"
    );

    let quota = fetch_quota(session).await?;
    if needed > quota.free() {
        bail!(
            "Not enough free space: need {} bytes, {} free",
            needed,
            quota.free()
        );
    }

    let cloner = Cloner::new(session, dry_run, (items.len() + 1) as u64);
    cloner
        .copy_folder_structure(
            source.to_string(),
            destination.to_string(),
            Some(new_name.to_string()),
        )
        .await?;
    let files = cloner.copy_deferred_files().await;
    cloner.progress.finish_and_clear();

    let outcome = CloneOutcome {
        folders: cloner.folders_copied.lock().unwrap().len(),
        files,
    };
    info!(
        folders = outcome.folders,
        files = outcome.files,
        dry_run = dry_run,
        "Clone finished"
    );
    Ok(outcome)
}

pub async fn run(
    session: &Session,
    source: &str,
    destination: &str,
    new_name: &str,
    dry_run: bool,
) -> Result<()> {
    let outcome = clone(session, source, destination, new_name, dry_run).await?;
    println!(
        "Copied {} folders and {} files{}",
        outcome.folders,
        outcome.files,
        if dry_run { " (dry run)" } else { "" }
    );
    Ok(())
}
