//! Node deletion
//!
//! Deletes only nodes owned by the active identity. `delete all` operates on
//! everything the identity owns; both forms are gated by a confirmation
//! prompt in the CLI layer.

use anyhow::Result;
use futures_util::future::join_all;
use indicatif::ProgressBar;
use tracing::{debug, info};

use crate::api::ApiRequest;
use crate::session::Session;

use super::confirm;

/// Delete the subset of `ids` owned by the active identity. Returns the
/// number of deletions issued (or that would be issued under `dry_run`).
pub async fn delete_own_files(session: &Session, ids: &[String], dry_run: bool) -> Result<usize> {
    let mut to_delete = Vec::new();
    for id in ids {
        let name = session
            .cache
            .node(id)
            .map(|n| n.name)
            .unwrap_or_else(|| id.clone());
        if session.cache.is_owned_by_me(id) {
            debug!(id = %id, name = %name, "will delete");
            to_delete.push(id.clone());
        } else {
            debug!(id = %id, name = %name, "won't delete, not owned by me");
        }
    }

    info!(count = to_delete.len(), dry_run = dry_run, "deleting files");
    if dry_run {
        return Ok(to_delete.len());
    }

    let progress = ProgressBar::new(to_delete.len() as u64);
    let deletions = to_delete.iter().map(|id| {
        let progress = &progress;
        async move {
            let result = session
                .batcher
                .submit(ApiRequest::Delete { file_id: id.clone() }, false)
                .await;
            progress.inc(1);
            result
        }
    });
    let issued = join_all(deletions).await;
    progress.finish_and_clear();

    Ok(issued.iter().filter(|r| r.is_some()).count())
}

/// Delete explicit ids, or everything owned when the single id `all` is given
pub async fn clean(session: &Session, ids: &[String], dry_run: bool) -> Result<usize> {
    if ids.first().map(String::as_str) == Some("all") {
        let all = session.cache.ids();
        delete_own_files(session, &all, dry_run).await
    } else {
        delete_own_files(session, ids, dry_run).await
    }
}

pub async fn run(session: &Session, ids: &[String], dry_run: bool) -> Result<()> {
    if ids.first().map(String::as_str) == Some("all") {
        session.cache.fetch(Some("'me' in owners"), false, &[], false).await;
        if !confirm("Are you sure you want to delete all files?") {
            return Ok(());
        }
    } else {
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        session.cache.fetch_files(&id_refs, &[]).await;
        println!("Files to delete:");
        for id in ids {
            let name = session
                .cache
                .node(id)
                .map(|n| n.name)
                .unwrap_or_else(|| "<not found>".to_string());
            println!("{}: {}", id, name);
        }
        if !confirm("Are you sure you want to delete these files?") {
            return Ok(());
        }
    }

    clean(session, ids, dry_run).await?;
    Ok(())
}
