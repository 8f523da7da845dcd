//! Interactive hierarchy browser
//!
//! Walks the cached tree from a chosen root, one numbered listing per folder.
//! Shortcut entries are marked and followed to their target; orphaned nodes
//! can be adopted under the root so they become reachable.

use std::io::{self, BufRead, Write};

use anyhow::Result;
use tracing::{info, warn};

use crate::api::{Node, NodeKind};
use crate::cache::NodeCache;
use crate::session::Session;

const MIB: f64 = (1u64 << 20) as f64;

/// Folders first, then shortcuts, then files
fn kind_rank(node: &Node) -> u8 {
    match node.kind() {
        NodeKind::Folder => 0,
        NodeKind::Shortcut => 1,
        NodeKind::File => 10,
    }
}

/// Children of a folder in display order
pub fn sorted_entries(cache: &NodeCache, folder_id: &str) -> Vec<(String, Node)> {
    let mut children = cache.folder_children(folder_id, false);
    children.sort_by(|a, b| {
        (kind_rank(&a.1), &a.1.name, &a.0).cmp(&(kind_rank(&b.1), &b.1.name, &b.0))
    });
    children
}

fn format_entry(index: usize, id: &str, node: &Node, cache: &NodeCache) -> String {
    let marker = match node.kind() {
        NodeKind::Folder => "/",
        NodeKind::Shortcut => "@",
        NodeKind::File => "",
    };
    format!(
        "{:>4}: {:<60} {:>10.3} MiB  {:<26} ({})",
        index,
        format!("{}{}", node.name, marker),
        cache.file_size(id) as f64 / MIB,
        node.modified_time.as_deref().unwrap_or(""),
        id,
    )
}

/// Re-parent every orphan under `root_id` so the browser can reach it
fn adopt_orphans(cache: &NodeCache, root_id: &str) {
    let orphans = cache.orphan_files();
    info!(count = orphans.len(), "Adopting orphans under the browse root");
    for (id, node) in orphans {
        if id != root_id {
            info!(id = %id, name = %node.name, "Adopted orphan");
            cache.set_parent(&id, root_id);
        }
    }
}

/// Browse the hierarchy under `root` interactively.
///
/// `root` may be the alias `root`, which lists everything the active identity
/// owns and resolves the alias to the real top-level folder id.
pub async fn run(session: &Session, root: &str, orphans: bool) -> Result<()> {
    let fields = ["createdTime", "modifiedTime"];
    let root_id = if root == "root" {
        session
            .cache
            .fetch(Some("'me' in owners"), false, &fields, false)
            .await;
        session
            .cache
            .fetch_files(&[root], &fields)
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| root.to_string())
    } else {
        session.cache.fetch_folder_and_descendants(root, &fields).await;
        root.to_string()
    };

    if orphans {
        adopt_orphans(&session.cache, &root_id);
    }

    let stdin = io::stdin();
    let mut stack = vec![root_id];
    while let Some(current) = stack.last().cloned() {
        let entries = sorted_entries(&session.cache, &current);
        println!("\n{}", session.cache.build_path(&current, None));
        println!("   0: ..");
        for (index, (id, node)) in entries.iter().enumerate() {
            println!("{}", format_entry(index + 1, id, node, &session.cache));
        }

        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let choice = match line.trim().parse::<usize>() {
            Ok(choice) => choice,
            Err(_) => {
                warn!("Enter a listed number");
                continue;
            }
        };

        if choice == 0 {
            stack.pop();
            continue;
        }
        match entries.get(choice - 1) {
            Some((id, node)) if node.is_folder() => stack.push(id.clone()),
            Some((_, node)) if node.is_shortcut() => match &node.shortcut_target {
                Some(target) if session.cache.node(target).is_some() => {
                    stack.push(target.clone())
                }
                _ => warn!(name = %node.name, "Shortcut target is not cached"),
            },
            Some((_, node)) => warn!(name = %node.name, "Not a folder"),
            None => warn!(choice = choice, "No such entry"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::ScriptedTransport;
    use crate::api::{Owner, RequestBatcher, FOLDER_MIME, SHORTCUT_MIME};
    use serde_json::Value;
    use std::sync::Arc;

    fn cache() -> NodeCache {
        let transport = ScriptedTransport::new(|_| Ok(Value::Null));
        NodeCache::new(Arc::new(RequestBatcher::new(transport)))
    }

    fn node(name: &str, mime: &str, parent: Option<&str>) -> Node {
        Node {
            name: name.to_string(),
            mime_type: mime.to_string(),
            parent: parent.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_entries_sorted_folders_then_shortcuts_then_files() {
        let cache = cache();
        cache.insert("root", node("root", FOLDER_MIME, None));
        cache.insert("z", node("z.txt", "text/plain", Some("root")));
        cache.insert("link", node("link", SHORTCUT_MIME, Some("root")));
        cache.insert("docs", node("docs", FOLDER_MIME, Some("root")));

        let names: Vec<String> = sorted_entries(&cache, "root")
            .into_iter()
            .map(|(_, n)| n.name)
            .collect();
        assert_eq!(names, vec!["docs", "link", "z.txt"]);
    }

    #[tokio::test]
    async fn test_entry_markers_and_size() {
        let cache = cache();
        cache.insert("root", node("root", FOLDER_MIME, None));
        cache.insert("docs", node("docs", FOLDER_MIME, Some("root")));
        let mut file = node("big.bin", "application/octet-stream", Some("docs"));
        file.size = 3 << 20;
        cache.insert("big", file.clone());

        let folder_line = format_entry(1, "docs", &cache.node("docs").unwrap(), &cache);
        assert!(folder_line.contains("docs/"));
        assert!(folder_line.contains("3.000 MiB"));

        let file_line = format_entry(2, "big", &file, &cache);
        assert!(file_line.contains("big.bin "));
        assert!(file_line.contains("(big)"));
    }

    #[tokio::test]
    async fn test_orphans_adopted_under_root() {
        let cache = cache();
        let mine = |name: &str, mime: &str, parent: Option<&str>| {
            let mut n = node(name, mime, parent);
            n.owners = vec![Owner {
                email_address: "svc@example.com".to_string(),
                me: true,
            }];
            n
        };
        cache.insert("root", mine("root", FOLDER_MIME, None));
        cache.insert("lost", mine("lost.txt", "text/plain", Some("gone")));

        adopt_orphans(&cache, "root");

        assert_eq!(cache.node("lost").unwrap().parent.as_deref(), Some("root"));
        // the root itself is an orphan by definition but is never re-parented
        assert_eq!(cache.node("root").unwrap().parent, None);
    }
}
