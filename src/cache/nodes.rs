//! In-memory mirror of remote node state
//!
//! Lazily accumulates node records fetched through the batcher and answers
//! structural and aggregate queries without re-contacting the remote store.
//! Folder sizes and paths are memoized in Moka tables for the cache's current
//! lifetime; `clear()` drops the nodes and both tables together so stale
//! derived values cannot outlive the records they were computed from.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use moka::sync::Cache;
use tracing::{debug, warn};

use crate::api::{ApiRequest, FileListPage, Node, NodeKind, RawNode, RequestBatcher};

/// Folder names excluded from traversal, diffing and cloning
pub const IGNORE_LIST: [&str; 15] = [
    ".git",
    ".idea",
    ".vscode",
    "__pycache__",
    "venv",
    "node_modules",
    "dist",
    "build",
    "target",
    "out",
    "bin",
    "obj",
    "logs",
    "cache",
    "cmake-build-debug",
];

/// Upper bound on memoized aggregate entries
const MEMO_CAPACITY: u64 = 100_000;

/// The hierarchical cache: an id-indexed arena of nodes with parent-id
/// back-references. Traversal is driven by scanning-by-parent and by explicit
/// shortcut-target edges.
pub struct NodeCache {
    batcher: Arc<RequestBatcher>,
    nodes: Mutex<HashMap<String, Node>>,
    folder_sizes: Cache<String, u64>,
    paths: Cache<(String, Option<String>), String>,
}

impl NodeCache {
    pub fn new(batcher: Arc<RequestBatcher>) -> Self {
        Self {
            batcher,
            nodes: Mutex::new(HashMap::new()),
            folder_sizes: Cache::builder()
                .max_capacity(MEMO_CAPACITY)
                .name("folder_size_memo")
                .build(),
            paths: Cache::builder()
                .max_capacity(MEMO_CAPACITY)
                .name("path_memo")
                .build(),
        }
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        IGNORE_LIST.contains(&name)
    }

    /// Empty the cache and both memoization tables
    pub fn clear(&self) {
        self.nodes.lock().unwrap().clear();
        self.folder_sizes.invalidate_all();
        self.paths.invalidate_all();
        debug!("Cleared node cache and memoized aggregates");
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        self.nodes.lock().unwrap().get(id).cloned()
    }

    /// All cached ids, in no particular order
    pub fn ids(&self) -> Vec<String> {
        self.nodes.lock().unwrap().keys().cloned().collect()
    }

    pub fn insert(&self, id: &str, node: Node) {
        self.nodes.lock().unwrap().insert(id.to_string(), node);
    }

    /// Re-parent a node in place (used by orphan adoption in the browser)
    pub fn set_parent(&self, id: &str, parent: &str) {
        if let Some(node) = self.nodes.lock().unwrap().get_mut(id) {
            node.parent = Some(parent.to_string());
        }
    }

    fn merge_raw(&self, raw: RawNode) -> String {
        let id = raw.id.clone();
        self.nodes
            .lock()
            .unwrap()
            .entry(id.clone())
            .or_default()
            .merge(raw);
        id
    }

    pub fn is_owned_by_me(&self, id: &str) -> bool {
        self.nodes
            .lock()
            .unwrap()
            .get(id)
            .map(|n| n.owned_by_me())
            .unwrap_or(false)
    }

    ////////////////////////////////////////////////////////////////////////////
    // Queries                                                                //
    ////////////////////////////////////////////////////////////////////////////

    /// Direct children of a folder, shortcut folders resolved to their target.
    /// Sorted by name then id so sibling order is deterministic.
    pub fn folder_children(&self, folder_id: &str, filter_ignored: bool) -> Vec<(String, Node)> {
        let nodes = self.nodes.lock().unwrap();
        let folder_id = match nodes.get(folder_id).and_then(|n| {
            n.is_shortcut().then(|| n.shortcut_target.clone()).flatten()
        }) {
            Some(target) => target,
            None => folder_id.to_string(),
        };

        let mut children: Vec<(String, Node)> = nodes
            .iter()
            .filter(|(_, node)| node.parent.as_deref() == Some(folder_id.as_str()))
            .filter(|(_, node)| !(filter_ignored && self.is_ignored(&node.name)))
            .map(|(id, node)| (id.clone(), node.clone()))
            .collect();
        children.sort_by(|a, b| (&a.1.name, &a.0).cmp(&(&b.1.name, &b.0)));
        children
    }

    /// All descendants of a folder, depth-first, following folder and
    /// shortcut-to-folder edges. A visited set makes shortcut cycles back to
    /// an ancestor terminate instead of recursing forever.
    pub fn files_in_hierarchy(&self, folder_id: &str, filter_ignored: bool) -> Vec<(String, Node)> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(folder_id.to_string());
        self.descend(folder_id, filter_ignored, &mut visited, &mut out);
        out
    }

    fn descend(
        &self,
        folder_id: &str,
        filter_ignored: bool,
        visited: &mut HashSet<String>,
        out: &mut Vec<(String, Node)>,
    ) {
        for (child_id, child) in self.folder_children(folder_id, filter_ignored) {
            let next = match child.kind() {
                NodeKind::Folder => Some(child_id.clone()),
                NodeKind::Shortcut => child.shortcut_target.clone(),
                NodeKind::File => None,
            };
            out.push((child_id, child));
            if let Some(next) = next {
                if visited.insert(next.clone()) {
                    self.descend(&next, filter_ignored, visited, out);
                }
            }
        }
    }

    /// Number of folders in the hierarchy below `folder_id`
    pub fn count_folders(&self, folder_id: &str) -> usize {
        self.files_in_hierarchy(folder_id, true)
            .iter()
            .filter(|(_, node)| node.is_folder())
            .count()
    }

    /// Effective size of a node: files contribute `size`, folders and
    /// shortcuts recurse.
    pub fn file_size(&self, id: &str) -> u64 {
        match self.node(id) {
            Some(node) if node.kind() == NodeKind::File => node.size,
            Some(_) => self.folder_size(id),
            None => 0,
        }
    }

    /// Recursive sum of descendant file sizes, memoized per folder id
    pub fn folder_size(&self, folder_id: &str) -> u64 {
        let mut visiting = HashSet::new();
        self.folder_size_inner(folder_id, &mut visiting)
    }

    fn folder_size_inner(&self, folder_id: &str, visiting: &mut HashSet<String>) -> u64 {
        if let Some(size) = self.folder_sizes.get(folder_id) {
            return size;
        }
        if !visiting.insert(folder_id.to_string()) {
            // shortcut cycle back into a folder we are already summing
            return 0;
        }

        let mut total = 0;
        for (child_id, child) in self.folder_children(folder_id, false) {
            total += match child.kind() {
                NodeKind::File => child.size,
                _ => self.folder_size_inner(&child_id, visiting),
            };
        }
        self.folder_sizes.insert(folder_id.to_string(), total);
        total
    }

    /// Path from the first uncached ancestor (or `stop_at`) down to `id`,
    /// `/`-separated with a leading slash. Memoized per `(id, stop_at)`.
    pub fn build_path(&self, id: &str, stop_at: Option<&str>) -> String {
        let key = (id.to_string(), stop_at.map(str::to_string));
        if let Some(path) = self.paths.get(&key) {
            return path;
        }

        let nodes = self.nodes.lock().unwrap();
        let mut path = nodes
            .get(id)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| id.to_string());
        let mut parent = nodes.get(id).and_then(|n| n.parent.clone());
        while let Some(parent_id) = parent {
            if Some(parent_id.as_str()) == stop_at {
                break;
            }
            match nodes.get(&parent_id) {
                Some(node) => {
                    path = format!("{}/{}", node.name, path);
                    parent = node.parent.clone();
                }
                None => break,
            }
        }
        drop(nodes);

        let path = format!("/{}", path);
        self.paths.insert(key, path.clone());
        path
    }

    /// Nodes owned by the active identity that are unreachable by normal
    /// traversal: their parent is missing from the cache or owned by someone
    /// else.
    pub fn orphan_files(&self) -> Vec<(String, Node)> {
        let nodes = self.nodes.lock().unwrap();
        let owned = |id: &str| nodes.get(id).map(|n| n.owned_by_me()).unwrap_or(false);
        nodes
            .iter()
            .filter(|(_, node)| {
                node.owned_by_me() && node.parent.as_deref().map(|p| !owned(p)).unwrap_or(true)
            })
            .map(|(id, node)| (id.clone(), node.clone()))
            .collect()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Fetching                                                               //
    ////////////////////////////////////////////////////////////////////////////

    /// Paginated listing, merged into the cache. Returns the ids added or
    /// updated by this call. With `batched` the pages ride the shared queue
    /// (still one page at a time — each page token depends on the previous
    /// response); otherwise each page executes immediately.
    pub async fn fetch(
        &self,
        query: Option<&str>,
        shared: bool,
        extra_fields: &[&str],
        batched: bool,
    ) -> Vec<String> {
        if !batched {
            debug!(query = ?query, shared = shared, "Fetching file info");
        }

        let mut merged = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let request = ApiRequest::List {
                query: query.map(str::to_string),
                page_token: page_token.clone(),
                extra_fields: extra_fields.iter().map(|f| f.to_string()).collect(),
                shared,
            };
            let response = match self.batcher.submit(request, !batched).await {
                Some(value) => value,
                None => {
                    warn!(query = ?query, "Listing page failed unrecoverably, aborting fetch");
                    break;
                }
            };
            let page: FileListPage = match serde_json::from_value(response) {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, "Could not parse listing page, aborting fetch");
                    break;
                }
            };

            merged.extend(page.files.into_iter().map(|raw| self.merge_raw(raw)));
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        if !batched {
            debug!(count = merged.len(), "Fetched and parsed files");
        }
        merged
    }

    /// Fetch specific ids directly, as concurrent independent gets through
    /// the shared queue.
    pub async fn fetch_files(&self, ids: &[&str], extra_fields: &[&str]) -> Vec<String> {
        let gets = ids.iter().map(|id| {
            self.batcher.submit(
                ApiRequest::Get {
                    file_id: id.to_string(),
                    extra_fields: extra_fields.iter().map(|f| f.to_string()).collect(),
                },
                false,
            )
        });

        let mut merged = Vec::new();
        for response in join_all(gets).await.into_iter().flatten() {
            match serde_json::from_value::<RawNode>(response) {
                Ok(raw) => merged.push(self.merge_raw(raw)),
                Err(e) => warn!(error = %e, "Could not parse node record"),
            }
        }
        debug!(requested = ids.len(), merged = merged.len(), "Fetched file info by id");
        merged
    }

    /// Fetch a folder and its whole subtree: the folder node itself, then
    /// children level by level with sibling subtrees listed concurrently.
    /// Ignore-listed folder names are pruned.
    pub async fn fetch_folder_and_descendants(&self, folder_id: &str, extra_fields: &[&str]) {
        debug!(folder_id = folder_id, "Fetching folder and descendants");
        self.fetch_files(&[folder_id], extra_fields).await;

        let mut frontier = vec![folder_id.to_string()];
        while !frontier.is_empty() {
            let listings = frontier.iter().map(|id| {
                let query = format!("'{}' in parents", id);
                async move { self.fetch(Some(&query), true, extra_fields, true).await }
            });
            let levels = join_all(listings).await;

            frontier = levels
                .into_iter()
                .flatten()
                .filter(|id| {
                    self.node(id)
                        .map(|n| n.is_folder() && !self.is_ignored(&n.name))
                        .unwrap_or(false)
                })
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::ScriptedTransport;
    use crate::api::{Owner, FOLDER_MIME, SHORTCUT_MIME};
    use serde_json::{json, Value};

    fn empty_cache() -> NodeCache {
        let transport = ScriptedTransport::new(|_| Ok(Value::Null));
        NodeCache::new(Arc::new(RequestBatcher::new(transport)))
    }

    fn folder(name: &str, parent: Option<&str>) -> Node {
        Node {
            name: name.to_string(),
            mime_type: FOLDER_MIME.to_string(),
            parent: parent.map(str::to_string),
            ..Default::default()
        }
    }

    fn file(name: &str, parent: &str, size: u64) -> Node {
        Node {
            name: name.to_string(),
            mime_type: "text/plain".to_string(),
            size,
            parent: Some(parent.to_string()),
            ..Default::default()
        }
    }

    fn shortcut(name: &str, parent: &str, target: &str) -> Node {
        Node {
            name: name.to_string(),
            mime_type: SHORTCUT_MIME.to_string(),
            parent: Some(parent.to_string()),
            shortcut_target: Some(target.to_string()),
            ..Default::default()
        }
    }

    fn owned(mut node: Node) -> Node {
        node.owners = vec![Owner {
            email_address: "svc@example.com".to_string(),
            me: true,
        }];
        node
    }

    /// root/ {docs/ {a.txt(10), b.txt(20)}, pics/ {c.jpg(30)}}
    fn sample_tree(cache: &NodeCache) {
        cache.insert("root", folder("root", None));
        cache.insert("docs", folder("docs", Some("root")));
        cache.insert("pics", folder("pics", Some("root")));
        cache.insert("a", file("a.txt", "docs", 10));
        cache.insert("b", file("b.txt", "docs", 20));
        cache.insert("c", file("c.jpg", "pics", 30));
    }

    #[tokio::test]
    async fn test_folder_size_recurses_and_memoizes() {
        let cache = empty_cache();
        sample_tree(&cache);

        assert_eq!(cache.folder_size("docs"), 30);
        assert_eq!(cache.folder_size("root"), 60);
        assert_eq!(cache.file_size("root"), 60);
        assert_eq!(cache.file_size("a"), 10);

        // memoized: a later narrower fetch does not change the cached size
        cache.insert("d", file("d.txt", "docs", 100));
        assert_eq!(cache.folder_size("docs"), 30);

        cache.clear();
        sample_tree(&cache);
        cache.insert("d", file("d.txt", "docs", 100));
        assert_eq!(cache.folder_size("docs"), 130);
    }

    #[tokio::test]
    async fn test_folder_size_equals_sum_of_children() {
        let cache = empty_cache();
        sample_tree(&cache);

        let total: u64 = cache
            .folder_children("root", false)
            .iter()
            .map(|(id, _)| cache.file_size(id))
            .sum();
        assert_eq!(cache.folder_size("root"), total);
    }

    #[tokio::test]
    async fn test_shortcut_children_resolve_to_target() {
        let cache = empty_cache();
        sample_tree(&cache);
        cache.insert("link", shortcut("docs-link", "pics", "docs"));

        let names: Vec<String> = cache
            .folder_children("link", false)
            .into_iter()
            .map(|(_, n)| n.name)
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_hierarchy_terminates_on_shortcut_cycle() {
        let cache = empty_cache();
        sample_tree(&cache);
        // shortcut inside docs pointing back up to root
        cache.insert("loop", shortcut("up", "docs", "root"));

        let all = cache.files_in_hierarchy("root", false);
        // every node below root visited exactly once, traversal terminates
        assert_eq!(all.len(), 6);
    }

    #[tokio::test]
    async fn test_ignored_names_filtered() {
        let cache = empty_cache();
        sample_tree(&cache);
        cache.insert("nm", folder("node_modules", Some("root")));
        cache.insert("dep", file("dep.js", "nm", 1));

        let filtered = cache.files_in_hierarchy("root", true);
        assert!(filtered.iter().all(|(_, n)| n.name != "node_modules"));
        // but the unfiltered walk still sees it
        assert!(cache
            .files_in_hierarchy("root", false)
            .iter()
            .any(|(_, n)| n.name == "node_modules"));
    }

    #[tokio::test]
    async fn test_build_path_segments() {
        let cache = empty_cache();
        sample_tree(&cache);

        assert_eq!(cache.build_path("a", None), "/root/docs/a.txt");
        assert_eq!(cache.build_path("a", Some("root")), "/docs/a.txt");
        assert_eq!(cache.build_path("docs", None), "/root/docs");
        // last segment is the node's own name; dropping it gives the parent's path
        let path = cache.build_path("a", None);
        let (parent_path, _) = path.rsplit_once('/').unwrap();
        assert_eq!(cache.build_path("docs", None), parent_path);
    }

    #[tokio::test]
    async fn test_build_path_stops_at_uncached_ancestor() {
        let cache = empty_cache();
        cache.insert("x", file("x.txt", "ghost", 1));
        assert_eq!(cache.build_path("x", None), "/x.txt");
    }

    #[tokio::test]
    async fn test_orphans_with_absent_parent() {
        let cache = empty_cache();
        cache.insert("root", owned(folder("root", None)));
        cache.insert("ok", owned(file("ok.txt", "root", 1)));
        // parent never fetched
        cache.insert("x", owned(file("x.txt", "gone", 1)));
        // parent cached but owned by someone else
        cache.insert("theirs", folder("theirs", None));
        cache.insert("y", owned(file("y.txt", "theirs", 1)));
        // not mine at all
        cache.insert("z", file("z.txt", "gone", 1));

        let mut orphans: Vec<String> =
            cache.orphan_files().into_iter().map(|(id, _)| id).collect();
        orphans.sort();
        assert_eq!(orphans, vec!["root", "x", "y"]);
    }

    #[tokio::test]
    async fn test_clear_empties_nodes_and_memos() {
        let cache = empty_cache();
        sample_tree(&cache);
        cache.folder_size("root");
        cache.build_path("a", None);

        cache.clear();

        assert_eq!(cache.len(), 0);
        assert_eq!(cache.folder_size("root"), 0);
        assert_eq!(cache.build_path("a", None), "/a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_follows_pagination() {
        let transport = ScriptedTransport::new(|request| {
            let ApiRequest::List { page_token, .. } = request else {
                return Ok(Value::Null);
            };
            Ok(match page_token.as_deref() {
                None => json!({
                    "files": [{"id": "f1", "name": "one", "size": "1"}],
                    "nextPageToken": "page2"
                }),
                Some("page2") => json!({
                    "files": [{"id": "f2", "name": "two", "size": "2"}]
                }),
                Some(other) => panic!("unexpected page token {}", other),
            })
        });
        let cache = NodeCache::new(Arc::new(RequestBatcher::new(transport)));

        let merged = cache.fetch(Some("'me' in owners"), false, &[], false).await;

        assert_eq!(merged, vec!["f1", "f2"]);
        assert_eq!(cache.node("f2").unwrap().size, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_folder_and_descendants_prunes_ignored() {
        let transport = ScriptedTransport::new(|request| {
            Ok(match request {
                ApiRequest::Get { file_id, .. } if file_id == "root" => {
                    json!({"id": "root", "name": "root", "mimeType": FOLDER_MIME})
                }
                ApiRequest::List { query, .. } => match query.as_deref() {
                    Some("'root' in parents") => json!({"files": [
                        {"id": "docs", "name": "docs", "mimeType": FOLDER_MIME, "parents": ["root"]},
                        {"id": "nm", "name": "node_modules", "mimeType": FOLDER_MIME, "parents": ["root"]},
                    ]}),
                    Some("'docs' in parents") => json!({"files": [
                        {"id": "a", "name": "a.txt", "size": "5", "parents": ["docs"]},
                    ]}),
                    other => panic!("unexpected listing {:?}", other),
                },
                other => panic!("unexpected request {:?}", other),
            })
        });
        let cache = NodeCache::new(Arc::new(RequestBatcher::new(transport)));

        cache.fetch_folder_and_descendants("root", &[]).await;

        assert_eq!(cache.len(), 4);
        assert_eq!(cache.node("a").unwrap().size, 5);
        // node_modules itself is cached but never listed into
        assert!(cache.node("nm").is_some());
    }
}
