//! Recursive subtree diff
//!
//! Pairs and compares the descendants of two cached subtrees, classifying
//! each as newer on one side, or present on one side only.

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use chrono::DateTime;
use tracing::debug;

use crate::api::Node;
use crate::cache::NodeCache;
use crate::session::Session;

/// Fields two children must match on exactly to count as the same item
/// on both sides: name, creation time and MIME type.
fn are_paired(a: &Node, b: &Node) -> bool {
    a.name == b.name && a.created_time == b.created_time && a.mime_type == b.mime_type
}

/// Accumulated classification of both subtrees' descendants
#[derive(Debug, Default)]
pub struct DiffReport {
    pub newer_first: Vec<String>,
    pub newer_second: Vec<String>,
    pub only_first: HashSet<String>,
    pub only_second: HashSet<String>,
}

impl DiffReport {
    fn absorb(&mut self, other: DiffReport) {
        self.newer_first.extend(other.newer_first);
        self.newer_second.extend(other.newer_second);
        self.only_first.extend(other.only_first);
        self.only_second.extend(other.only_second);
    }
}

/// Returns >0 if `a` was modified after `b`, <0 for the converse, 0 when
/// equal or when either timestamp is missing or unparseable.
fn compare_modified(a: &Node, b: &Node) -> i8 {
    let parse = |node: &Node| {
        node.modified_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
    };
    match (parse(a), parse(b)) {
        (Some(ta), Some(tb)) if ta > tb => 1,
        (Some(ta), Some(tb)) if ta < tb => -1,
        _ => 0,
    }
}

/// Recursively compare two cached subtrees.
///
/// Matched folder pairs recurse; other pairs compare modification times.
/// Children are paired greedily with the first unmatched candidate on the
/// other side; unpaired children accumulate as only-present.
pub fn compare(cache: &NodeCache, first: (&str, &Node), second: (&str, &Node)) -> DiffReport {
    let mut report = DiffReport::default();
    let (first_id, first_node) = first;
    let (second_id, second_node) = second;

    if !(first_node.is_folder() && second_node.is_folder()) {
        match compare_modified(first_node, second_node) {
            1 => {
                debug!(name = %first_node.name, id = first_id, "newer in first");
                report.newer_first.push(first_id.to_string());
            }
            -1 => {
                debug!(name = %second_node.name, id = second_id, "newer in second");
                report.newer_second.push(second_id.to_string());
            }
            _ => {}
        }
        return report;
    }

    let children_first = cache.folder_children(first_id, true);
    let children_second = cache.folder_children(second_id, true);

    let mut paired_second: HashSet<usize> = HashSet::new();
    let mut pairs = Vec::new();
    let mut unpaired_first = Vec::new();

    for (id_a, node_a) in &children_first {
        let candidate = children_second
            .iter()
            .enumerate()
            .find(|(i, (_, node_b))| !paired_second.contains(i) && are_paired(node_a, node_b));
        match candidate {
            Some((i, (id_b, node_b))) => {
                paired_second.insert(i);
                pairs.push(((id_a, node_a), (id_b, node_b)));
            }
            None => unpaired_first.push(id_a.clone()),
        }
    }

    report.only_first.extend(unpaired_first);
    report.only_second.extend(
        children_second
            .iter()
            .enumerate()
            .filter(|(i, _)| !paired_second.contains(i))
            .map(|(_, (id, _))| id.clone()),
    );

    for ((id_a, node_a), (id_b, node_b)) in pairs {
        report.absorb(compare(cache, (id_a.as_str(), node_a), (id_b.as_str(), node_b)));
    }

    report
}

fn print_section(cache: &NodeCache, title: &str, ids: &[String], stop_at: &str) {
    let mut rows: Vec<(String, &String)> = ids
        .iter()
        .map(|id| (cache.build_path(id, Some(stop_at)), id))
        .collect();
    rows.sort();

    println!("{}:", title);
    for (path, id) in rows {
        println!("    {:<120} ({})", path, id);
    }
    println!();
}

pub fn print_diff(cache: &NodeCache, first: &str, second: &str, report: &DiffReport) {
    let only_first: Vec<String> = report.only_first.iter().cloned().collect();
    let only_second: Vec<String> = report.only_second.iter().cloned().collect();

    print_section(cache, "Newer in first", &report.newer_first, first);
    print_section(cache, "Newer in second", &report.newer_second, second);
    print_section(cache, "Only in first", &only_first, first);
    print_section(cache, "Only in second", &only_second, second);
}

/// Fetch both subtrees and print the diff.
///
/// When either root is owned by a pool identity, switch to that identity and
/// list its whole corpus per owner; roots not covered by an owner listing are
/// fetched subtree-by-subtree, which is slow but makes sure nothing is
/// skipped on large listings.
pub async fn run(session: &mut Session, first: &str, second: &str) -> Result<()> {
    let fields = ["createdTime", "modifiedTime"];
    session.cache.fetch_files(&[first, second], &fields).await;

    let accounts = session.accounts();
    let mut owners: Vec<(String, String)> = Vec::new();
    for id in [first, second] {
        if let Some(node) = session.cache.node(id) {
            if let Some(owner) = node
                .owners
                .iter()
                .find(|o| accounts.contains(&o.email_address))
            {
                owners.push((id.to_string(), owner.email_address.clone()));
            }
        }
    }

    if let Some((_, email)) = owners.first() {
        // one of the roots is ours; fetching as its owner sees more
        let email = email.clone();
        session.switch_identity(&email)?;
    }

    for (_, email) in &owners {
        let query = format!("'{}' in owners", email);
        session.cache.fetch(Some(&query), false, &fields, false).await;
    }

    for id in [first, second] {
        if !owners.iter().any(|(owned_id, _)| owned_id == id) {
            session.cache.fetch_folder_and_descendants(id, &fields).await;
        }
    }

    println!("total files fetched: {}", session.cache.len());

    let first_node = session
        .cache
        .node(first)
        .ok_or_else(|| anyhow!("First directory {} could not be fetched", first))?;
    let second_node = session
        .cache
        .node(second)
        .ok_or_else(|| anyhow!("Second directory {} could not be fetched", second))?;

    let report = compare(
        &session.cache,
        (first, &first_node),
        (second, &second_node),
    );
    print_diff(&session.cache, first, second, &report);
    Ok(())
}
