//! Short-name resolution over the live node table.
//!
//! Queries resolve through tiers: canonical node id, exact short-name
//! match, unique prefix, then substring across short and long names. An
//! ambiguous query yields up to six suggestions.

use crate::radio::RadioLink;
use crate::types::{clean_text, norm_short, NodeEntry, NodeId};

/// Maximum disambiguation suggestions returned to the user.
pub const MAX_SUGGESTIONS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// One node matched.
    Hit(NodeEntry),
    /// Several candidates survived; pick one and retry.
    Ambiguous(Vec<NodeEntry>),
    /// Nothing matched at all.
    NotFound,
}

/// Clean, deduped, stably sorted snapshot of the live node table.
/// Sort key is (normalized short name, node id) so repeated queries see the
/// same ordering.
pub fn collect_nodes(link: &dyn RadioLink) -> Vec<NodeEntry> {
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<NodeEntry> = Vec::new();
    for raw in link.nodes() {
        if !seen.insert(raw.nid) {
            continue;
        }
        let mut entry = raw;
        entry.short = clean_text(&entry.short);
        if entry.short.is_empty() {
            entry.short = "?".to_string();
        }
        entry.long = clean_text(&entry.long);
        out.push(entry);
    }
    out.sort_by(|a, b| {
        (norm_short(&a.short), a.nid).cmp(&(norm_short(&b.short), b.nid))
    });
    out
}

/// Resolve a user-supplied identifier against a node snapshot.
pub fn resolve(query: &str, nodes: &[NodeEntry]) -> Resolution {
    // canonical id short-circuit
    if query.trim().starts_with('!') {
        if let Ok(nid) = query.parse::<NodeId>() {
            let entry = nodes
                .iter()
                .find(|n| n.nid == nid)
                .cloned()
                .unwrap_or_else(|| NodeEntry::new(nid, "?", ""));
            return Resolution::Hit(entry);
        }
        return Resolution::NotFound;
    }

    let q = norm_short(query);
    if q.is_empty() {
        return Resolution::NotFound;
    }

    let exact: Vec<&NodeEntry> = nodes.iter().filter(|n| norm_short(&n.short) == q).collect();
    if let Some(first) = exact.first() {
        return Resolution::Hit((*first).clone());
    }

    let pref: Vec<&NodeEntry> = nodes
        .iter()
        .filter(|n| norm_short(&n.short).starts_with(&q))
        .collect();
    match pref.len() {
        1 => return Resolution::Hit(pref[0].clone()),
        n if n > 1 => {
            return Resolution::Ambiguous(
                pref.into_iter().take(MAX_SUGGESTIONS).cloned().collect(),
            )
        }
        _ => {}
    }

    let cont: Vec<&NodeEntry> = nodes
        .iter()
        .filter(|n| {
            norm_short(&n.short).contains(&q) || norm_short(&n.long).contains(&q)
        })
        .collect();
    match cont.len() {
        0 => Resolution::NotFound,
        1 => Resolution::Hit(cont[0].clone()),
        _ => Resolution::Ambiguous(cont.into_iter().take(MAX_SUGGESTIONS).cloned().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(nid: u32, short: &str, long: &str) -> NodeEntry {
        NodeEntry::new(NodeId(nid), short, long)
    }

    fn fleet() -> Vec<NodeEntry> {
        vec![
            entry(0x1, "alfa", "Alfa Station"),
            entry(0x2, "beta", "Beta Relay"),
            entry(0x3, "bet2", "Backup Beta"),
            entry(0x4, "zeta", "Hilltop"),
        ]
    }

    #[test]
    fn canonical_id_resolves_to_itself() {
        let nodes = fleet();
        match resolve("!00000004", &nodes) {
            Resolution::Hit(n) => assert_eq!(n.nid, NodeId(4)),
            other => panic!("{:?}", other),
        }
        // ids not in the table still resolve
        match resolve("!deadbeef", &nodes) {
            Resolution::Hit(n) => {
                assert_eq!(n.nid, NodeId(0xdeadbeef));
                assert_eq!(n.short, "?");
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn exact_match_beats_prefix() {
        let mut nodes = fleet();
        nodes.push(entry(0x5, "bet", "Exactly Bet"));
        match resolve("bet", &nodes) {
            Resolution::Hit(n) => assert_eq!(n.nid, NodeId(5)),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn unique_prefix_resolves() {
        match resolve("ze", &fleet()) {
            Resolution::Hit(n) => assert_eq!(n.short, "zeta"),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn ambiguous_prefix_suggests() {
        match resolve("be", &fleet()) {
            Resolution::Ambiguous(s) => assert_eq!(s.len(), 2),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn contains_searches_long_names_too() {
        match resolve("hilltop", &fleet()) {
            Resolution::Hit(n) => assert_eq!(n.short, "zeta"),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn nothing_matches() {
        assert_eq!(resolve("quux", &fleet()), Resolution::NotFound);
        assert_eq!(resolve("!!", &fleet()), Resolution::NotFound);
        assert_eq!(resolve("  ", &fleet()), Resolution::NotFound);
    }

    #[test]
    fn normalization_ignores_case_and_punctuation() {
        match resolve("ZETA!", &fleet()) {
            Resolution::Hit(n) => assert_eq!(n.short, "zeta"),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn suggestions_are_capped() {
        let nodes: Vec<NodeEntry> = (0..10)
            .map(|i| entry(i + 1, &format!("node{}", i), ""))
            .collect();
        match resolve("node", &nodes) {
            Resolution::Ambiguous(s) => assert_eq!(s.len(), MAX_SUGGESTIONS),
            other => panic!("{:?}", other),
        }
    }
}
