//! Grouping helpers over the nodes returned by a lookup.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::query::NodeView;

/// Group nodes by the fragment count of their first stream, keeping counts
/// of at least `minimum`. Nodes without a stream are skipped.
///
/// Fails with `DataNotRetrieved` unless the scan retrieved fragments.
pub fn aggregate_by_fragments<'a>(
    nodes: impl IntoIterator<Item = NodeView<'a>>,
    minimum: usize,
) -> Result<BTreeMap<usize, Vec<NodeView<'a>>>> {
    let mut groups: BTreeMap<usize, Vec<NodeView<'a>>> = BTreeMap::new();
    for node in nodes {
        let streams = node.streams()?;
        let Some(first) = streams.first() else {
            continue;
        };
        let count = first.fragments()?.len();
        if count >= minimum {
            groups.entry(count).or_default().push(node);
        }
    }
    Ok(groups)
}

/// Group files (directories excluded) by size, keeping sizes of at least
/// `minimum` bytes.
pub fn aggregate_by_size<'a>(
    nodes: impl IntoIterator<Item = NodeView<'a>>,
    minimum: u64,
) -> BTreeMap<u64, Vec<NodeView<'a>>> {
    let mut groups: BTreeMap<u64, Vec<NodeView<'a>>> = BTreeMap::new();
    for node in nodes
        .into_iter()
        .filter(|n| !n.is_directory() && n.size() >= minimum)
    {
        groups.entry(node.size()).or_default().push(node);
    }
    groups
}
