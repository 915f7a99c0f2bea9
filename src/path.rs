//! Full path reconstruction from parent links.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};
use crate::names::NameTable;
use crate::node::{Node, ROOT_DIRECTORY};

pub const PATH_SEPARATOR: char = '\\';

/// Memoised `inode -> full path` resolution.
///
/// The cache is written with `OnceLock::set` after the path has been built, so
/// concurrent resolutions of the same node never wait on each other: they
/// compute the same value and the first write is kept.
#[derive(Debug)]
pub struct PathResolver {
    volume_label: String,
    cache: Vec<OnceLock<Arc<str>>>,
}

impl PathResolver {
    pub fn new(volume_label: &str, node_count: usize) -> Self {
        Self {
            volume_label: volume_label.trim_end_matches(PATH_SEPARATOR).to_owned(),
            cache: (0..node_count).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn full_name(&self, nodes: &[Node], names: &NameTable, inode: u32) -> Result<Arc<str>> {
        let slot = self.cache.get(inode as usize);
        if let Some(path) = slot.and_then(OnceLock::get) {
            return Ok(path.clone());
        }
        let path: Arc<str> = self.build(nodes, names, inode)?.into();
        if let Some(slot) = slot {
            let _ = slot.set(path.clone());
        }
        Ok(path)
    }

    fn build(&self, nodes: &[Node], names: &NameTable, inode: u32) -> Result<String> {
        // a parent must be a live node, not an empty slot
        let node_at = |i: u32, child: u32| {
            nodes
                .get(i as usize)
                .filter(|n| i == child || i == ROOT_DIRECTORY || n.is_named())
                .ok_or(Error::DanglingParent {
                    inode: child,
                    parent: i,
                })
        };

        let mut stack = vec![inode];
        if inode != ROOT_DIRECTORY {
            let mut visited = HashSet::from([inode]);
            let mut current = inode;
            loop {
                let parent = node_at(current, current)?.parent_index;
                if parent == ROOT_DIRECTORY {
                    break;
                }
                node_at(parent, current)?;
                // A chain longer than the table cannot end at the root.
                if !visited.insert(parent) || visited.len() > nodes.len() {
                    return Err(Error::CyclicHierarchy { inode });
                }
                stack.push(parent);
                current = parent;
            }
        }

        let mut path = self.volume_label.clone();
        if inode == ROOT_DIRECTORY {
            path.push(PATH_SEPARATOR);
            return Ok(path);
        }
        while let Some(i) = stack.pop() {
            path.push(PATH_SEPARATOR);
            path.push_str(names.get(nodes[i as usize].name_index).unwrap_or_default());
        }
        Ok(path)
    }
}
