//! Read-only views over the scanned tables.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;

use crate::NtfsReader;
use crate::error::{Error, Result};
use crate::mft::{AttributeType, filetime_to_datetime};
use crate::node::{FileAttributes, Node, Stream, Timestamps};
use crate::runlist::Fragment;

/// A live node of the volume.
#[derive(Clone, Copy)]
pub struct NodeView<'a> {
    reader: &'a NtfsReader,
    inode: u32,
}

impl<'a> NodeView<'a> {
    pub(crate) fn new(reader: &'a NtfsReader, inode: u32) -> Self {
        Self { reader, inode }
    }

    fn node(&self) -> &'a Node {
        &self.reader.tables.nodes[self.inode as usize]
    }

    pub fn index(&self) -> u32 {
        self.inode
    }

    pub fn parent_index(&self) -> u32 {
        self.node().parent_index
    }

    pub fn name(&self) -> Option<&'a str> {
        self.reader.tables.names.get(self.node().name_index)
    }

    pub fn full_name(&self) -> Result<Arc<str>> {
        self.reader.full_name(self.inode)
    }

    pub fn size(&self) -> u64 {
        self.node().size
    }

    pub fn attributes(&self) -> FileAttributes {
        self.node().attributes
    }

    pub fn is_directory(&self) -> bool {
        self.node().is_directory()
    }

    pub fn streams(&self) -> Result<Vec<StreamView<'a>>> {
        let reader = self.reader;
        let table = reader
            .tables
            .streams
            .as_ref()
            .ok_or(Error::DataNotRetrieved("Streams"))?;
        Ok(table[self.inode as usize]
            .iter()
            .map(|stream| StreamView { reader, stream })
            .collect())
    }

    fn timestamps(&self) -> Result<&'a Timestamps> {
        self.reader
            .tables
            .timestamps
            .as_ref()
            .map(|t| &t[self.inode as usize])
            .ok_or(Error::DataNotRetrieved("Timestamps"))
    }

    pub fn creation_time(&self) -> Result<DateTime<Utc>> {
        Ok(filetime_to_datetime(self.timestamps()?.creation).unwrap_or_default())
    }

    pub fn last_change_time(&self) -> Result<DateTime<Utc>> {
        Ok(filetime_to_datetime(self.timestamps()?.last_change).unwrap_or_default())
    }

    pub fn last_access_time(&self) -> Result<DateTime<Utc>> {
        Ok(filetime_to_datetime(self.timestamps()?.last_access).unwrap_or_default())
    }

    /// JSON summary, optional data included when it was retrieved.
    pub fn to_json(&self) -> Value {
        let mut v = json!({
            "inode": self.inode,
            "parent": self.parent_index(),
            "name": self.name(),
            "path": self.full_name().ok().as_deref(),
            "size": self.size(),
            "attributes": self.attributes(),
        });
        if let Ok(created) = self.creation_time() {
            v["created"] = json!(created.to_rfc3339());
            v["changed"] = json!(self.last_change_time().ok().map(|t| t.to_rfc3339()));
            v["accessed"] = json!(self.last_access_time().ok().map(|t| t.to_rfc3339()));
        }
        if let Ok(streams) = self.streams() {
            v["streams"] = streams.iter().map(StreamView::to_json).collect();
        }
        v
    }
}

impl fmt::Debug for NodeView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeView")
            .field("inode", &self.inode)
            .field("name", &self.name())
            .field("size", &self.size())
            .finish()
    }
}

impl PartialEq for NodeView<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.reader, other.reader) && self.inode == other.inode
    }
}

/// A stream of a node.
#[derive(Clone, Copy)]
pub struct StreamView<'a> {
    reader: &'a NtfsReader,
    stream: &'a Stream,
}

impl<'a> StreamView<'a> {
    pub fn name(&self) -> Option<&'a str> {
        self.reader.tables.names.get(self.stream.name_index)
    }

    pub fn kind(&self) -> AttributeType {
        self.stream.kind
    }

    pub fn size(&self) -> u64 {
        self.stream.size
    }

    /// Real clusters allocated on disk, requires the fragments to be retrieved.
    pub fn clusters(&self) -> u64 {
        self.stream.clusters
    }

    pub fn fragments(&self) -> Result<&'a [Fragment]> {
        if !self.reader.options.retrieve.fragments() {
            return Err(Error::DataNotRetrieved("Fragments"));
        }
        Ok(&self.stream.fragments)
    }

    pub fn to_json(&self) -> Value {
        let mut v = json!({
            "type": format!("{:?}", self.kind()),
            "name": self.name(),
            "size": self.size(),
        });
        if let Ok(fragments) = self.fragments() {
            v["clusters"] = json!(self.clusters());
            v["fragments"] = json!(fragments);
        }
        v
    }
}

impl fmt::Debug for StreamView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamView")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .field("size", &self.size())
            .finish()
    }
}
