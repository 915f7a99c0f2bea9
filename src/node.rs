//! In-memory tables produced by the scan.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::mft::AttributeType;
use crate::runlist::Fragment;

/// Inode of the root directory.
pub const ROOT_DIRECTORY: u32 = 5;

bitflags! {
    /// File attribute flags as stored in $STANDARD_INFORMATION.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FileAttributes: u32 {
        const READ_ONLY           = 0x0000_0001;
        const HIDDEN              = 0x0000_0002;
        const SYSTEM              = 0x0000_0004;
        const DIRECTORY           = 0x0000_0010;
        const ARCHIVE             = 0x0000_0020;
        const DEVICE              = 0x0000_0040;
        const NORMAL              = 0x0000_0080;
        const TEMPORARY           = 0x0000_0100;
        const SPARSE_FILE         = 0x0000_0200;
        const REPARSE_POINT       = 0x0000_0400;
        const COMPRESSED          = 0x0000_0800;
        const OFFLINE             = 0x0000_1000;
        const NOT_CONTENT_INDEXED = 0x0000_2000;
        const ENCRYPTED           = 0x0000_4000;
        const INDEX_PRESENT       = 0x1000_0000;
        const INDEX_VIEW          = 0x2000_0000;
    }
}

bitflags! {
    /// Optional data to retrieve while scanning. Name, size, attributes and
    /// parent linkage are always retrieved.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RetrieveMode: u32 {
        const MINIMAL    = 0;
        /// Creation, last change and last access times.
        const TIMESTAMPS = 0b001;
        const STREAMS    = 0b010;
        /// On-disk layout of every stream. Implies `STREAMS`.
        const FRAGMENTS  = 0b100;
        const ALL = Self::TIMESTAMPS.bits() | Self::STREAMS.bits() | Self::FRAGMENTS.bits();
    }
}

impl RetrieveMode {
    pub fn streams(self) -> bool {
        self.intersects(Self::STREAMS | Self::FRAGMENTS)
    }

    pub fn fragments(self) -> bool {
        self.contains(Self::FRAGMENTS)
    }

    pub fn timestamps(self) -> bool {
        self.contains(Self::TIMESTAMPS)
    }
}

/// One MFT slot. Unused slots stay zeroed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub attributes: FileAttributes,
    pub parent_index: u32,
    pub size: u64,
    /// Index in the name table, 0 when the node has no name.
    pub name_index: u32,
}

impl Node {
    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }

    pub fn is_named(&self) -> bool {
        self.name_index != 0
    }
}

/// A non-resident attribute of a node, keyed by (type, name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub kind: AttributeType,
    pub name_index: u32,
    pub size: u64,
    /// Real clusters allocated to the stream.
    pub clusters: u64,
    pub fragments: Vec<Fragment>,
}

impl Stream {
    pub fn new(kind: AttributeType, name_index: u32, size: u64) -> Self {
        Self {
            kind,
            name_index,
            size,
            clusters: 0,
            fragments: Vec::new(),
        }
    }
}

/// Raw FILETIME values from $STANDARD_INFORMATION.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub creation: u64,
    pub last_change: u64,
    pub last_access: u64,
}
