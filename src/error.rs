//! Error taxonomy of the MFT engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The boot sector does not describe an NTFS volume.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// A raw read failed or came back short.
    #[error("Read of {length} bytes at offset 0x{offset:X} failed: {source}")]
    Io {
        offset: u64,
        length: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Bad fixup signature: {0}")]
    BadFixupSignature(String),

    #[error("Corrupt attribute in inode {inode}: {reason}")]
    CorruptAttribute { inode: u32, reason: String },

    #[error("Corrupt run list: {0}")]
    CorruptRunList(String),

    #[error("The $MFT record has no $BITMAP stream")]
    MissingBitmap,

    #[error("Loop detected in the directory tree starting at inode {inode}")]
    CyclicHierarchy { inode: u32 },

    #[error("Inode {inode} points to parent {parent} which is not a live node")]
    DanglingParent { inode: u32, parent: u32 },

    /// 48-bit inode numbers are refused to bound memory usage.
    #[error("Inode {inode} references parent {parent:#X} beyond the 32-bit inode range")]
    UnsupportedInodeWidth { inode: u32, parent: u64 },

    #[error("{0} were not retrieved, use the matching RetrieveMode")]
    DataNotRetrieved(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
