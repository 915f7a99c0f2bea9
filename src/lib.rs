// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

//! Rebuild every file and directory of an NTFS volume from its Master File
//! Table, read straight from the raw partition.
//!
//! ```no_run
//! use exhume_mft::{NtfsReader, RetrieveMode, ScanOptions};
//!
//! let mut volume = std::fs::File::open("/dev/sdb1")?;
//! let reader = NtfsReader::new(&mut volume, ScanOptions::new(RetrieveMode::STREAMS))?;
//! for node in reader.lookup("\\Windows") {
//!     let node = node?;
//!     println!("{} {}", node.full_name()?, node.size());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use log::info;
use rayon::prelude::*;
use std::sync::Arc;

pub mod aggregate;
pub mod bitmap;
pub mod config;
pub mod device;
pub mod error;
pub mod fixup;
pub mod mft;
pub mod names;
pub mod node;
pub mod path;
pub mod pbs;
pub mod process;
pub mod query;
pub mod runlist;
pub mod scanner;

pub use bitmap::UsageBitmap;
pub use config::ScanOptions;
pub use device::BlockDevice;
pub use error::{Error, Result};
pub use node::{FileAttributes, Node, ROOT_DIRECTORY, RetrieveMode, Stream};
pub use pbs::DiskGeometry;
pub use query::{NodeView, StreamView};
pub use runlist::Fragment;

use path::PathResolver;
use scanner::{MftScanner, MftTables};

/// The metadata of a whole NTFS volume, built by one scan of its MFT.
///
/// Once built the reader is immutable and can be shared between threads.
#[derive(Debug)]
pub struct NtfsReader {
    geometry: DiskGeometry,
    pub(crate) options: ScanOptions,
    pub(crate) tables: MftTables,
    paths: PathResolver,
}

impl NtfsReader {
    /// Scan the volume behind `device`.
    pub fn new<D: BlockDevice + ?Sized>(device: &mut D, options: ScanOptions) -> Result<Self> {
        Self::with_bitmap_hook(device, options, |_| {})
    }

    /// Like [`NtfsReader::new`], `hook` runs as soon as the usage bitmap has
    /// been read and before the records are.
    pub fn with_bitmap_hook<D: BlockDevice + ?Sized>(
        device: &mut D,
        options: ScanOptions,
        hook: impl FnMut(&UsageBitmap),
    ) -> Result<Self> {
        let geometry = DiskGeometry::read(device)?;
        info!(
            "NTFS volume: {} bytes per cluster, {} bytes per MFT record, $MFT at cluster {}.",
            geometry.bytes_per_cluster, geometry.bytes_per_mft_record, geometry.mft_start_lcn
        );
        let tables = MftScanner::new(device, geometry, &options)
            .on_bitmap(hook)
            .run()?;
        let paths = PathResolver::new(&options.volume_label, tables.nodes.len());
        Ok(Self {
            geometry,
            options,
            tables,
            paths,
        })
    }

    pub fn geometry(&self) -> &DiskGeometry {
        &self.geometry
    }

    pub fn retrieve_mode(&self) -> RetrieveMode {
        self.options.retrieve
    }

    /// Raw $MFT:$BITMAP bytes, one bit per inode.
    pub fn volume_bitmap(&self) -> &[u8] {
        self.tables.bitmap.as_bytes()
    }

    /// Number of inode slots, used or not.
    pub fn node_count(&self) -> usize {
        self.tables.nodes.len()
    }

    pub fn tables(&self) -> &MftTables {
        &self.tables
    }

    /// View of `inode` when it holds a named node.
    pub fn node(&self, inode: u32) -> Option<NodeView<'_>> {
        self.tables
            .nodes
            .get(inode as usize)
            .filter(|n| n.is_named())
            .map(|_| NodeView::new(self, inode))
    }

    /// Every named node, in inode order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeView<'_>> {
        self.tables
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_named())
            .map(|(i, _)| NodeView::new(self, i as u32))
    }

    pub(crate) fn full_name(&self, inode: u32) -> Result<Arc<str>> {
        self.paths
            .full_name(&self.tables.nodes, &self.tables.names, inode)
    }

    /// Nodes whose full path starts with `prefix`, ignoring case.
    ///
    /// Paths are resolved lazily as the iterator advances.
    pub fn lookup<'s>(&'s self, prefix: &str) -> impl Iterator<Item = Result<NodeView<'s>>> + use<'s> {
        let prefix = prefix.to_lowercase();
        self.nodes()
            .filter_map(move |node| match node.full_name() {
                Ok(path) => path.to_lowercase().starts_with(&prefix).then_some(Ok(node)),
                Err(e) => Some(Err(e)),
            })
    }

    /// Parallel version of [`NtfsReader::lookup`], results in inode order.
    pub fn par_lookup(&self, prefix: &str) -> Result<Vec<NodeView<'_>>> {
        let prefix = prefix.to_lowercase();
        self.tables
            .nodes
            .par_iter()
            .enumerate()
            .filter(|(_, n)| n.is_named())
            .filter_map(|(i, _)| {
                let node = NodeView::new(self, i as u32);
                match node.full_name() {
                    Ok(path) => path.to_lowercase().starts_with(&prefix).then_some(Ok(node)),
                    Err(e) => Some(Err(e)),
                }
            })
            .collect()
    }
}
