//! The $MFT:$BITMAP usage bitmap, one bit per inode slot.

use log::debug;

use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::mft::AttributeType;
use crate::node::Stream;
use crate::pbs::DiskGeometry;
use crate::runlist::extents;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageBitmap {
    bytes: Vec<u8>,
}

impl UsageBitmap {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Whether the slot of `inode` holds a live record.
    pub fn is_set(&self, inode: u64) -> bool {
        self.bytes
            .get((inode >> 3) as usize)
            .is_some_and(|b| b & (1 << (inode & 7)) != 0)
    }

    pub fn bit_count(&self) -> u64 {
        self.bytes.len() as u64 * 8
    }

    pub fn live_count(&self) -> u64 {
        self.bytes.iter().map(|b| b.count_ones() as u64).sum()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Read the bitmap described by the $BITMAP stream of the $MFT record.
pub fn build_usage_bitmap<D: BlockDevice + ?Sized>(
    device: &mut D,
    geometry: &DiskGeometry,
    mft_streams: &[Stream],
) -> Result<UsageBitmap> {
    let stream = mft_streams
        .iter()
        .find(|s| s.kind == AttributeType::Bitmap)
        .ok_or(Error::MissingBitmap)?;

    let cluster = geometry.bytes_per_cluster;
    let overflow = || Error::CorruptRunList("$MFT bitmap run length overflows".into());
    let mut real_clusters = 0u64;
    for (_, lcn, len) in extents(&stream.fragments, 0) {
        if lcn.is_some() {
            real_clusters = real_clusters.checked_add(len).ok_or_else(overflow)?;
        }
    }
    let size = real_clusters.checked_mul(cluster).ok_or_else(overflow)?;
    // the bitmap cannot be larger than the volume holding it
    let volume_size = geometry.total_clusters.saturating_mul(cluster);
    if geometry.total_clusters > 0 && size > volume_size {
        return Err(Error::CorruptRunList(format!(
            "$MFT bitmap claims {} clusters on a volume of {}",
            real_clusters, geometry.total_clusters
        )));
    }
    let size = usize::try_from(size).map_err(|_| overflow())?;
    let mut bytes = vec![0u8; size];
    debug!(
        "$MFT bitmap spans {} clusters in {} fragments.",
        real_clusters,
        stream.fragments.len()
    );

    let mut filled = 0usize;
    for (_, lcn, len) in extents(&stream.fragments, 0) {
        let Some(lcn) = lcn else { continue };
        // bounded by `size` above
        let run_bytes = (len * cluster) as usize;
        let offset = lcn.checked_mul(cluster).ok_or_else(|| {
            Error::CorruptRunList(format!("$MFT bitmap LCN {} is out of range", lcn))
        })?;
        device.read_at(&mut bytes[filled..filled + run_bytes], offset)?;
        filled += run_bytes;
    }
    Ok(UsageBitmap::from_bytes(bytes))
}
