//! Sequential scan of the whole MFT.
//!
//! The scan goes through a fixed sequence of phases:
//! 1. read and fix up record 0 ($MFT itself) to learn where the table lives,
//! 2. read the usage bitmap ($MFT:$BITMAP),
//! 3. bound the inode range by the bitmap and the $MFT data size,
//! 4. walk every in-use slot, reading the table in chunks that follow the
//!    $MFT fragments forward.

use log::{debug, info, warn};

use crate::bitmap::{UsageBitmap, build_usage_bitmap};
use crate::config::ScanOptions;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::fixup::apply_fixups;
use crate::mft::AttributeType;
use crate::names::{NameTable, NameTableBuilder};
use crate::node::{Node, RetrieveMode, Stream, Timestamps};
use crate::pbs::DiskGeometry;
use crate::process::AttributeProcessor;
use crate::runlist::{Fragment, extents};

/// Everything the scan produced. Immutable once returned.
#[derive(Debug, Clone)]
pub struct MftTables {
    /// One entry per inode slot, zeroed for unused slots.
    pub nodes: Vec<Node>,
    /// Streams per inode, present with `RetrieveMode::STREAMS`.
    pub streams: Option<Vec<Vec<Stream>>>,
    /// Present with `RetrieveMode::TIMESTAMPS`.
    pub timestamps: Option<Vec<Timestamps>>,
    pub names: NameTable,
    pub bitmap: UsageBitmap,
}

/// Reads byte ranges of the $MFT data stream through its fragments.
///
/// Requests must come in ascending order: the fragment cursor only moves
/// forward.
struct MftDataReader {
    /// (first stream byte, end stream byte, first disk byte) of every run,
    /// no disk byte for a sparse run.
    runs: Vec<(u64, u64, Option<u64>)>,
    cursor: usize,
}

impl MftDataReader {
    fn new(fragments: &[Fragment], bytes_per_cluster: u64) -> Result<Self> {
        let to_bytes = |clusters: u64| {
            clusters.checked_mul(bytes_per_cluster).ok_or_else(|| {
                Error::CorruptRunList(format!(
                    "$MFT cluster {} lies beyond the addressable range",
                    clusters
                ))
            })
        };
        let runs = extents(fragments, 0)
            .map(|(vcn, lcn, len)| -> Result<(u64, u64, Option<u64>)> {
                let start = to_bytes(vcn)?;
                let end = to_bytes(vcn.checked_add(len).ok_or_else(|| {
                    Error::CorruptRunList("$MFT run length overflows".into())
                })?)?;
                Ok((start, end, lcn.map(to_bytes).transpose()?))
            })
            .collect::<Result<_>>()?;
        Ok(Self { runs, cursor: 0 })
    }

    /// Fill `buf` with stream bytes starting at `offset`. Returns how many
    /// bytes are backed by fragments, fewer than requested when the
    /// fragment list ends first.
    fn read<D: BlockDevice + ?Sized>(
        &mut self,
        device: &mut D,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize> {
        let mut filled = 0usize;
        while filled < buf.len() {
            let pos = offset.saturating_add(filled as u64);
            while self
                .runs
                .get(self.cursor)
                .is_some_and(|(_, end, _)| *end <= pos)
            {
                self.cursor += 1;
            }
            let Some(&(start, end, disk)) = self.runs.get(self.cursor) else {
                break;
            };
            if pos < start {
                break;
            }
            let piece = (end - pos).min((buf.len() - filled) as u64) as usize;
            let dst = &mut buf[filled..filled + piece];
            match disk {
                Some(disk) => {
                    let at = disk.checked_add(pos - start).ok_or_else(|| {
                        Error::CorruptRunList("$MFT fragment ends past the addressable range".into())
                    })?;
                    device.read_at(dst, at)?
                }
                None => dst.fill(0),
            }
            filled += piece;
        }
        Ok(filled)
    }
}

pub struct MftScanner<'a, D: BlockDevice + ?Sized> {
    device: &'a mut D,
    geometry: DiskGeometry,
    mode: RetrieveMode,
    chunk_size: usize,
    on_bitmap: Option<Box<dyn FnMut(&UsageBitmap) + 'a>>,
}

impl<'a, D: BlockDevice + ?Sized> MftScanner<'a, D> {
    pub fn new(device: &'a mut D, geometry: DiskGeometry, options: &ScanOptions) -> Self {
        Self {
            device,
            geometry,
            mode: options.retrieve,
            chunk_size: options.chunk_size,
            on_bitmap: None,
        }
    }

    /// Called once the usage bitmap is known, before the records are read.
    pub fn on_bitmap(mut self, hook: impl FnMut(&UsageBitmap) + 'a) -> Self {
        self.on_bitmap = Some(Box::new(hook));
        self
    }

    pub fn run(mut self) -> Result<MftTables> {
        let record_size = self.geometry.bytes_per_mft_record as usize;
        let sector_size = self.geometry.bytes_per_sector as usize;
        let mut names = NameTableBuilder::new();

        // $MFT record
        let mut record = vec![0u8; record_size];
        self.device.read_at(&mut record, self.geometry.mft_offset())?;
        if !apply_fixups(&mut record, sector_size)? {
            return Err(Error::InvalidFormat(
                "the first $MFT record is not a FILE record".into(),
            ));
        }
        let mft = AttributeProcessor::new(&mut names, self.mode)
            .process_record(&record, 0, true)?
            .ok_or_else(|| Error::InvalidFormat("the $MFT record is not in use".into()))?;

        // usage bitmap
        let bitmap = build_usage_bitmap(self.device, &self.geometry, &mft.streams)?;
        info!(
            "$MFT bitmap read, {} of {} slots in use.",
            bitmap.live_count(),
            bitmap.bit_count()
        );
        if let Some(hook) = self.on_bitmap.as_mut() {
            hook(&bitmap);
        }

        // bounds
        let data = mft
            .streams
            .iter()
            .find(|s| s.kind == AttributeType::Data && s.name_index == 0)
            .ok_or_else(|| Error::CorruptAttribute {
                inode: 0,
                reason: "the $MFT record has no non-resident $DATA attribute".into(),
            })?;
        let max_inode = bitmap
            .bit_count()
            .min(data.size / record_size as u64)
            .min(u32::MAX as u64)
            .max(1);
        info!("Scanning {} inode slots.", max_inode);

        let mut nodes = vec![Node::default(); max_inode as usize];
        let mut streams = self.mode.streams().then(|| vec![Vec::new(); max_inode as usize]);
        let mut timestamps = self
            .mode
            .timestamps()
            .then(|| vec![Timestamps::default(); max_inode as usize]);

        nodes[0] = mft.node;
        if let (Some(table), Some(ts)) = (timestamps.as_mut(), mft.timestamps) {
            table[0] = ts;
        }
        let mut reader = MftDataReader::new(&data.fragments, self.geometry.bytes_per_cluster)?;
        if let Some(table) = streams.as_mut() {
            table[0] = mft.streams;
        }

        // records
        let records_per_chunk = (self.chunk_size / record_size).max(1) as u64;
        let mut chunk = vec![0u8; records_per_chunk as usize * record_size];
        let mut processor = AttributeProcessor::new(&mut names, self.mode);
        let (mut block_start, mut block_end) = (0u64, 0u64);
        let mut bytes_read = 0u64;
        let mut live = 1usize;

        for inode in 1..max_inode {
            if !bitmap.is_set(inode) {
                continue;
            }

            if inode >= block_end {
                let wanted = records_per_chunk.min(max_inode - inode) as usize * record_size;
                let got = reader.read(
                    self.device,
                    &mut chunk[..wanted],
                    inode * record_size as u64,
                )?;
                let records = (got / record_size) as u64;
                if records == 0 {
                    warn!(
                        "The $MFT fragments end before inode {} (expected {}), stopping early.",
                        inode, max_inode
                    );
                    break;
                }
                block_start = inode;
                block_end = inode + records;
                bytes_read += (records as usize * record_size) as u64;
                debug!("Read inodes {}..{} of the MFT.", block_start, block_end);
            }

            let off = (inode - block_start) as usize * record_size;
            let buf = &mut chunk[off..off + record_size];
            apply_fixups(buf, sector_size)?;

            let Some(rec) = processor.process_record(buf, inode as u32, false)? else {
                continue;
            };
            nodes[inode as usize] = rec.node;
            if let Some(table) = streams.as_mut() {
                table[inode as usize] = rec.streams;
            }
            if let (Some(table), Some(ts)) = (timestamps.as_mut(), rec.timestamps) {
                table[inode as usize] = ts;
            }
            live += 1;
        }

        let names = names.finish();
        info!(
            "MFT scan done: {} bytes read, {} live records, {} distinct names.",
            bytes_read,
            live,
            names.len()
        );

        Ok(MftTables {
            nodes,
            streams,
            timestamps,
            names,
            bitmap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn data_reader_follows_fragments_and_sparse_runs() {
        // clusters of 4 bytes, cluster n filled with n
        let image: Vec<u8> = (0u8..16).flat_map(|c| [c; 4]).collect();
        let fragments = [
            Fragment { lcn: Some(10), next_vcn: 2 },
            Fragment { lcn: None, next_vcn: 3 },
            Fragment { lcn: Some(2), next_vcn: 4 },
        ];
        let mut reader = MftDataReader::new(&fragments, 4).unwrap();
        let mut dev = Cursor::new(image);

        let mut buf = [0xFFu8; 10];
        assert_eq!(reader.read(&mut dev, &mut buf, 2).unwrap(), 10);
        assert_eq!(buf, [10, 10, 11, 11, 11, 11, 0, 0, 0, 0]);

        let mut tail = [0xFFu8; 8];
        assert_eq!(reader.read(&mut dev, &mut tail, 12).unwrap(), 4);
        assert_eq!(&tail[..4], &[2, 2, 2, 2]);

        assert_eq!(reader.read(&mut dev, &mut tail, 16).unwrap(), 0);
    }

    #[test]
    fn data_reader_refuses_runs_beyond_u64() {
        let fragments = [Fragment { lcn: Some(u64::MAX / 2), next_vcn: 1 }];
        assert!(matches!(
            MftDataReader::new(&fragments, 4096),
            Err(Error::CorruptRunList(_))
        ));
        let fragments = [Fragment { lcn: Some(1), next_vcn: u64::MAX / 2 }];
        assert!(matches!(
            MftDataReader::new(&fragments, 4096),
            Err(Error::CorruptRunList(_))
        ));
    }
}
