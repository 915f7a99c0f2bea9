//! Builds small in-memory NTFS volumes for the integration tests.
//!
//! Layout: 512 byte sectors, 4 KiB clusters, 1 KiB records, 64 clusters.
//! The $MFT data lives in two fragments, clusters 4..8 (records 0..16) and
//! clusters 20..22 (records 16..24). Its bitmap sits in cluster 30.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Cursor;

pub const SECTOR: usize = 512;
pub const CLUSTER: usize = 4096;
pub const RECORD: usize = 1024;
pub const CLUSTERS: usize = 64;
pub const MFT_RECORDS: usize = 24;
pub const BITMAP_LCN: u64 = 30;

pub const ATTR_STANDARD_INFORMATION: u32 = 0x10;
pub const ATTR_FILE_NAME: u32 = 0x30;
pub const ATTR_DATA: u32 = 0x80;
pub const ATTR_BITMAP: u32 = 0xB0;

pub const NS_POSIX: u8 = 0;
pub const NS_WIN32: u8 = 1;
pub const NS_DOS: u8 = 2;

/// 2020-01-01T00:00:00Z as a FILETIME.
pub const FILETIME_2020: u64 = 132_223_104_000_000_000;
pub const UNIX_2020: i64 = 1_577_836_800;

/// Encode `(length, lcn)` runs, `None` for a sparse run.
pub fn encode_runs(runs: &[(u64, Option<u64>)]) -> Vec<u8> {
    fn unsigned_width(v: u64) -> usize {
        (1..=8).find(|n| *n == 8 || v >> (8 * n) == 0).unwrap_or(8)
    }
    fn signed_width(v: i64) -> usize {
        (1..=8)
            .find(|n| {
                let shift = 64 - 8 * n;
                *n == 8 || (v << shift) >> shift == v
            })
            .unwrap_or(8)
    }

    let mut out = Vec::new();
    let mut prev: i64 = 0;
    for &(len, lcn) in runs {
        let len_sz = unsigned_width(len);
        let (ofs_sz, delta) = match lcn {
            Some(lcn) => {
                let delta = lcn as i64 - prev;
                prev = lcn as i64;
                (signed_width(delta), delta)
            }
            None => (0, 0),
        };
        out.push(((ofs_sz as u8) << 4) | len_sz as u8);
        out.extend_from_slice(&len.to_le_bytes()[..len_sz]);
        out.extend_from_slice(&delta.to_le_bytes()[..ofs_sz]);
    }
    out.push(0);
    out
}

fn utf16(name: &str) -> Vec<u8> {
    name.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn align8(n: usize) -> usize {
    n.div_ceil(8) * 8
}

pub fn resident(attr_type: u32, name: Option<&str>, value: &[u8]) -> Vec<u8> {
    let raw_name = name.map(utf16).unwrap_or_default();
    let value_offset = align8(0x18 + raw_name.len());
    let len = align8(value_offset + value.len());
    let mut a = vec![0u8; len];
    a[0..4].copy_from_slice(&attr_type.to_le_bytes());
    a[4..8].copy_from_slice(&(len as u32).to_le_bytes());
    a[9] = (raw_name.len() / 2) as u8;
    a[10..12].copy_from_slice(&0x18u16.to_le_bytes());
    a[0x10..0x14].copy_from_slice(&(value.len() as u32).to_le_bytes());
    a[0x14..0x16].copy_from_slice(&(value_offset as u16).to_le_bytes());
    a[0x18..0x18 + raw_name.len()].copy_from_slice(&raw_name);
    a[value_offset..value_offset + value.len()].copy_from_slice(value);
    a
}

pub fn non_resident(
    attr_type: u32,
    name: Option<&str>,
    lowest_vcn: u64,
    runs: &[(u64, Option<u64>)],
    real_size: u64,
) -> Vec<u8> {
    let raw_name = name.map(utf16).unwrap_or_default();
    let encoded = encode_runs(runs);
    let runs_offset = align8(0x40 + raw_name.len());
    let len = align8(runs_offset + encoded.len());
    let clusters: u64 = runs.iter().map(|r| r.0).sum();

    let mut a = vec![0u8; len];
    a[0..4].copy_from_slice(&attr_type.to_le_bytes());
    a[4..8].copy_from_slice(&(len as u32).to_le_bytes());
    a[8] = 1;
    a[9] = (raw_name.len() / 2) as u8;
    a[10..12].copy_from_slice(&0x40u16.to_le_bytes());
    a[0x10..0x18].copy_from_slice(&lowest_vcn.to_le_bytes());
    a[0x18..0x20].copy_from_slice(&(lowest_vcn + clusters).saturating_sub(1).to_le_bytes());
    a[0x20..0x22].copy_from_slice(&(runs_offset as u16).to_le_bytes());
    a[0x28..0x30].copy_from_slice(&(clusters * CLUSTER as u64).to_le_bytes());
    a[0x30..0x38].copy_from_slice(&real_size.to_le_bytes());
    a[0x38..0x40].copy_from_slice(&real_size.to_le_bytes());
    a[0x40..0x40 + raw_name.len()].copy_from_slice(&raw_name);
    a[runs_offset..runs_offset + encoded.len()].copy_from_slice(&encoded);
    a
}

pub fn std_info(file_attrs: u32, created: u64, modified: u64, accessed: u64) -> Vec<u8> {
    let mut v = vec![0u8; 0x48];
    v[0..8].copy_from_slice(&created.to_le_bytes());
    v[8..16].copy_from_slice(&modified.to_le_bytes());
    v[16..24].copy_from_slice(&modified.to_le_bytes());
    v[24..32].copy_from_slice(&accessed.to_le_bytes());
    v[32..36].copy_from_slice(&file_attrs.to_le_bytes());
    resident(ATTR_STANDARD_INFORMATION, None, &v)
}

pub fn file_name(parent: u64, name: &str, namespace: u8) -> Vec<u8> {
    let raw = utf16(name);
    let mut v = vec![0u8; 0x42 + raw.len()];
    // sequence number 1 in the upper 16 bits
    v[0..8].copy_from_slice(&(parent | (1u64 << 48)).to_le_bytes());
    v[0x40] = (raw.len() / 2) as u8;
    v[0x41] = namespace;
    v[0x42..].copy_from_slice(&raw);
    resident(ATTR_FILE_NAME, None, &v)
}

/// A FILE record under construction.
pub struct RecordBuilder {
    flags: u16,
    base: u64,
    attrs: Vec<u8>,
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self {
            flags: 0x0001,
            base: 0,
            attrs: Vec::new(),
        }
    }

    pub fn directory(mut self) -> Self {
        self.flags |= 0x0002;
        self
    }

    pub fn not_in_use(mut self) -> Self {
        self.flags &= !0x0001;
        self
    }

    pub fn extension_of(mut self, base: u64) -> Self {
        self.base = base;
        self
    }

    pub fn attr(mut self, bytes: Vec<u8>) -> Self {
        self.attrs.extend(bytes);
        self
    }

    pub fn named(self, parent: u64, name: &str) -> Self {
        self.attr(file_name(parent, name, NS_WIN32))
    }

    /// The record bytes with the update sequence applied, ready for disk.
    pub fn build(self) -> Vec<u8> {
        const USA_OFFSET: usize = 0x30;
        const USA_COUNT: usize = 1 + RECORD / SECTOR;
        const ATTRS_OFFSET: usize = 0x38;

        let mut r = vec![0u8; RECORD];
        r[0..4].copy_from_slice(b"FILE");
        r[4..6].copy_from_slice(&(USA_OFFSET as u16).to_le_bytes());
        r[6..8].copy_from_slice(&(USA_COUNT as u16).to_le_bytes());
        r[16..18].copy_from_slice(&1u16.to_le_bytes());
        r[18..20].copy_from_slice(&1u16.to_le_bytes());
        r[20..22].copy_from_slice(&(ATTRS_OFFSET as u16).to_le_bytes());
        r[22..24].copy_from_slice(&self.flags.to_le_bytes());
        let end = ATTRS_OFFSET + self.attrs.len();
        assert!(end + 8 <= RECORD - 2, "attributes do not fit in the record");
        r[ATTRS_OFFSET..end].copy_from_slice(&self.attrs);
        r[end..end + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        r[24..28].copy_from_slice(&((end + 8) as u32).to_le_bytes());
        r[28..32].copy_from_slice(&(RECORD as u32).to_le_bytes());
        r[32..40].copy_from_slice(&self.base.to_le_bytes());

        let usn = [0x01, 0x00];
        r[USA_OFFSET..USA_OFFSET + 2].copy_from_slice(&usn);
        for i in 1..USA_COUNT {
            let tail = i * SECTOR - 2;
            let slot = USA_OFFSET + 2 * i;
            let saved = [r[tail], r[tail + 1]];
            r[slot..slot + 2].copy_from_slice(&saved);
            r[tail..tail + 2].copy_from_slice(&usn);
        }
        r
    }
}

/// Byte offset of record `index` inside the image.
pub fn record_offset(index: usize) -> usize {
    assert!(index < MFT_RECORDS);
    if index < 16 {
        4 * CLUSTER + index * RECORD
    } else {
        20 * CLUSTER + (index - 16) * RECORD
    }
}

pub fn boot_sector() -> Vec<u8> {
    let mut s = vec![0u8; SECTOR];
    s[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
    s[3..11].copy_from_slice(b"NTFS    ");
    s[0x0B..0x0D].copy_from_slice(&(SECTOR as u16).to_le_bytes());
    s[0x0D] = (CLUSTER / SECTOR) as u8;
    s[0x15] = 0xF8;
    s[0x28..0x30].copy_from_slice(&((CLUSTERS * CLUSTER / SECTOR) as u64).to_le_bytes());
    s[0x30..0x38].copy_from_slice(&4u64.to_le_bytes());
    s[0x38..0x40].copy_from_slice(&2u64.to_le_bytes());
    s[0x40] = 0xF6;
    s[0x44] = 1;
    s[0x48..0x50].copy_from_slice(&0x1234_5678_9ABC_DEF0u64.to_le_bytes());
    s[510] = 0x55;
    s[511] = 0xAA;
    s
}

/// A volume assembled from records, with record 0 ($MFT) generated.
pub struct TestVolume {
    records: BTreeMap<usize, (Vec<u8>, bool)>,
    clusters: Vec<(u64, Vec<u8>)>,
    with_bitmap: bool,
    bitmap_runs: Vec<(u64, Option<u64>)>,
    truncated_runs: bool,
}

impl Default for TestVolume {
    fn default() -> Self {
        Self::new()
    }
}

impl TestVolume {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            clusters: Vec::new(),
            with_bitmap: true,
            bitmap_runs: vec![(1, Some(BITMAP_LCN))],
            truncated_runs: false,
        }
    }

    /// Place `record` in slot `index`, `live` sets its bitmap bit.
    pub fn with_record(mut self, index: usize, record: Vec<u8>, live: bool) -> Self {
        self.records.insert(index, (record, live));
        self
    }

    /// Write raw bytes at the start of cluster `lcn`.
    pub fn with_cluster(mut self, lcn: u64, bytes: Vec<u8>) -> Self {
        self.clusters.push((lcn, bytes));
        self
    }

    /// Leave the $BITMAP attribute out of the $MFT record.
    pub fn without_mft_bitmap(mut self) -> Self {
        self.with_bitmap = false;
        self
    }

    /// Describe the $MFT:$BITMAP data with `runs` instead of one cluster.
    pub fn with_mft_bitmap_runs(mut self, runs: &[(u64, Option<u64>)]) -> Self {
        self.bitmap_runs = runs.to_vec();
        self
    }

    /// Drop the second $MFT fragment from its run list while keeping the
    /// full data size.
    pub fn with_truncated_mft_runs(mut self) -> Self {
        self.truncated_runs = true;
        self
    }

    fn mft_record(&self) -> Vec<u8> {
        let runs: &[(u64, Option<u64>)] = if self.truncated_runs {
            &[(4, Some(4))]
        } else {
            &[(4, Some(4)), (2, Some(20))]
        };
        let mut rec = RecordBuilder::new()
            .attr(std_info(0x06, FILETIME_2020, FILETIME_2020, FILETIME_2020))
            .named(5, "$MFT")
            .attr(non_resident(
                ATTR_DATA,
                None,
                0,
                runs,
                (MFT_RECORDS * RECORD) as u64,
            ));
        if self.with_bitmap {
            rec = rec.attr(non_resident(
                ATTR_BITMAP,
                None,
                0,
                &self.bitmap_runs,
                (MFT_RECORDS / 8) as u64,
            ));
        }
        rec.build()
    }

    pub fn build(self) -> Cursor<Vec<u8>> {
        let mut image = vec![0u8; CLUSTERS * CLUSTER];
        image[..SECTOR].copy_from_slice(&boot_sector());

        let mft = self.mft_record();
        image[record_offset(0)..record_offset(0) + RECORD].copy_from_slice(&mft);

        let bitmap = BITMAP_LCN as usize * CLUSTER;
        image[bitmap] |= 1;
        for (&index, (record, live)) in &self.records {
            let at = record_offset(index);
            image[at..at + RECORD].copy_from_slice(record);
            if *live {
                image[bitmap + index / 8] |= 1 << (index % 8);
            }
        }
        for (lcn, bytes) in &self.clusters {
            let at = *lcn as usize * CLUSTER;
            image[at..at + bytes.len()].copy_from_slice(bytes);
        }
        Cursor::new(image)
    }
}

/// Root, `docs` (10) and `docs\a.txt` (20, two fragments plus a sparse
/// named stream).
pub fn sample_volume() -> TestVolume {
    TestVolume::new()
        .with_record(
            5,
            RecordBuilder::new()
                .directory()
                .attr(std_info(0x06, FILETIME_2020, FILETIME_2020, FILETIME_2020))
                .named(5, ".")
                .build(),
            true,
        )
        .with_record(
            10,
            RecordBuilder::new()
                .directory()
                .attr(std_info(0, FILETIME_2020, FILETIME_2020, FILETIME_2020))
                .named(5, "docs")
                .build(),
            true,
        )
        .with_record(
            20,
            RecordBuilder::new()
                .attr(std_info(
                    0x20,
                    FILETIME_2020,
                    FILETIME_2020 + 10_000_000,
                    FILETIME_2020 + 20_000_000,
                ))
                .attr(file_name(10, "A~1.TXT", NS_DOS))
                .named(10, "a.txt")
                .attr(non_resident(ATTR_DATA, None, 0, &[(1, Some(40)), (2, Some(50))], 12288))
                .attr(non_resident(ATTR_DATA, Some("zone"), 0, &[(2, None), (1, Some(60))], 12288))
                .build(),
            true,
        )
}
