//! Decoding of the mapping pairs ("data runs") of non-resident attributes.
//!
//! Each run starts with a header byte: the low nibble is the byte width of the
//! run length, the high nibble the byte width of the signed LCN delta. A zero
//! header byte ends the list. A delta of zero marks a sparse run which has no
//! clusters on disk but still advances the VCN.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A contiguous extent of an attribute's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Fragment {
    /// First logical cluster on disk, `None` for a sparse run.
    pub lcn: Option<u64>,
    /// VCN right after the end of this run.
    pub next_vcn: u64,
}

impl Fragment {
    pub fn is_virtual(&self) -> bool {
        self.lcn.is_none()
    }

    pub fn lcn(&self) -> Option<u64> {
        self.lcn
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunList {
    pub fragments: Vec<Fragment>,
    /// Clusters actually allocated on disk (sparse runs excluded).
    pub clusters: u64,
}

/// Read `size` bytes little-endian starting at `pos`.
fn read_le(raw: &[u8], pos: usize, size: usize, field: &str) -> Result<u64> {
    if size > 8 {
        return Err(Error::CorruptRunList(format!(
            "{} field of {} bytes at offset {}",
            field, size, pos
        )));
    }
    let bytes = raw.get(pos..pos + size).ok_or_else(|| {
        Error::CorruptRunList(format!(
            "{} field at offset {} runs past the {} byte run list",
            field,
            pos,
            raw.len()
        ))
    })?;
    Ok(bytes
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | (*b as u64) << (8 * i)))
}

/// Decode a run list whose first run starts at `starting_vcn`.
pub fn decode_run_list(raw: &[u8], starting_vcn: u64) -> Result<RunList> {
    let mut out = RunList::default();
    let mut pos = 0usize;
    let mut lcn: i64 = 0;
    let mut vcn = starting_vcn;

    while pos < raw.len() && raw[pos] != 0 {
        let hdr = raw[pos];
        pos += 1;
        let len_sz = (hdr & 0x0F) as usize;
        let ofs_sz = (hdr >> 4) as usize;

        let run_len = read_le(raw, pos, len_sz, "length")?;
        pos += len_sz;

        let mut ofs = read_le(raw, pos, ofs_sz, "offset")? as i64;
        // sign-extend negative deltas
        if ofs_sz > 0 && ofs_sz < 8 && raw[pos + ofs_sz - 1] & 0x80 != 0 {
            ofs |= !0i64 << (ofs_sz * 8);
        }
        pos += ofs_sz;

        vcn = vcn
            .checked_add(run_len)
            .ok_or_else(|| Error::CorruptRunList("VCN overflow".into()))?;

        if ofs == 0 {
            out.fragments.push(Fragment {
                lcn: None,
                next_vcn: vcn,
            });
            continue;
        }

        lcn = lcn
            .checked_add(ofs)
            .filter(|l| *l >= 0)
            .ok_or_else(|| Error::CorruptRunList(format!("LCN delta {} out of range", ofs)))?;
        out.clusters += run_len;
        out.fragments.push(Fragment {
            lcn: Some(lcn as u64),
            next_vcn: vcn,
        });
    }
    Ok(out)
}

/// Iterate `(vcn, lcn, length)` for every run of `fragments`.
pub fn extents(fragments: &[Fragment], starting_vcn: u64) -> impl Iterator<Item = (u64, Option<u64>, u64)> + '_ {
    fragments.iter().scan(starting_vcn, |vcn, f| {
        let start = *vcn;
        *vcn = f.next_vcn;
        Some((start, f.lcn, f.next_vcn.saturating_sub(start)))
    })
}
