//! Update sequence array handling.
//!
//! When NTFS writes a multi-sector record it replaces the last two bytes of
//! every sector with the update sequence number and keeps the real bytes in the
//! update sequence array. They have to be put back before anything in the
//! record can be trusted.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

pub const FILE_SIGNATURE: &[u8; 4] = b"FILE";

/// Check every sector tail of `buf` against the update sequence number and
/// restore the original bytes.
///
/// Returns `Ok(false)` and leaves the buffer untouched when it does not hold a
/// FILE record.
pub fn apply_fixups(buf: &mut [u8], bytes_per_sector: usize) -> Result<bool> {
    if buf.len() < 8 || &buf[0..4] != FILE_SIGNATURE {
        return Ok(false);
    }
    let usa_offset = LittleEndian::read_u16(&buf[4..6]) as usize;
    let usa_count = LittleEndian::read_u16(&buf[6..8]) as usize;

    if usa_count == 0 {
        return Ok(true);
    }
    if usa_offset + 2 * usa_count > buf.len() {
        return Err(Error::BadFixupSignature(format!(
            "update sequence array ({} entries at 0x{:X}) lies outside the {} byte record",
            usa_count,
            usa_offset,
            buf.len()
        )));
    }

    let usn = [buf[usa_offset], buf[usa_offset + 1]];

    for i in 1..usa_count {
        let sector_end = i
            .checked_mul(bytes_per_sector)
            .and_then(|end| end.checked_sub(2))
            .filter(|end| end + 2 <= buf.len())
            .ok_or_else(|| {
                Error::BadFixupSignature(format!(
                    "sector {} ends outside the record, the MFT may be corrupt",
                    i
                ))
            })?;
        if buf[sector_end..sector_end + 2] != usn {
            return Err(Error::BadFixupSignature(format!(
                "sector {} ends with {:02X}{:02X} instead of the update sequence number {:02X}{:02X}",
                i,
                buf[sector_end],
                buf[sector_end + 1],
                usn[0],
                usn[1]
            )));
        }
        let fix_pos = usa_offset + 2 * i;
        buf.copy_within(fix_pos..fix_pos + 2, sector_end);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECTOR: usize = 512;

    /// A 1 KiB FILE record whose sector tails are `0xA1A2` and `0xB1B2`,
    /// protected with update sequence number 0x0007.
    fn protected_record() -> Vec<u8> {
        let mut buf = vec![0u8; 2 * SECTOR];
        buf[0..4].copy_from_slice(FILE_SIGNATURE);
        buf[4..6].copy_from_slice(&0x30u16.to_le_bytes());
        buf[6..8].copy_from_slice(&3u16.to_le_bytes());
        buf[0x30..0x32].copy_from_slice(&7u16.to_le_bytes());
        buf[0x32..0x34].copy_from_slice(&[0xA1, 0xA2]);
        buf[0x34..0x36].copy_from_slice(&[0xB1, 0xB2]);
        buf[SECTOR - 2..SECTOR].copy_from_slice(&7u16.to_le_bytes());
        buf[2 * SECTOR - 2..].copy_from_slice(&7u16.to_le_bytes());
        buf
    }

    #[test]
    fn restores_sector_tails() {
        let mut buf = protected_record();
        assert!(apply_fixups(&mut buf, SECTOR).unwrap());
        assert_eq!(&buf[SECTOR - 2..SECTOR], &[0xA1, 0xA2]);
        assert_eq!(&buf[2 * SECTOR - 2..], &[0xB1, 0xB2]);
    }

    #[test]
    fn corrupted_footer_is_rejected() {
        let mut buf = protected_record();
        buf[2 * SECTOR - 1] ^= 0xFF;
        assert!(matches!(
            apply_fixups(&mut buf, SECTOR),
            Err(Error::BadFixupSignature(_))
        ));
    }

    #[test]
    fn array_outside_record_is_rejected() {
        let mut buf = protected_record();
        buf[4..6].copy_from_slice(&0x3FEu16.to_le_bytes());
        assert!(matches!(
            apply_fixups(&mut buf, SECTOR),
            Err(Error::BadFixupSignature(_))
        ));
    }

    #[test]
    fn too_many_sectors_is_rejected() {
        let mut buf = protected_record();
        buf[6..8].copy_from_slice(&4u16.to_le_bytes());
        assert!(apply_fixups(&mut buf, SECTOR).is_err());
    }

    #[test]
    fn tiny_sector_size_is_rejected() {
        let mut buf = protected_record();
        assert!(matches!(
            apply_fixups(&mut buf, 1),
            Err(Error::BadFixupSignature(_))
        ));
    }

    #[test]
    fn non_file_record_is_left_alone() {
        let mut buf = protected_record();
        buf[0..4].copy_from_slice(b"BAAD");
        let before = buf.clone();
        assert!(!apply_fixups(&mut buf, SECTOR).unwrap());
        assert_eq!(buf, before);
    }
}
