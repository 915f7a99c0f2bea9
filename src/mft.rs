// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

//! Structured decoding of FILE records and their attributes.
//!
//! Every decoder works on a fixed-up record buffer and checks each offset
//! against the span it reads from. A declared length or offset that does not
//! fit is reported as [`Error::CorruptAttribute`].

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::{Error, Result};
use crate::fixup::FILE_SIGNATURE;

pub const END_MARKER: u32 = 0xFFFF_FFFF;

/// Smallest possible attribute header (type, length, form, name, flags, id).
const MIN_ATTRIBUTE_LENGTH: u32 = 0x10;

fn corrupt(inode: u32, reason: impl Into<String>) -> Error {
    Error::CorruptAttribute {
        inode,
        reason: reason.into(),
    }
}

fn slice_at<'a>(buf: &'a [u8], offset: usize, len: usize, inode: u32, what: &str) -> Result<&'a [u8]> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or_else(|| {
            corrupt(
                inode,
                format!(
                    "{} ({} bytes at 0x{:X}) is outside its {} byte container",
                    what,
                    len,
                    offset,
                    buf.len()
                ),
            )
        })
}

fn utf16_name(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Header found at the very beginning of every FILE record (offset 0).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRecordHeader {
    pub usa_offset: u16,
    pub usa_count: u16,
    pub lsn: u64,
    pub sequence_number: u16,
    pub hard_link_count: u16,
    pub attrs_offset: u16,
    pub flags: u16,
    pub bytes_in_use: u32,
    pub bytes_allocated: u32,
    pub base_file_record: u64,
    pub next_attr_id: u16,
}

impl FileRecordHeader {
    pub const FLAG_IN_USE: u16 = 0x0001;
    pub const FLAG_DIRECTORY: u16 = 0x0002;

    /// Decode the header of `buf`, `None` when it is not a FILE record.
    pub fn parse(buf: &[u8], inode: u32) -> Result<Option<Self>> {
        if buf.len() < 4 || &buf[0..4] != FILE_SIGNATURE {
            return Ok(None);
        }
        let mut c = Cursor::new(&buf[4..]);
        let mut read = || -> std::io::Result<Self> {
            Ok(Self {
                usa_offset: c.read_u16::<LittleEndian>()?,
                usa_count: c.read_u16::<LittleEndian>()?,
                lsn: c.read_u64::<LittleEndian>()?,
                sequence_number: c.read_u16::<LittleEndian>()?,
                hard_link_count: c.read_u16::<LittleEndian>()?,
                attrs_offset: c.read_u16::<LittleEndian>()?,
                flags: c.read_u16::<LittleEndian>()?,
                bytes_in_use: c.read_u32::<LittleEndian>()?,
                bytes_allocated: c.read_u32::<LittleEndian>()?,
                base_file_record: c.read_u64::<LittleEndian>()?,
                next_attr_id: c.read_u16::<LittleEndian>()?,
            })
        };
        read()
            .map(Some)
            .map_err(|_| corrupt(inode, "FILE record header is truncated"))
    }

    pub fn in_use(&self) -> bool {
        self.flags & Self::FLAG_IN_USE != 0
    }

    pub fn is_dir(&self) -> bool {
        self.flags & Self::FLAG_DIRECTORY != 0
    }

    /// Inode of the base record when this record is an extension.
    pub fn base_inode(&self) -> u64 {
        self.base_file_record & 0x0000_FFFF_FFFF_FFFF
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum AttributeType {
    StandardInformation,
    AttributeList,
    FileName,
    ObjectId,
    SecurityDescriptor,
    VolumeName,
    VolumeInformation,
    Data,
    IndexRoot,
    IndexAllocation,
    Bitmap,
    ReparsePoint,
    EaInformation,
    Ea,
    PropertySet,
    LoggedUtilityStream,
    Unknown(u32),
}

impl From<u32> for AttributeType {
    fn from(value: u32) -> Self {
        use AttributeType::*;
        match value {
            0x10 => StandardInformation,
            0x20 => AttributeList,
            0x30 => FileName,
            0x40 => ObjectId,
            0x50 => SecurityDescriptor,
            0x60 => VolumeName,
            0x70 => VolumeInformation,
            0x80 => Data,
            0x90 => IndexRoot,
            0xA0 => IndexAllocation,
            0xB0 => Bitmap,
            0xC0 => ReparsePoint,
            0xD0 => EaInformation,
            0xE0 => Ea,
            0xF0 => PropertySet,
            0x100 => LoggedUtilityStream,
            other => Unknown(other),
        }
    }
}

impl AttributeType {
    pub fn code(self) -> u32 {
        use AttributeType::*;
        match self {
            StandardInformation => 0x10,
            AttributeList => 0x20,
            FileName => 0x30,
            ObjectId => 0x40,
            SecurityDescriptor => 0x50,
            VolumeName => 0x60,
            VolumeInformation => 0x70,
            Data => 0x80,
            IndexRoot => 0x90,
            IndexAllocation => 0xA0,
            Bitmap => 0xB0,
            ReparsePoint => 0xC0,
            EaInformation => 0xD0,
            Ea => 0xE0,
            PropertySet => 0xF0,
            LoggedUtilityStream => 0x100,
            Unknown(code) => code,
        }
    }
}

/// Common header part for resident & non-resident attributes.
#[derive(Debug, Clone, Copy)]
pub struct AttributeHeader<'a> {
    pub attr_type: AttributeType,
    pub length: u32,
    pub flags: u16,
    pub id: u16,
    /// UTF-16LE name, empty for unnamed attributes.
    pub raw_name: &'a [u8],
}

impl AttributeHeader<'_> {
    pub fn is_named(&self) -> bool {
        !self.raw_name.is_empty()
    }

    pub fn name(&self) -> Option<String> {
        self.is_named().then(|| utf16_name(self.raw_name))
    }
}

/// Additional header present only when the attribute is non-resident.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct NonResidentHeader {
    pub lowest_vcn: u64,
    pub highest_vcn: u64,
    pub mapping_pairs_offset: u16,
    pub compression_unit: u16,
    pub allocated_size: u64,
    pub real_size: u64,
    pub initialized_size: u64,
}

/// A single attribute borrowed from its record.
#[derive(Debug, Clone, Copy)]
pub enum Attribute<'a> {
    Resident {
        header: AttributeHeader<'a>,
        value: &'a [u8],
    },
    NonResident {
        header: AttributeHeader<'a>,
        non_resident: NonResidentHeader,
        run_list: &'a [u8],
    },
}

impl<'a> Attribute<'a> {
    pub fn header(&self) -> &AttributeHeader<'a> {
        match self {
            Attribute::Resident { header, .. } | Attribute::NonResident { header, .. } => header,
        }
    }

    /// Decode one attribute from exactly its declared `length` bytes.
    pub fn parse(attr: &'a [u8], inode: u32) -> Result<Self> {
        let truncated = |_| corrupt(inode, "attribute header is truncated");
        let mut c = Cursor::new(attr);
        let attr_type = AttributeType::from(c.read_u32::<LittleEndian>().map_err(truncated)?);
        let length = c.read_u32::<LittleEndian>().map_err(truncated)?;
        let non_resident = c.read_u8().map_err(truncated)? != 0;
        let name_length = c.read_u8().map_err(truncated)? as usize;
        let name_offset = c.read_u16::<LittleEndian>().map_err(truncated)? as usize;
        let flags = c.read_u16::<LittleEndian>().map_err(truncated)?;
        let id = c.read_u16::<LittleEndian>().map_err(truncated)?;

        let raw_name = if name_length > 0 {
            slice_at(attr, name_offset, name_length * 2, inode, "attribute name")?
        } else {
            &[]
        };
        let header = AttributeHeader {
            attr_type,
            length,
            flags,
            id,
            raw_name,
        };

        if !non_resident {
            let value_length = c.read_u32::<LittleEndian>().map_err(truncated)? as usize;
            let value_offset = c.read_u16::<LittleEndian>().map_err(truncated)? as usize;
            let value = slice_at(attr, value_offset, value_length, inode, "resident value")?;
            return Ok(Attribute::Resident { header, value });
        }

        let mut read_nr = || -> std::io::Result<NonResidentHeader> {
            let lowest_vcn = c.read_u64::<LittleEndian>()?;
            let highest_vcn = c.read_u64::<LittleEndian>()?;
            let mapping_pairs_offset = c.read_u16::<LittleEndian>()?;
            let compression_unit = c.read_u16::<LittleEndian>()?;
            c.read_u32::<LittleEndian>()?; // padding
            Ok(NonResidentHeader {
                lowest_vcn,
                highest_vcn,
                mapping_pairs_offset,
                compression_unit,
                allocated_size: c.read_u64::<LittleEndian>()?,
                real_size: c.read_u64::<LittleEndian>()?,
                initialized_size: c.read_u64::<LittleEndian>()?,
            })
        };
        let non_resident = read_nr().map_err(truncated)?;
        let run_list = attr
            .get(non_resident.mapping_pairs_offset as usize..)
            .ok_or_else(|| corrupt(inode, "mapping pairs start after the attribute end"))?;
        Ok(Attribute::NonResident {
            header,
            non_resident,
            run_list,
        })
    }
}

/// Walks the attributes of a record until the end marker or the end of the
/// buffer.
pub struct AttributeIter<'a> {
    buf: &'a [u8],
    offset: usize,
    inode: u32,
    done: bool,
}

impl<'a> AttributeIter<'a> {
    /// `buf` starts at the first attribute of the record.
    pub fn new(buf: &'a [u8], inode: u32) -> Self {
        Self {
            buf,
            offset: 0,
            inode,
            done: false,
        }
    }

    fn next_attribute(&mut self) -> Result<Option<Attribute<'a>>> {
        let Some(type_bytes) = self.buf.get(self.offset..self.offset + 4) else {
            return Ok(None);
        };
        if u32::from_le_bytes([type_bytes[0], type_bytes[1], type_bytes[2], type_bytes[3]])
            == END_MARKER
        {
            return Ok(None);
        }
        let length = self
            .buf
            .get(self.offset + 4..self.offset + 8)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or_else(|| corrupt(self.inode, "attribute length lies past the record"))?;
        if length < MIN_ATTRIBUTE_LENGTH || self.offset + length as usize > self.buf.len() {
            return Err(corrupt(
                self.inode,
                format!(
                    "attribute at 0x{:X} declares {} bytes with {} left, the MFT may be corrupt",
                    self.offset,
                    length,
                    self.buf.len() - self.offset
                ),
            ));
        }
        let attr = &self.buf[self.offset..self.offset + length as usize];
        self.offset += length as usize;
        Attribute::parse(attr, self.inode).map(Some)
    }
}

impl<'a> Iterator for AttributeIter<'a> {
    type Item = Result<Attribute<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_attribute() {
            Ok(Some(attr)) => Some(Ok(attr)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_DELTA_SECS: i64 = 11_644_473_600;

/// Convert a FILETIME (100 ns ticks since 1601) to UTC.
pub fn filetime_to_datetime(ft: u64) -> Option<DateTime<Utc>> {
    let secs = (ft / 10_000_000) as i64 - FILETIME_UNIX_DELTA_SECS;
    let nanos = (ft % 10_000_000) as u32 * 100;
    Utc.timestamp_opt(secs, nanos).single()
}

/// Parsed $STANDARD_INFORMATION, timestamps left as FILETIME.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StandardInformation {
    pub created: u64,
    pub modified: u64,
    pub mft_modified: u64,
    pub accessed: u64,
    pub file_attrs: u32,
}

impl StandardInformation {
    const MIN_LENGTH: usize = 0x24;

    pub fn parse(raw: &[u8], inode: u32) -> Result<Self> {
        if raw.len() < Self::MIN_LENGTH {
            return Err(corrupt(
                inode,
                format!("$STANDARD_INFORMATION is only {} bytes", raw.len()),
            ));
        }
        let mut cur = Cursor::new(raw);
        let mut read = || -> std::io::Result<Self> {
            Ok(Self {
                created: cur.read_u64::<LittleEndian>()?,
                modified: cur.read_u64::<LittleEndian>()?,
                mft_modified: cur.read_u64::<LittleEndian>()?,
                accessed: cur.read_u64::<LittleEndian>()?,
                file_attrs: cur.read_u32::<LittleEndian>()?,
            })
        };
        read().map_err(|_| corrupt(inode, "$STANDARD_INFORMATION is truncated"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileNamespace {
    Posix,
    Win32,
    Dos,
    Win32AndDos,
    Other(u8),
}

impl From<u8> for FileNamespace {
    fn from(value: u8) -> Self {
        match value {
            0 => FileNamespace::Posix,
            1 => FileNamespace::Win32,
            2 => FileNamespace::Dos,
            3 => FileNamespace::Win32AndDos,
            other => FileNamespace::Other(other),
        }
    }
}

impl FileNamespace {
    pub fn is_win32(self) -> bool {
        matches!(self, FileNamespace::Win32 | FileNamespace::Win32AndDos)
    }
}

/// Parsed $FILE_NAME attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNameAttr {
    /// Full 48-bit parent inode.
    pub parent_ref: u64,
    pub parent_seq: u16,
    pub created: u64,
    pub modified: u64,
    pub mft_modified: u64,
    pub accessed: u64,
    pub allocated_size: u64,
    pub real_size: u64,
    pub flags: u32,
    pub namespace: FileNamespace,
    pub name: String,
}

impl FileNameAttr {
    const NAME_OFFSET: usize = 0x42;

    pub fn parse(raw: &[u8], inode: u32) -> Result<Self> {
        let truncated = |_| corrupt(inode, "$FILE_NAME is truncated");
        let mut cur = Cursor::new(raw);
        let parent_raw = cur.read_u64::<LittleEndian>().map_err(truncated)?;
        let mut times = [0u64; 4];
        for t in times.iter_mut() {
            *t = cur.read_u64::<LittleEndian>().map_err(truncated)?;
        }
        let allocated_size = cur.read_u64::<LittleEndian>().map_err(truncated)?;
        let real_size = cur.read_u64::<LittleEndian>().map_err(truncated)?;
        let flags = cur.read_u32::<LittleEndian>().map_err(truncated)?;
        cur.read_u32::<LittleEndian>().map_err(truncated)?; // reparse value
        let name_len = cur.read_u8().map_err(truncated)? as usize;
        let namespace = FileNamespace::from(cur.read_u8().map_err(truncated)?);
        let name_raw = slice_at(raw, Self::NAME_OFFSET, name_len * 2, inode, "$FILE_NAME name")?;

        Ok(Self {
            parent_ref: parent_raw & 0x0000_FFFF_FFFF_FFFF,
            parent_seq: (parent_raw >> 48) as u16,
            created: times[0],
            modified: times[1],
            mft_modified: times[2],
            accessed: times[3],
            allocated_size,
            real_size,
            flags,
            namespace,
            name: utf16_name(name_raw),
        })
    }
}
