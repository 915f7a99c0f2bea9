// Sources:
// - https://en.wikipedia.org/wiki/NTFS

//! Partition boot sector parsing and the disk geometry derived from it.

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, error};
use prettytable::{Table, row};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::io::{Cursor, Read};

use crate::device::BlockDevice;
use crate::error::{Error, Result};

pub const BOOT_SECTOR_SIZE: usize = 512;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartitionBootSector {
    /* -- 0x00-0x0A ------------------------------------------ */
    pub jump_instruction: [u8; 3],
    pub oem_id: [u8; 8], // "NTFS    "

    /* -- BIOS Parameter Block – 0x0B-0x27 ------------------- */
    pub bytes_per_sector: u16,   // 0x0B
    pub sectors_per_cluster: u8, // 0x0D
    pub media_descriptor: u8,    // 0x15

    /* -- Extended BPB – 0x28-0x53 --------------------------- */
    pub total_sectors: u64,           // 0x28
    pub mft_cluster: u64,             // 0x30
    pub mft_mirror_cluster: u64,      // 0x38
    pub clusters_per_file_record: u8, // 0x40 (signed exponent when >= 0x80)
    pub clusters_per_index_buffer: u8, // 0x44
    pub volume_serial_number: u64,    // 0x48
}

impl PartitionBootSector {
    pub const NTFS_OEM_ID: [u8; 8] = *b"NTFS    ";

    /// Parse the first 512 bytes of the partition.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < BOOT_SECTOR_SIZE {
            return Err(Error::InvalidFormat(format!(
                "boot sector is {} bytes, expected {}",
                buf.len(),
                BOOT_SECTOR_SIZE
            )));
        }
        Self::parse(&mut Cursor::new(buf))
            .map_err(|e| Error::InvalidFormat(format!("truncated boot sector: {}", e)))
    }

    fn parse(c: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        macro_rules! read_array {
            ($len:expr) => {{
                let mut tmp = [0u8; $len];
                c.read_exact(&mut tmp)?;
                tmp
            }};
        }
        macro_rules! skip {
            ($len:expr) => {
                c.set_position(c.position() + $len)
            };
        }

        let jump_instruction = read_array!(3);
        let oem_id = read_array!(8);
        let bytes_per_sector = c.read_u16::<LittleEndian>()?;
        let sectors_per_cluster = c.read_u8()?;
        skip!(7); // reserved sectors, unused FAT fields
        let media_descriptor = c.read_u8()?;
        skip!(18); // CHS geometry, hidden sectors, unused
        let total_sectors = c.read_u64::<LittleEndian>()?;
        let mft_cluster = c.read_u64::<LittleEndian>()?;
        let mft_mirror_cluster = c.read_u64::<LittleEndian>()?;
        let clusters_per_file_record = c.read_u8()?;
        skip!(3);
        let clusters_per_index_buffer = c.read_u8()?;
        skip!(3);
        let volume_serial_number = c.read_u64::<LittleEndian>()?;

        Ok(Self {
            jump_instruction,
            oem_id,
            bytes_per_sector,
            sectors_per_cluster,
            media_descriptor,
            total_sectors,
            mft_cluster,
            mft_mirror_cluster,
            clusters_per_file_record,
            clusters_per_index_buffer,
            volume_serial_number,
        })
    }

    /// Check if the oem_id is valid
    pub fn oem_id_is_valid(&self) -> bool {
        self.oem_id == Self::NTFS_OEM_ID
    }

    pub fn cluster_size(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    /// Bytes per record for a clusters-per-record style field: values >= 0x80
    /// are a negated power of two, anything else counts clusters.
    fn clusters_or_exponent(&self, raw: u8) -> Option<u64> {
        if raw >= 0x80 {
            let shift = 256 - raw as u32;
            (shift < 32).then(|| 1u64 << shift)
        } else {
            Some(raw as u64 * self.cluster_size())
        }
    }

    /// Compute actual bytes per file-record segment
    pub fn file_record_size(&self) -> Option<u64> {
        self.clusters_or_exponent(self.clusters_per_file_record)
    }

    pub fn geometry(&self) -> Result<DiskGeometry> {
        if !self.oem_id_is_valid() {
            error!("The OEM Identifier is not valid.");
            return Err(Error::InvalidFormat(format!(
                "OEM identifier is {:?}, expected \"NTFS    \"",
                String::from_utf8_lossy(&self.oem_id)
            )));
        }
        if !self.bytes_per_sector.is_power_of_two()
            || !(256..=4096).contains(&self.bytes_per_sector)
        {
            return Err(Error::InvalidFormat(format!(
                "{} bytes per sector, expected a power of two between 256 and 4096",
                self.bytes_per_sector
            )));
        }
        let bytes_per_mft_record = self
            .file_record_size()
            .filter(|size| *size > 0)
            .ok_or_else(|| {
                Error::InvalidFormat(format!(
                    "unusable clusters per file record value 0x{:02X}",
                    self.clusters_per_file_record
                ))
            })?;

        let total_clusters = if self.sectors_per_cluster > 0 {
            self.total_sectors / self.sectors_per_cluster as u64
        } else {
            0
        };

        Ok(DiskGeometry {
            bytes_per_sector: self.bytes_per_sector as u64,
            sectors_per_cluster: self.sectors_per_cluster as u64,
            total_sectors: self.total_sectors,
            mft_start_lcn: self.mft_cluster,
            mft_mirror_lcn: self.mft_mirror_cluster,
            bytes_per_mft_record,
            bytes_per_index_record: self
                .clusters_or_exponent(self.clusters_per_index_buffer)
                .unwrap_or(0),
            bytes_per_cluster: self.cluster_size(),
            total_clusters,
            volume_serial_number: self.volume_serial_number,
        })
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

/// Layout facts of the volume needed to turn clusters into byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DiskGeometry {
    pub bytes_per_sector: u64,
    pub sectors_per_cluster: u64,
    pub total_sectors: u64,
    pub mft_start_lcn: u64,
    pub mft_mirror_lcn: u64,
    pub bytes_per_mft_record: u64,
    pub bytes_per_index_record: u64,
    pub bytes_per_cluster: u64,
    pub total_clusters: u64,
    pub volume_serial_number: u64,
}

impl DiskGeometry {
    /// Read and validate the boot sector at offset 0 of `device`.
    pub fn read<D: BlockDevice + ?Sized>(device: &mut D) -> Result<Self> {
        let mut sector = [0u8; BOOT_SECTOR_SIZE];
        device.read_at(&mut sector, 0)?;
        let geometry = PartitionBootSector::from_bytes(&sector)?.geometry()?;
        debug!("{:?}", geometry);
        Ok(geometry)
    }

    pub fn cluster_offset(&self, lcn: u64) -> u64 {
        lcn * self.bytes_per_cluster
    }

    pub fn mft_offset(&self) -> u64 {
        self.cluster_offset(self.mft_start_lcn)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

impl fmt::Display for DiskGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut t = Table::new();
        t.add_row(row!["Disk Geometry"]);
        t.add_row(row![b -> "Bytes per sector", self.bytes_per_sector]);
        t.add_row(row![b -> "Sectors per cluster", self.sectors_per_cluster]);
        t.add_row(row![b -> "Bytes per cluster", self.bytes_per_cluster]);
        t.add_row(row![b -> "Total sectors", self.total_sectors]);
        t.add_row(row![b -> "Total clusters", self.total_clusters]);
        t.add_row(row![b -> "$MFT cluster", self.mft_start_lcn]);
        t.add_row(row![b -> "$MFTMirr cluster", self.mft_mirror_lcn]);
        t.add_row(row![b -> "Bytes per MFT record", self.bytes_per_mft_record]);
        t.add_row(row![b -> "Bytes per index record", self.bytes_per_index_record]);
        t.add_row(row![b -> "Serial number", format!("{:016X}", self.volume_serial_number)]);
        write!(f, "{}", t)
    }
}
