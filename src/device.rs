use std::io::{Read, Seek, SeekFrom};

use crate::error::{Error, Result};

/// Random access, read-only view over the raw partition.
///
/// The engine never opens or closes the underlying resource, it only asks for
/// `buf.len()` bytes starting at an absolute byte offset. A failed or short
/// read is fatal.
pub trait BlockDevice {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()>;
}

impl<T: Read + Seek> BlockDevice for T {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()> {
        let length = buf.len();
        let io = |source| Error::Io {
            offset,
            length,
            source,
        };
        self.seek(SeekFrom::Start(offset)).map_err(io)?;
        self.read_exact(buf).map_err(io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_at_absolute_offset() {
        let mut dev = Cursor::new((0u8..=255).collect::<Vec<u8>>());
        let mut buf = [0u8; 4];
        dev.read_at(&mut buf, 16).unwrap();
        assert_eq!(buf, [16, 17, 18, 19]);
    }

    #[test]
    fn short_read_is_an_io_error() {
        let mut dev = Cursor::new(vec![0u8; 8]);
        let mut buf = [0u8; 4];
        let err = dev.read_at(&mut buf, 6).unwrap_err();
        assert!(matches!(err, Error::Io { offset: 6, length: 4, .. }));
    }
}
