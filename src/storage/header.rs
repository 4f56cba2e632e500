//! # File Header
//!
//! The first page-sized block of the database file holds the file header.
//! It is addressed as page 0 by the pager (and journaled like any other
//! page), but never handed out to callers.
//!
//! ## Layout (24 bytes, rest of the block zero)
//!
//! ```text
//! Offset  Size  Field          Description
//! ------  ----  -------------  --------------------------------------
//! 0       4     magic          "LUMA" (0x414D554C little-endian)
//! 4       4     version        File format version
//! 8       4     page_size      Must equal the build's PAGE_SIZE
//! 12      4     page_count     Pages in the file, header block included
//! 16      4     freelist_head  First trunk page (0 = freelist empty)
//! 20      4     freelist_count Free page numbers across all trunks
//! ```

use eyre::{ensure, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::PAGE_SIZE;

pub const DB_MAGIC: u32 = 0x414D_554C;
pub const DB_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub page_size: u32,
    pub page_count: u32,
    pub freelist_head: u32,
    pub freelist_count: u32,
}

impl FileHeader {
    /// Header for a freshly created database: only the header block
    /// itself exists, so the next allocated page index is 1.
    pub fn fresh() -> Self {
        Self {
            magic: DB_MAGIC,
            version: DB_VERSION,
            page_size: PAGE_SIZE as u32,
            page_count: 1,
            freelist_head: 0,
            freelist_count: 0,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for FileHeader: {} < {}",
            data.len(),
            size_of::<Self>()
        );
        Self::ref_from_bytes(&data[..size_of::<Self>()])
            .map_err(|e| eyre::eyre!("failed to read FileHeader: {:?}", e))
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for FileHeader: {} < {}",
            data.len(),
            size_of::<Self>()
        );
        data[..size_of::<Self>()].copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.magic == DB_MAGIC,
            "not a database file: bad magic {:08x}",
            self.magic
        );
        ensure!(
            self.version == DB_VERSION,
            "unsupported file version {}",
            self.version
        );
        ensure!(
            self.page_size == PAGE_SIZE as u32,
            "file page size {} does not match build page size {}",
            self.page_size,
            PAGE_SIZE
        );
        ensure!(self.page_count >= 1, "header block missing from page count");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_24_bytes() {
        assert_eq!(size_of::<FileHeader>(), 24);
    }

    #[test]
    fn fresh_header_validates() {
        FileHeader::fresh().validate().unwrap();
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut h = FileHeader::fresh();
        h.magic = 0xDEAD_BEEF;
        assert!(h.validate().is_err());
    }

    #[test]
    fn mismatched_page_size_is_rejected() {
        let mut h = FileHeader::fresh();
        h.page_size = 512;
        assert!(h.validate().is_err());
    }

    #[test]
    fn round_trip_through_page_bytes() {
        let mut page = [0u8; PAGE_SIZE];
        let mut h = FileHeader::fresh();
        h.page_count = 42;
        h.freelist_head = 7;
        h.write_to(&mut page).unwrap();

        let back = FileHeader::from_bytes(&page).unwrap();
        assert_eq!(back.page_count, 42);
        assert_eq!(back.freelist_head, 7);
        back.validate().unwrap();
    }
}
