//! # Rollback Journal
//!
//! Sidecar file holding the pre-image of every page the open transaction
//! has modified. The journal is the undo log: replaying it restores the
//! last committed state, whether that happens in `rollback()` or during
//! crash recovery on open.
//!
//! ## File Format
//!
//! ```text
//! Header (8 bytes)
//!   0  4  magic      "LMJL"
//!   4  4  page_size  Sanity check against the build's PAGE_SIZE
//! Records (repeated until EOF)
//!   0  4         page_no
//!   4  4         crc32 of the pre-image
//!   8  PAGE_SIZE pre-image bytes
//! ```
//!
//! Records are self-delimiting; no count field needs rewriting as the
//! transaction grows. A crash can leave a torn final record, which the
//! reader detects by short length or checksum mismatch and treats as the
//! end of the journal — everything before it is intact and sufficient,
//! because the data file is only written after the journal is synced.
//!
//! ## Hot Journal
//!
//! A journal that exists and holds at least one full record is "hot": the
//! database it belongs to was left mid-transaction and must be rolled
//! back before serving any request.

use crc::{Crc, CRC_32_ISO_HDLC};
use eyre::{Result, WrapErr};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::{JOURNAL_SUFFIX, PAGE_SIZE};

const JOURNAL_MAGIC: u32 = 0x4C4A_4D4C;
const JOURNAL_HEADER_SIZE: u64 = 8;
const RECORD_SIZE: u64 = 8 + PAGE_SIZE as u64;

const JOURNAL_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub struct Journal {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl Journal {
    /// Journal handle for the database at `db_path`. No file is touched
    /// until `begin()`.
    pub fn for_database(db_path: &Path) -> Journal {
        let mut os = db_path.as_os_str().to_os_string();
        os.push(JOURNAL_SUFFIX);
        Journal {
            path: PathBuf::from(os),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if a journal file with at least one complete record exists —
    /// the on-disk signature of an uncommitted transaction.
    pub fn is_hot(&self) -> bool {
        match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len() >= JOURNAL_HEADER_SIZE + RECORD_SIZE,
            Err(_) => false,
        }
    }

    /// Starts journaling a new transaction: truncates any stale content
    /// and writes the header.
    pub fn begin(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .wrap_err_with(|| format!("opening journal {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&JOURNAL_MAGIC.to_le_bytes())?;
        writer.write_all(&(PAGE_SIZE as u32).to_le_bytes())?;
        self.writer = Some(writer);
        Ok(())
    }

    /// Appends the pre-image of `page_no`. Buffered; call `sync` before
    /// any data-file write depends on this record being durable.
    pub fn record(&mut self, page_no: u32, pre_image: &[u8]) -> Result<()> {
        debug_assert_eq!(pre_image.len(), PAGE_SIZE);
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| eyre::eyre!("journal record outside a transaction"))?;
        writer.write_all(&page_no.to_le_bytes())?;
        writer.write_all(&JOURNAL_CRC.checksum(pre_image).to_le_bytes())?;
        writer.write_all(pre_image)?;
        Ok(())
    }

    /// Flushes buffered records and fsyncs the journal file.
    pub fn sync(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Discards the journal after commit or rollback: truncate to empty,
    /// fsync, release the handle. An empty journal is a cold journal.
    pub fn discard(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let file = writer
                .into_inner()
                .map_err(|e| eyre::eyre!("flushing journal on discard: {}", e.error()))?;
            file.set_len(0)?;
            file.sync_all()?;
        } else if self.path.exists() {
            let file = OpenOptions::new().write(true).open(&self.path)?;
            file.set_len(0)?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Reads every intact record for rollback or recovery. Stops at the
    /// first torn or corrupt record; records are independent pre-images,
    /// so every intact prefix is safe to apply.
    pub fn read_records(&self) -> Result<Vec<(u32, Box<[u8; PAGE_SIZE]>)>> {
        let mut file = File::open(&self.path)
            .wrap_err_with(|| format!("opening journal {}", self.path.display()))?;

        let mut header = [0u8; JOURNAL_HEADER_SIZE as usize];
        if file.read_exact(&mut header).is_err() {
            return Ok(Vec::new());
        }
        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let page_size = u32::from_le_bytes(header[4..8].try_into().unwrap());
        if magic != JOURNAL_MAGIC || page_size != PAGE_SIZE as u32 {
            warn!(magic, page_size, "ignoring journal with unrecognized header");
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(JOURNAL_HEADER_SIZE))?;
        let mut records = Vec::new();
        loop {
            let mut head = [0u8; 8];
            if file.read_exact(&mut head).is_err() {
                break;
            }
            let page_no = u32::from_le_bytes(head[0..4].try_into().unwrap());
            let crc = u32::from_le_bytes(head[4..8].try_into().unwrap());
            let mut image = Box::new([0u8; PAGE_SIZE]);
            if file.read_exact(image.as_mut_slice()).is_err() {
                warn!(page_no, "torn journal record, stopping replay here");
                break;
            }
            if JOURNAL_CRC.checksum(image.as_slice()) != crc {
                warn!(page_no, "journal record failed checksum, stopping replay here");
                break;
            }
            records.push((page_no, image));
        }
        Ok(records)
    }
}
