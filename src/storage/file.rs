//! # File I/O Shim
//!
//! Thin wrapper over [`std::fs::File`] exposing exactly the operations the
//! pager needs: page-granular read/write, sync, truncate and length. All
//! I/O errors are tagged with the page number via [`EngineError::Io`] so
//! callers can report which page a failing disk took down.

use eyre::{Result, WrapErr};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::PAGE_SIZE;
use crate::error::EngineError;

pub struct DbFile {
    file: File,
    path: PathBuf,
}

impl DbFile {
    /// Opens `path` read-write, creating it if missing.
    pub fn open(path: &Path) -> Result<DbFile> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .wrap_err_with(|| format!("opening database file {}", path.display()))?;
        Ok(DbFile {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata().map_err(|e| EngineError::io(0, e))?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Reads page `page_no` into `buf` (exactly `PAGE_SIZE` bytes).
    pub fn read_page(&mut self, page_no: u32, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        self.file
            .seek(SeekFrom::Start(page_no as u64 * PAGE_SIZE as u64))
            .map_err(|e| EngineError::io(page_no, e))?;
        self.file
            .read_exact(buf)
            .map_err(|e| EngineError::io(page_no, e))?;
        Ok(())
    }

    /// Writes page `page_no` from `buf`, extending the file if needed.
    pub fn write_page(&mut self, page_no: u32, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        self.file
            .seek(SeekFrom::Start(page_no as u64 * PAGE_SIZE as u64))
            .map_err(|e| EngineError::io(page_no, e))?;
        self.file
            .write_all(buf)
            .map_err(|e| EngineError::io(page_no, e))?;
        Ok(())
    }

    pub fn truncate(&mut self, pages: u32) -> Result<()> {
        self.file
            .set_len(pages as u64 * PAGE_SIZE as u64)
            .map_err(|e| EngineError::io(pages, e))?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all().map_err(|e| EngineError::io(0, e))?;
        Ok(())
    }
}
