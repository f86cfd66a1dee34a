//! Segmented, append-only byte log with flush/sync/offset addressing and
//! optional per-segment compression (§4.A).
//!
//! `Appendable` is the contract every log in this crate (value logs, tx log,
//! commit log, AHT node/commit logs) is built on: `Append`, `ReadAt`,
//! `SetOffset`, `Size`, `Flush`, `Sync`, `Close`. `SetOffset` is how a crashed
//! store discards a partially written, uncommitted tail on reopen — the next
//! `Append` simply overwrites it.

use std::{
    ffi, fs,
    io::Write,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use flate2::{write::DeflateEncoder, Compression};

use crate::util::files;
use crate::{err_at, Error, Result};

/// Default segment size, 1GB, matching the teacher's `wral::JOURNAL_LIMIT`.
pub const DEFAULT_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// A single segment file, holding one contiguous range of the logical
/// appendable's byte stream, starting at `base_offset`.
struct Segment {
    file: fs::File,
    base_offset: u64,
    len: u64,
}

/// Segmented append-only file. The logical offset space is continuous across
/// segment boundaries; a new segment begins once the current one would
/// exceed `file_size`.
pub struct Appendable {
    dir: PathBuf,
    name: String,
    ext: String,
    file_size: u64,
    compression: bool,
    segments: Vec<Segment>,
    closed: bool,
}

fn segment_path(dir: &Path, name: &str, ext: &str, num: usize) -> PathBuf {
    dir.join(format!("{}-{:08}.{}", name, num, ext))
}

impl Appendable {
    /// Create (or truncate-and-recreate) a fresh appendable under `dir`.
    pub fn create(dir: &Path, name: &str, ext: &str, file_size: u64, compression: bool) -> Result<Appendable> {
        err_at!(IOError, fs::create_dir_all(dir))?;
        let path = segment_path(dir, name, ext, 0);
        let file = files::create_file_a(path.as_os_str())?;
        Ok(Appendable {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            ext: ext.to_string(),
            file_size: file_size.max(1),
            compression,
            segments: vec![Segment { file, base_offset: 0, len: 0 }],
            closed: false,
        })
    }

    /// Reopen an existing appendable, discovering its segments in order.
    pub fn open(dir: &Path, name: &str, ext: &str, file_size: u64, compression: bool) -> Result<Appendable> {
        let mut segments = vec![];
        let mut num = 0;
        let mut base_offset = 0u64;
        loop {
            let path = segment_path(dir, name, ext, num);
            if !path.exists() {
                break;
            }
            let file = files::open_file_a(path.as_os_str())?;
            let len = err_at!(IOError, file.metadata())?.len();
            segments.push(Segment { file, base_offset, len });
            base_offset += len;
            num += 1;
        }
        if segments.is_empty() {
            return Appendable::create(dir, name, ext, file_size, compression);
        }
        Ok(Appendable {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            ext: ext.to_string(),
            file_size: file_size.max(1),
            compression,
            segments,
            closed: false,
        })
    }

    fn last_mut(&mut self) -> &mut Segment {
        self.segments.last_mut().expect("appendable always has >=1 segment")
    }

    fn rotate(&mut self) -> Result<()> {
        let num = self.segments.len();
        let base_offset = self.size();
        let path = segment_path(&self.dir, &self.name, &self.ext, num);
        let file = files::create_file_a(path.as_os_str())?;
        self.segments.push(Segment { file, base_offset, len: 0 });
        Ok(())
    }

    fn maybe_compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if !self.compression {
            return Ok(data.to_vec());
        }
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::fast());
        err_at!(IOError, enc.write_all(data))?;
        err_at!(IOError, enc.finish())
    }

    /// Append `data`, returning `(offset, n_written)` where `offset` is the
    /// logical start position of `data` within the appendable's byte stream.
    pub fn append(&mut self, data: &[u8]) -> Result<(u64, usize)> {
        if self.closed {
            return err_at!(AlreadyClosed, msg: "appendable {} is closed", self.name);
        }
        let payload = self.maybe_compress(data)?;
        if self.last_mut().len + payload.len() as u64 > self.file_size && self.last_mut().len > 0 {
            self.rotate()?;
        }
        let offset = self.size();
        let seg = self.last_mut();
        err_at!(IOError, seg.file.write_all(&payload))?;
        seg.len += payload.len() as u64;
        Ok((offset, data.len()))
    }

    /// Total logical size of the appendable.
    pub fn size(&self) -> u64 {
        self.segments.last().map(|s| s.base_offset + s.len).unwrap_or(0)
    }

    /// Read `buf.len()` bytes starting at logical `offset`. Reads never span
    /// more than one segment; callers writing single records smaller than
    /// `file_size` never straddle a boundary.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let seg = self
            .segments
            .iter()
            .rev()
            .find(|s| offset >= s.base_offset)
            .ok_or_else(|| Error::CorruptedData(format!("no segment covers offset {}", offset)))?;
        let local = offset - seg.base_offset;
        if local + buf.len() as u64 > seg.len {
            return err_at!(CorruptedData, msg: "read past segment end at {}", offset);
        }
        err_at!(IOError, seg.file.read_exact_at(buf, local))?;
        Ok(buf.len())
    }

    /// Truncate the logical stream back to `offset`, discarding any tail
    /// written after it. Used to drop partially-written, uncommitted data
    /// recovered after a crash. Only ever moves backwards.
    pub fn set_offset(&mut self, offset: u64) -> Result<()> {
        while self.segments.len() > 1 && offset <= self.segments.last().unwrap().base_offset {
            self.segments.pop();
        }
        let seg = self.last_mut();
        let local = offset - seg.base_offset;
        err_at!(IOError, seg.file.set_len(local))?;
        seg.len = local;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        err_at!(IOError, self.last_mut().file.flush())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        err_at!(IOError, self.last_mut().file.sync_all())
    }

    pub fn close(&mut self) -> Result<()> {
        self.sync()?;
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod appendable_test {
    use super::*;

    #[test]
    fn test_append_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Appendable::create(dir.path(), "val", "val", 64, false).unwrap();
        let (off1, _) = a.append(b"hello").unwrap();
        let (off2, _) = a.append(b"world!").unwrap();
        assert_eq!(off1, 0);
        assert_eq!(off2, 5);

        let mut buf = [0u8; 5];
        a.read_at(&mut buf, off1).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_set_offset_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Appendable::create(dir.path(), "val", "val", 1024, false).unwrap();
        a.append(b"committed").unwrap();
        let torn_at = a.size();
        a.append(b"torn-write").unwrap();
        assert_eq!(a.size(), torn_at + 10);

        a.set_offset(torn_at).unwrap();
        assert_eq!(a.size(), torn_at);
        a.append(b"redo").unwrap();
        assert_eq!(a.size(), torn_at + 4);
    }

    #[test]
    fn test_rotation_across_segments() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Appendable::create(dir.path(), "val", "val", 8, false).unwrap();
        let (o1, _) = a.append(b"1234").unwrap();
        let (o2, _) = a.append(b"5678").unwrap();
        let (o3, _) = a.append(b"90ab").unwrap();
        assert_eq!((o1, o2, o3), (0, 4, 8));
        assert_eq!(a.segments.len(), 2);

        let mut buf = [0u8; 4];
        a.read_at(&mut buf, o3).unwrap();
        assert_eq!(&buf, b"90ab");
    }

    #[test]
    fn test_reopen_recovers_segments() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut a = Appendable::create(dir.path(), "val", "val", 1024, false).unwrap();
            a.append(b"persisted").unwrap();
            a.sync().unwrap();
        }
        let a = Appendable::open(dir.path(), "val", "val", 1024, false).unwrap();
        assert_eq!(a.size(), 9);
    }
}
