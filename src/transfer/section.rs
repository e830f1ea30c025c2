//! Bounded section views over transfer sources and destinations
//!
//! Chunk workers never touch a source or destination directly. Uploads read
//! through a [`SectionReader`] and downloads write through a [`SectionWriter`],
//! each confined to the byte range of one chunk, so concurrent chunks cannot
//! step on each other's regions.

use crate::error::{Result, TransferError};
use bytes::{Bytes, BytesMut};
use std::fs::File;
use std::io;
use std::sync::Mutex;

/// Positional reads from a source shared by concurrent chunk workers
pub trait ReadAt: Send + Sync {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "source ended before the section was filled",
                    ))
                }
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Read exactly `length` bytes at `offset` into an owned buffer.
    fn read_bytes_at(&self, offset: u64, length: usize) -> io::Result<Bytes> {
        let mut buf = vec![0u8; length];
        self.read_exact_at(&mut buf, offset)?;
        Ok(Bytes::from(buf))
    }
}

/// Positional writes into a destination shared by concurrent chunk workers
pub trait WriteAt: Send + Sync {
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize>;

    fn write_all_at(&self, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write_at(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "destination refused further bytes",
                    ))
                }
                Ok(n) => {
                    buf = &buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let start = match usize::try_from(offset) {
            Ok(start) if start < self.len() => start,
            _ => return Ok(0),
        };
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

impl ReadAt for Bytes {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        ReadAt::read_at(&self[..], buf, offset)
    }

    fn read_bytes_at(&self, offset: u64, length: usize) -> io::Result<Bytes> {
        let end = usize::try_from(offset)
            .ok()
            .and_then(|start| start.checked_add(length).map(|end| (start, end)))
            .filter(|&(_, end)| end <= self.len());
        match end {
            Some((start, end)) => Ok(self.slice(start..end)),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "source ended before the section was filled",
            )),
        }
    }
}

#[cfg(unix)]
impl ReadAt for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl ReadAt for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

#[cfg(unix)]
impl WriteAt for File {
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::write_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl WriteAt for File {
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_write(self, buf, offset)
    }
}

/// An owned, zeroed buffer split into fixed-size regions, one per chunk.
///
/// Each region has its own lock, and a chunk only ever writes the region
/// matching its index, so the locks are never contended.
pub struct BytesWriter {
    regions: Vec<Mutex<BytesMut>>,
    region_size: u64,
    len: u64,
}

impl BytesWriter {
    pub fn new(len: usize, region_size: u64) -> Result<Self> {
        if region_size == 0 {
            return Err(TransferError::invalid_argument(
                "region size must be greater than zero",
            ));
        }
        let step = usize::try_from(region_size).unwrap_or(usize::MAX);
        let mut buffer = BytesMut::zeroed(len);
        let mut regions = Vec::with_capacity(len.div_ceil(step.max(1)));
        while !buffer.is_empty() {
            let take = step.min(buffer.len());
            regions.push(Mutex::new(buffer.split_to(take)));
        }
        Ok(Self {
            regions,
            region_size,
            len: len as u64,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Take the written contents out, leaving the writer empty.
    ///
    /// Regions were split from one allocation in order, so rejoining them
    /// does not copy.
    pub fn take(&self) -> BytesMut {
        let mut contents = BytesMut::new();
        for region in &self.regions {
            let mut region = region.lock().unwrap_or_else(|e| e.into_inner());
            contents.unsplit(region.split());
        }
        contents
    }
}

impl WriteAt for BytesWriter {
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if offset >= self.len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("offset {offset} is past the end of a {} byte buffer", self.len),
            ));
        }

        let index = (offset / self.region_size) as usize;
        let within = (offset % self.region_size) as usize;
        let mut region = self.regions[index]
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "buffer region lock poisoned"))?;
        let n = buf.len().min(region.len() - within);
        region[within..within + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }
}

/// Run positional I/O on the blocking thread pool.
///
/// File reads and writes block the calling thread, so chunk workers hand
/// them off here instead of stalling the async worker they run on.
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(TransferError::Canceled),
    }
}

/// Read-only window over `[offset, offset + length)` of a source
pub struct SectionReader<'a, R: ReadAt + ?Sized> {
    source: &'a R,
    offset: u64,
    length: u64,
}

impl<'a, R: ReadAt + ?Sized> SectionReader<'a, R> {
    pub fn new(source: &'a R, offset: u64, length: u64) -> Self {
        Self {
            source,
            offset,
            length,
        }
    }

    /// Read the whole section into an owned buffer.
    pub fn read_bytes(&self) -> Result<Bytes> {
        let length = usize::try_from(self.length).map_err(|_| {
            TransferError::invalid_argument(format!(
                "section of {} bytes does not fit in memory",
                self.length
            ))
        })?;
        Ok(self.source.read_bytes_at(self.offset, length)?)
    }
}

/// Write-only window over `[offset, offset + length)` of a destination.
///
/// Writes that would run past the end of the section are rejected with
/// [`TransferError::PartialWrite`] instead of being truncated.
pub struct SectionWriter<'a, W: WriteAt + ?Sized> {
    dest: &'a W,
    offset: u64,
    length: u64,
    position: u64,
}

impl<'a, W: WriteAt + ?Sized> SectionWriter<'a, W> {
    pub fn new(dest: &'a W, offset: u64, length: u64) -> Self {
        Self {
            dest,
            offset,
            length,
            position: 0,
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        let len = buf.len() as u64;
        if len > self.length - self.position {
            return Err(TransferError::PartialWrite {
                offset: self.position,
                len,
                limit: self.length,
            });
        }
        self.dest.write_all_at(buf, self.offset + self.position)?;
        self.position += len;
        Ok(())
    }

    /// Bytes written into the section so far
    pub fn written(&self) -> u64 {
        self.position
    }

    pub fn is_complete(&self) -> bool {
        self.position == self.length
    }
}
