//! Size caps and cancellation for streaming copies
//!
//! Every byte that crosses a sandbox boundary goes through a
//! [`LimitedReader`] or [`LimitedWriter`]. Both fail with
//! [`DvomError::ResourceLimit`] once more than the cap has passed and check
//! the shared [`Cancellation`] before each chunk. Errors travel through
//! `std::io` as wrapped `DvomError`s and are recovered on the other side.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{DvomError, DvomResult};

/// Default hard cap on a single copy or extraction (100 GiB)
pub const DEFAULT_MAX_COPY_SIZE: u64 = 100 * 1024 * 1024 * 1024;

/// Shared cancellation flag with an optional deadline
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel automatically once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn check(&self) -> DvomResult<()> {
        if self.flag.load(Ordering::SeqCst) {
            return Err(DvomError::Cancelled("operation was cancelled".into()));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(DvomError::Cancelled("deadline exceeded".into()));
        }
        Ok(())
    }
}

/// Reader that fails after `limit` bytes
pub struct LimitedReader<R> {
    inner: R,
    limit: u64,
    read: u64,
    cancellation: Cancellation,
}

impl<R: Read> LimitedReader<R> {
    pub fn new(inner: R, limit: u64, cancellation: Cancellation) -> Self {
        Self {
            inner,
            limit,
            read: 0,
            cancellation,
        }
    }

    /// Only check for cancellation
    pub fn unbounded(inner: R, cancellation: Cancellation) -> Self {
        Self::new(inner, u64::MAX, cancellation)
    }

    pub fn bytes_read(&self) -> u64 {
        self.read
    }
}

impl<R: Read> Read for LimitedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cancellation.check().map_err(DvomError::into_io)?;
        let n = self.inner.read(buf)?;
        self.read = self.read.saturating_add(n as u64);
        if self.read > self.limit {
            return Err(DvomError::ResourceLimit { limit: self.limit }.into_io());
        }
        Ok(n)
    }
}

/// Writer that refuses to go past `limit` bytes
pub struct LimitedWriter<W> {
    inner: W,
    limit: u64,
    written: u64,
    cancellation: Cancellation,
}

impl<W: Write> LimitedWriter<W> {
    pub fn new(inner: W, limit: u64, cancellation: Cancellation) -> Self {
        Self {
            inner,
            limit,
            written: 0,
            cancellation,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for LimitedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.cancellation.check().map_err(DvomError::into_io)?;
        if self.written.saturating_add(buf.len() as u64) > self.limit {
            return Err(DvomError::ResourceLimit { limit: self.limit }.into_io());
        }
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_writer_allows_exact_limit() {
        let mut writer = LimitedWriter::new(Vec::new(), 4, Cancellation::new());
        writer.write_all(b"abcd").unwrap();
        assert_eq!(writer.written(), 4);

        let err = writer.write_all(b"e").unwrap_err();
        assert!(DvomError::from(err).is_resource_limit());
        assert_eq!(writer.into_inner(), b"abcd");
    }

    #[test]
    fn test_reader_fails_past_limit() {
        let mut reader = LimitedReader::new(Cursor::new(vec![0u8; 100]), 64, Cancellation::new());
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert!(DvomError::from(err).is_resource_limit());

        let mut reader = LimitedReader::new(Cursor::new(vec![0u8; 64]), 64, Cancellation::new());
        assert_eq!(reader.read_to_end(&mut Vec::new()).unwrap(), 64);
        assert_eq!(reader.bytes_read(), 64);
    }

    #[test]
    fn test_cancellation_stops_copies() {
        let cancellation = Cancellation::new();
        let mut writer = LimitedWriter::new(Vec::new(), u64::MAX, cancellation.clone());
        writer.write_all(b"before").unwrap();

        cancellation.cancel();
        assert!(cancellation.is_cancelled());
        let err = writer.write_all(b"after").unwrap_err();
        assert!(DvomError::from(err).is_cancelled());

        let mut reader = LimitedReader::unbounded(Cursor::new(b"data".to_vec()), cancellation);
        let err = reader.read(&mut [0u8; 4]).unwrap_err();
        assert!(DvomError::from(err).is_cancelled());
    }

    #[test]
    fn test_deadline() {
        let expired = Cancellation::with_timeout(Duration::ZERO);
        assert!(expired.check().unwrap_err().is_cancelled());

        let generous = Cancellation::with_timeout(Duration::from_secs(3600));
        assert!(generous.check().is_ok());
    }
}
