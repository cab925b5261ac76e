use crate::errors::{ErrorKind, OstxError, OstxResult};
use crate::resource::ResourceId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{PipeReader, PipeWriter, Read, Write};
use std::sync::Arc;

const FILL_CHUNK: usize = 8192;

/// Both ends of an anonymous pipe plus a shared read buffer.
///
/// Bytes pulled from the OS pipe land in the buffer and stay there until they are consumed.
/// Every byte has a stream offset, so transactions can peek at the same bytes without
/// taking them, and only a committing transaction removes them with
/// [`PipePair::consume_at`].
///
/// The methods here are the raw, non-transactional primitives. Transactions reach them
/// through [`crate::pipe`].
#[derive(Clone)]
pub struct PipePair {
    inner: Arc<PipePairInner>,
}

impl PipePair {
    pub(crate) fn open(id: u64) -> OstxResult<Self> {
        let (reader, writer) = std::io::pipe()?;
        log::debug!("Opened pipe {}", id);
        Ok(PipePair {
            inner: Arc::new(PipePairInner {
                id,
                reader: Mutex::new(reader),
                writer: Mutex::new(Some(writer)),
                buffer: Mutex::new(ReadBuffer::default()),
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn read_id(&self) -> ResourceId {
        ResourceId::PipeRead(self.inner.id)
    }

    pub fn write_id(&self) -> ResourceId {
        ResourceId::PipeWrite(self.inner.id)
    }

    /// Reads and consumes up to `max` bytes.
    ///
    /// Blocks until the pipe has data. An empty result means end of stream.
    pub fn read(&self, max: usize) -> OstxResult<Vec<u8>> {
        self.inner.read(max)
    }

    /// Returns up to `max` bytes starting at stream offset `offset` without consuming them.
    ///
    /// Blocks until the stream reaches past `offset`. An empty result means end of stream.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::ValidationConflict`] if the bytes at `offset` were already consumed.
    pub fn peek_at(&self, offset: u64, max: usize) -> OstxResult<Vec<u8>> {
        self.inner.peek_at(offset, max)
    }

    /// Consumes `len` bytes, which must start at the current front of the stream.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::ValidationConflict`] if the front moved away from `offset`.
    pub fn consume_at(&self, offset: u64, len: usize) -> OstxResult<()> {
        self.inner.consume_at(offset, len)
    }

    /// Stream offset of the first byte not yet consumed.
    pub fn front(&self) -> u64 {
        self.inner.buffer.lock().front
    }

    /// Number of bytes pulled from the OS pipe and not yet consumed.
    pub fn buffered_len(&self) -> usize {
        self.inner.buffer.lock().bytes.len()
    }

    /// Writes every byte of `bytes` to the pipe.
    pub fn write_all(&self, bytes: &[u8]) -> OstxResult<()> {
        self.inner.write_all(bytes)
    }

    /// Closes the write end so readers see end of stream once the pipe is drained.
    pub fn close_writer(&self) {
        if self.inner.writer.lock().take().is_some() {
            log::debug!("Closed write end of pipe {}", self.inner.id);
        }
    }

    pub fn is_writer_closed(&self) -> bool {
        self.inner.writer.lock().is_none()
    }
}

impl std::fmt::Debug for PipePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipePair")
            .field("id", &self.inner.id)
            .field("front", &self.front())
            .field("buffered", &self.buffered_len())
            .finish()
    }
}

#[derive(Default)]
struct ReadBuffer {
    front: u64,
    bytes: VecDeque<u8>,
    eof: bool,
}

impl ReadBuffer {
    fn end(&self) -> u64 {
        self.front + self.bytes.len() as u64
    }
}

// Lock order is `reader` before `buffer`. The buffer lock is never held across a blocking
// read.
struct PipePairInner {
    id: u64,
    reader: Mutex<PipeReader>,
    writer: Mutex<Option<PipeWriter>>,
    buffer: Mutex<ReadBuffer>,
}

impl PipePairInner {
    fn read(&self, max: usize) -> OstxResult<Vec<u8>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        loop {
            let end = {
                let mut buffer = self.buffer.lock();
                if !buffer.bytes.is_empty() {
                    let n = max.min(buffer.bytes.len());
                    buffer.front += n as u64;
                    return Ok(buffer.bytes.drain(..n).collect());
                }
                if buffer.eof {
                    return Ok(Vec::new());
                }
                buffer.end()
            };
            self.fill(end)?;
        }
    }

    fn peek_at(&self, offset: u64, max: usize) -> OstxResult<Vec<u8>> {
        loop {
            let end = {
                let buffer = self.buffer.lock();
                if offset < buffer.front {
                    return Err(self.moved_front(offset, buffer.front));
                }
                let skip = (offset - buffer.front) as usize;
                if max == 0 {
                    return Ok(Vec::new());
                }
                if skip < buffer.bytes.len() {
                    let n = max.min(buffer.bytes.len() - skip);
                    return Ok(buffer.bytes.range(skip..skip + n).copied().collect());
                }
                if buffer.eof {
                    return Ok(Vec::new());
                }
                buffer.end()
            };
            self.fill(end)?;
        }
    }

    fn consume_at(&self, offset: u64, len: usize) -> OstxResult<()> {
        let mut buffer = self.buffer.lock();
        if buffer.front != offset {
            return Err(self.moved_front(offset, buffer.front));
        }
        if buffer.bytes.len() < len {
            return Err(OstxError::new(
                &format!(
                    "Pipe {} holds {} buffered bytes, {} requested",
                    self.id,
                    buffer.bytes.len(),
                    len
                ),
                ErrorKind::InternalError,
            ));
        }
        buffer.bytes.drain(..len);
        buffer.front += len as u64;
        Ok(())
    }

    /// Pulls the next chunk from the OS pipe, unless another caller already extended the
    /// buffer past `seen_end` while this one waited for the reader.
    fn fill(&self, seen_end: u64) -> OstxResult<()> {
        let mut reader = self.reader.lock();
        {
            let buffer = self.buffer.lock();
            if buffer.eof || buffer.end() != seen_end {
                return Ok(());
            }
        }

        let mut chunk = vec![0u8; FILL_CHUNK];
        let n = reader.read(&mut chunk)?;
        let mut buffer = self.buffer.lock();
        if n == 0 {
            buffer.eof = true;
        } else {
            buffer.bytes.extend(&chunk[..n]);
        }
        Ok(())
    }

    fn moved_front(&self, offset: u64, front: u64) -> OstxError {
        OstxError::new(
            &format!(
                "Bytes of pipe {} at offset {} were consumed, stream is at {}",
                self.id, offset, front
            ),
            ErrorKind::ValidationConflict,
        )
    }

    fn write_all(&self, bytes: &[u8]) -> OstxResult<()> {
        let mut writer = self.writer.lock();
        match writer.as_mut() {
            Some(w) => {
                w.write_all(bytes)?;
                w.flush()?;
                Ok(())
            }
            None => Err(OstxError::new(
                &format!("Write end of pipe {} is closed", self.id),
                ErrorKind::InvalidOperation,
            )),
        }
    }
}
