//! Incremental ZIP assembly.
//!
//! Entries are handed to a blocking worker over a bounded channel. The worker writes them
//! through [`ZipWriter`] into a [`Spool`] and forwards container bytes to an
//! [`ArchiveStream`] as soon as the writer can no longer seek back over them, so a consumer
//! can start transmitting before the last entry is known.

use crate::error::{HarvestError, Result};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Seek, SeekFrom, Write};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryCompression {
    Deflate,
    Store,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveOptions {
    pub compression: EntryCompression,
    /// Deflate level, 0-9. `None` uses the library default.
    pub level: Option<i32>,
    /// Output chunks buffered ahead of a slow consumer.
    pub chunk_buffer: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            compression: EntryCompression::Deflate,
            level: Some(9),
            chunk_buffer: 16,
        }
    }
}

impl ArchiveOptions {
    fn file_options(&self) -> FileOptions {
        let options = FileOptions::default().unix_permissions(0o644);
        match self.compression {
            EntryCompression::Deflate => options
                .compression_method(CompressionMethod::Deflated)
                .compression_level(self.level),
            EntryCompression::Store => options.compression_method(CompressionMethod::Stored),
        }
    }
}

/// A named payload appended to the archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveStats {
    pub entries: usize,
    pub uncompressed_bytes: u64,
    pub archive_bytes: u64,
}

/// Producer half of an archive under construction.
pub struct ArchiveAssembler {
    entries: mpsc::Sender<ArchiveEntry>,
    worker: JoinHandle<Result<ArchiveStats>>,
}

impl ArchiveAssembler {
    /// Start a new archive. Bytes appear on the returned stream while entries are appended.
    pub fn open(options: ArchiveOptions) -> (Self, ArchiveStream) {
        let (entry_tx, entry_rx) = mpsc::channel(1);
        let (chunk_tx, chunk_rx) = mpsc::channel(options.chunk_buffer.max(1));

        let worker = tokio::task::spawn_blocking(move || {
            let result = write_archive(entry_rx, &chunk_tx, &options);
            if let Err(ref e) = result {
                error!("Archive assembly failed: {}", e);
                let _ = chunk_tx.blocking_send(Err(io::Error::other(e.to_string())));
            }
            result
        });

        let assembler = Self {
            entries: entry_tx,
            worker,
        };
        let stream = ArchiveStream {
            inner: ReceiverStream::new(chunk_rx),
        };
        (assembler, stream)
    }

    /// Queue an entry. Fails only when the writer has already stopped; call
    /// [`finalize`](Self::finalize) to learn why.
    pub async fn append(&self, entry: ArchiveEntry) -> Result<()> {
        self.entries
            .send(entry)
            .await
            .map_err(|_| HarvestError::Archive("archive writer stopped".to_string()))
    }

    /// Write the central directory and end the output stream.
    pub async fn finalize(self) -> Result<ArchiveStats> {
        drop(self.entries);
        self.worker
            .await
            .map_err(|e| HarvestError::Unexpected(format!("archive worker failed: {}", e)))?
    }
}

fn write_archive(
    mut entries: mpsc::Receiver<ArchiveEntry>,
    output: &mpsc::Sender<io::Result<Vec<u8>>>,
    options: &ArchiveOptions,
) -> Result<ArchiveStats> {
    let spool = Spool::default();
    let mut zip = ZipWriter::new(spool.clone());
    let file_options = options.file_options();
    let mut stats = ArchiveStats::default();

    while let Some(entry) = entries.blocking_recv() {
        zip.start_file(entry.name.as_str(), file_options)?;
        zip.write_all(&entry.data)
            .map_err(|e| HarvestError::Archive(format!("writing {}: {}", entry.name, e)))?;

        stats.entries += 1;
        stats.uncompressed_bytes += entry.data.len() as u64;
        debug!("Archived {} ({} bytes)", entry.name, entry.data.len());

        stats.archive_bytes += forward(output, spool.take_settled())?;
    }

    zip.finish()?;
    stats.archive_bytes += forward(output, spool.take_all())?;

    debug!(
        "Archive finalized: {} entries, {} bytes",
        stats.entries, stats.archive_bytes
    );
    Ok(stats)
}

fn forward(output: &mpsc::Sender<io::Result<Vec<u8>>>, chunk: Vec<u8>) -> Result<u64> {
    if chunk.is_empty() {
        return Ok(0);
    }
    let len = chunk.len() as u64;
    output
        .blocking_send(Ok(chunk))
        .map_err(|_| HarvestError::Archive("archive consumer went away".to_string()))?;
    Ok(len)
}

/// Consumer half: the archive bytes in order.
pub struct ArchiveStream {
    inner: ReceiverStream<io::Result<Vec<u8>>>,
}

impl Stream for ArchiveStream {
    type Item = io::Result<Vec<u8>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl ArchiveStream {
    /// Buffer the whole archive.
    pub async fn collect_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    pub async fn write_to<W>(mut self, writer: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0u64;
        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }

    /// Drain and drop the bytes. Surfaces a writer failure if one happened.
    pub async fn discard(mut self) -> io::Result<u64> {
        let mut seen = 0u64;
        while let Some(chunk) = self.next().await {
            seen += chunk?.len() as u64;
        }
        Ok(seen)
    }
}

/// In-memory `Write + Seek` sink holding only the bytes that may still be rewritten.
///
/// The zip writer patches each local header once its entry is complete and then seeks
/// back to the end. That return seek marks every byte before it as settled; settled bytes
/// are handed out by [`Spool::take_settled`] and can never be sought to again.
#[derive(Clone, Default)]
struct Spool {
    state: Arc<Mutex<SpoolState>>,
}

#[derive(Default)]
struct SpoolState {
    buf: Vec<u8>,
    /// Offset of `buf[0]` in the archive.
    released: u64,
    pos: u64,
    settled: u64,
    rewound: bool,
}

impl SpoolState {
    fn end(&self) -> u64 {
        self.released + self.buf.len() as u64
    }
}

impl Spool {
    fn lock(&self) -> MutexGuard<'_, SpoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_settled(&self) -> Vec<u8> {
        let mut state = self.lock();
        let n = (state.settled - state.released) as usize;
        if n == 0 {
            return Vec::new();
        }
        let rest = state.buf.split_off(n);
        state.released = state.settled;
        std::mem::replace(&mut state.buf, rest)
    }

    fn take_all(&self) -> Vec<u8> {
        let mut state = self.lock();
        let end = state.end();
        state.released = end;
        state.settled = end;
        std::mem::take(&mut state.buf)
    }
}

impl Write for Spool {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.pos < state.released {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "write into bytes already emitted",
            ));
        }
        let offset = (state.pos - state.released) as usize;
        let overlap = (state.buf.len() - offset).min(data.len());
        state.buf[offset..offset + overlap].copy_from_slice(&data[..overlap]);
        state.buf.extend_from_slice(&data[overlap..]);
        state.pos += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for Spool {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut state = self.lock();
        let end = state.end();
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => end.checked_add_signed(delta),
            SeekFrom::Current(delta) => state.pos.checked_add_signed(delta),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek out of range"))?;

        if target < state.released {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "cannot seek into bytes already emitted",
            ));
        }
        if target > end {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek past end of archive",
            ));
        }

        if target < end {
            state.rewound = true;
        } else if state.rewound {
            state.rewound = false;
            state.settled = end;
        }
        state.pos = target;
        Ok(target)
    }
}
