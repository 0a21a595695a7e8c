//! Chunked file-transfer reassembly
//!
//! A file arrives as a sequence of byte-range-tagged chunks on a
//! message-oriented data channel. [`FileTransferReassembler`] turns that
//! sequence into a completed file under the configured download directory,
//! with collision-safe naming and SHA-1 verification against the declared
//! hash.
//!
//! # Known limitation
//!
//! The algorithm assumes chunks arrive in increasing, non-overlapping order
//! and that the chunk flagged terminal is the last one received. It performs
//! no gap or overlap tracking, so a reordered delivery can produce a file
//! that passes the byte counter but fails the hash check. This mirrors the
//! behavior of the protocol engines it was written against and is kept
//! as-is deliberately; a range-set tracker would change completion
//! semantics.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::console::Console;
use crate::engine::StreamId;
use crate::error::{ClientError, ClientResult};

/// Declared metadata of a transferred file
///
/// Immutable once a transfer starts; everything in here comes from the
/// remote party's offer, not from the bytes actually received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSelector {
    /// File name (base name, no directories)
    pub name: String,
    /// Declared total size in bytes, when the sender stated one
    pub size: Option<u64>,
    /// Declared content type
    pub content_type: String,
    /// Declared content hash in `sha-1:AA:BB:..` form
    pub hash: Option<String>,
}

impl FileSelector {
    /// Create a selector with just a name and content type
    pub fn new(name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            content_type: content_type.into(),
            hash: None,
        }
    }

    /// Set the declared size
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the declared hash
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }
}

impl fmt::Display for FileSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            Some(size) => write!(f, "'{}' ({})", self.name, format_file_size(size)),
            None => write!(f, "'{}'", self.name),
        }
    }
}

/// One unit of a message-oriented data transfer
///
/// Byte ranges are 1-based and inclusive, matching the wire convention of
/// the data channel; a chunk covering the first ten bytes has
/// `range_start == 1` and `range_end == 10`.
#[derive(Debug, Clone)]
pub struct MessageChunk {
    /// First byte position covered by this chunk (1-based)
    pub range_start: u64,
    /// Last byte position covered by this chunk (1-based, inclusive)
    pub range_end: u64,
    /// Declared total size of the enclosing message, when known
    pub total: Option<u64>,
    /// Content type of the enclosing message
    pub content_type: String,
    /// Identifier of the enclosing message; chunks of one message share it
    pub message_id: String,
    /// Payload bytes
    pub payload: Bytes,
    /// Whether this chunk closes the message
    pub terminal: bool,
}

/// What the reassembler decided about a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkDisposition {
    /// Applied to an active transfer, or silently dropped as foreign
    Consumed,
    /// Not file content for this stream; render it as an ordinary message
    NotFilePayload,
}

/// Mutable reassembly progress for one incoming file stream
#[derive(Debug)]
struct FileTransferState {
    file: File,
    path: PathBuf,
    message_id: String,
    written: u64,
}

/// Shared transfer progress counters, keyed by stream identity
///
/// The reassembler publishes received-byte counts here and the delivery
/// handler publishes sent-byte high-water marks; session descriptors read
/// both to render percentages. Keeping the counters outside the stream
/// objects keeps streams plain data.
#[derive(Debug, Clone, Default)]
pub struct TransferProgress {
    received: Arc<DashMap<StreamId, u64>>,
    sent: Arc<DashMap<StreamId, u64>>,
}

impl TransferProgress {
    /// Create an empty progress table
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received so far on an incoming file stream
    pub fn received(&self, stream: StreamId) -> Option<u64> {
        self.received.get(&stream).map(|entry| *entry)
    }

    /// Bytes confirmed delivered so far on an outgoing file stream
    pub fn sent(&self, stream: StreamId) -> Option<u64> {
        self.sent.get(&stream).map(|entry| *entry)
    }

    pub(crate) fn set_received(&self, stream: StreamId, bytes: u64) {
        self.received.insert(stream, bytes);
    }

    /// Record a delivery report; the counter only ever moves forward
    pub(crate) fn record_delivered(&self, stream: StreamId, range_end: u64) {
        let mut entry = self.sent.entry(stream).or_insert(0);
        if *entry < range_end {
            *entry = range_end;
        }
    }
}

/// Turns an ordered chunk sequence into a completed file on local storage
pub struct FileTransferReassembler {
    download_dir: PathBuf,
    console: Arc<dyn Console>,
    progress: TransferProgress,
    active: Mutex<HashMap<StreamId, FileTransferState>>,
}

impl FileTransferReassembler {
    /// Create a reassembler writing into `download_dir`
    pub fn new(
        download_dir: impl Into<PathBuf>,
        console: Arc<dyn Console>,
        progress: TransferProgress,
    ) -> Self {
        Self {
            download_dir: download_dir.into(),
            console,
            progress,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Apply one chunk to the transfer running on `stream`
    ///
    /// The first matching chunk starts the transfer: it must carry the
    /// selector's content type and either no declared total or one equal to
    /// the selector's size, otherwise the chunk is content wrapped for a
    /// different purpose and is handed back as [`NotFilePayload`].
    /// Once a transfer is running, chunks whose message identifier differs
    /// from the recorded one are silently ignored; they belong to an
    /// interleaved, unrelated message.
    ///
    /// [`NotFilePayload`]: ChunkDisposition::NotFilePayload
    pub fn handle_chunk(
        &self,
        stream: StreamId,
        selector: &FileSelector,
        chunk: &MessageChunk,
    ) -> ClientResult<ChunkDisposition> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| ClientError::internal("transfer state poisoned"))?;

        let state = match active.entry(stream) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let type_matches = chunk.content_type == selector.content_type;
                let size_matches = chunk.total.is_none() || chunk.total == selector.size;
                if !type_matches || !size_matches {
                    return Ok(ChunkDisposition::NotFilePayload);
                }
                fs::create_dir_all(&self.download_dir)?;
                let path = collision_free_path(&self.download_dir, &selector.name)?;
                let file = File::create(&path)?;
                tracing::debug!(stream = %stream, path = %path.display(), "transfer started");
                entry.insert(FileTransferState {
                    file,
                    path,
                    message_id: chunk.message_id.clone(),
                    written: 0,
                })
            }
        };

        if state.message_id != chunk.message_id {
            tracing::debug!(stream = %stream, "ignoring chunk from unrelated message");
            return Ok(ChunkDisposition::Consumed);
        }

        state
            .file
            .seek(SeekFrom::Start(chunk.range_start.saturating_sub(1)))?;
        state.file.write_all(&chunk.payload)?;
        state.written += chunk.payload.len() as u64;
        self.progress.set_received(stream, state.written);

        if chunk.terminal {
            // Assumes this chunk arrives last; see the module-level limitation.
            let state = active
                .remove(&stream)
                .ok_or_else(|| ClientError::internal("transfer state vanished"))?;
            drop(state.file);
            self.console.print(&format!(
                "Finished downloading {} to {}",
                selector,
                state.path.display()
            ));
            let actual = sha1_of_file(&state.path)?;
            if let Some(expected) = &selector.hash {
                if expected != &actual {
                    tracing::warn!(
                        expected = %expected,
                        actual = %actual,
                        "download hash mismatch"
                    );
                    self.console.print(&format!(
                        "Hash mismatch: expected {} calculated {}",
                        expected, actual
                    ));
                }
            }
        }

        Ok(ChunkDisposition::Consumed)
    }

    /// Shared progress table fed by this reassembler
    pub fn progress(&self) -> &TransferProgress {
        &self.progress
    }
}

/// Pick a destination path under `dir` that does not collide
///
/// `report.txt` is used as-is when free; otherwise numeric suffixes are
/// tried (`report.txt.1`, `report.txt.2`, ..) continuing after the highest
/// suffix already present.
pub fn collision_free_path(dir: &Path, name: &str) -> ClientResult<PathBuf> {
    let base = Path::new(name)
        .file_name()
        .ok_or_else(|| ClientError::command(format!("Invalid file name {:?}", name)))?;
    let path = dir.join(base);
    if !path.exists() {
        return Ok(path);
    }
    let mut highest = 0u32;
    if let Some(stem) = path.file_name().and_then(|n| n.to_str()) {
        for entry in fs::read_dir(dir)?.flatten() {
            let candidate = entry.file_name();
            let Some(candidate) = candidate.to_str() else {
                continue;
            };
            if let Some(suffix) = candidate
                .strip_prefix(stem)
                .and_then(|rest| rest.strip_prefix('.'))
            {
                if let Ok(n) = suffix.parse::<u32>() {
                    highest = highest.max(n);
                }
            }
        }
    }
    let mut candidate = PathBuf::from(format!("{}.{}", path.display(), highest + 1));
    // read_dir can miss freshly created names; walk forward until free.
    while candidate.exists() {
        highest += 1;
        candidate = PathBuf::from(format!("{}.{}", path.display(), highest + 1));
    }
    Ok(candidate)
}

/// Format a digest as `sha-1:` plus colon-separated uppercase hex bytes
pub fn format_sha1_digest(digest: &[u8]) -> String {
    let hex: Vec<String> = digest.iter().map(|byte| format!("{:02X}", byte)).collect();
    format!("sha-1:{}", hex.join(":"))
}

/// Compute the SHA-1 of a file in the transfer hash format
pub fn sha1_of_file(path: &Path) -> ClientResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; 100_000];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format_sha1_digest(&hasher.finalize()))
}

/// Render a byte count for humans
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [(u64, &str); 3] = [
        (1_000_000_000, "GB"),
        (1_000_000, "MB"),
        (1_000, "KB"),
    ];
    for (factor, unit) in UNITS {
        if bytes >= factor {
            return format!("{:.1} {}", bytes as f64 / factor as f64, unit);
        }
    }
    format!("{} B", bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockConsole;

    fn chunk(
        message_id: &str,
        start: u64,
        payload: &[u8],
        total: Option<u64>,
        terminal: bool,
    ) -> MessageChunk {
        MessageChunk {
            range_start: start,
            range_end: start + payload.len() as u64 - 1,
            total,
            content_type: "text/plain".to_string(),
            message_id: message_id.to_string(),
            payload: Bytes::copy_from_slice(payload),
            terminal,
        }
    }

    fn selector_for(data: &[u8]) -> FileSelector {
        let mut hasher = Sha1::new();
        hasher.update(data);
        FileSelector::new("report.txt", "text/plain")
            .with_size(data.len() as u64)
            .with_hash(format_sha1_digest(&hasher.finalize()))
    }

    #[test]
    fn in_order_chunks_reassemble_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let console = Arc::new(MockConsole::new());
        let reassembler = FileTransferReassembler::new(
            dir.path(),
            console.clone(),
            TransferProgress::new(),
        );

        let data = b"hello, chunked world";
        let selector = selector_for(data);
        let stream = StreamId::new();

        let (first, second) = data.split_at(8);
        let d1 = reassembler
            .handle_chunk(stream, &selector, &chunk("m1", 1, first, Some(data.len() as u64), false))
            .unwrap();
        assert_eq!(d1, ChunkDisposition::Consumed);
        assert_eq!(reassembler.progress().received(stream), Some(8));

        let d2 = reassembler
            .handle_chunk(stream, &selector, &chunk("m1", 9, second, None, true))
            .unwrap();
        assert_eq!(d2, ChunkDisposition::Consumed);

        let written = fs::read(dir.path().join("report.txt")).unwrap();
        assert_eq!(written, data);
        // No mismatch warning was printed.
        assert!(!console.printed_contains("Hash mismatch"));
        assert!(console.printed_contains("Finished downloading"));
    }

    #[test]
    fn corrupted_payload_warns_but_completes() {
        let dir = tempfile::tempdir().unwrap();
        let console = Arc::new(MockConsole::new());
        let reassembler = FileTransferReassembler::new(
            dir.path(),
            console.clone(),
            TransferProgress::new(),
        );

        let data = b"original content";
        let selector = selector_for(data);
        let stream = StreamId::new();

        let mut corrupted = data.to_vec();
        corrupted[3] ^= 0xff;
        let result = reassembler.handle_chunk(
            stream,
            &selector,
            &chunk("m1", 1, &corrupted, Some(data.len() as u64), true),
        );
        // The transfer still completes; the mismatch is only a warning.
        assert_eq!(result.unwrap(), ChunkDisposition::Consumed);
        assert!(console.printed_contains("Hash mismatch"));
        assert!(dir.path().join("report.txt").exists());
    }

    #[test]
    fn foreign_message_id_never_touches_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let console = Arc::new(MockConsole::new());
        let reassembler = FileTransferReassembler::new(
            dir.path(),
            console,
            TransferProgress::new(),
        );

        let data = b"abcdefgh";
        let selector = selector_for(data);
        let stream = StreamId::new();

        reassembler
            .handle_chunk(stream, &selector, &chunk("m1", 1, &data[..4], Some(8), false))
            .unwrap();
        let disposition = reassembler
            .handle_chunk(stream, &selector, &chunk("other", 5, b"XXXX", Some(8), false))
            .unwrap();
        assert_eq!(disposition, ChunkDisposition::Consumed);
        assert_eq!(reassembler.progress().received(stream), Some(4));

        reassembler
            .handle_chunk(stream, &selector, &chunk("m1", 5, &data[4..], None, true))
            .unwrap();
        assert_eq!(fs::read(dir.path().join("report.txt")).unwrap(), data);
    }

    #[test]
    fn mismatched_first_chunk_is_not_file_payload() {
        let dir = tempfile::tempdir().unwrap();
        let console = Arc::new(MockConsole::new());
        let reassembler = FileTransferReassembler::new(
            dir.path(),
            console,
            TransferProgress::new(),
        );

        let selector = FileSelector::new("report.txt", "application/pdf").with_size(100);
        let stream = StreamId::new();
        // text/plain against a pdf selector: content wrapped for another purpose.
        let disposition = reassembler
            .handle_chunk(stream, &selector, &chunk("m1", 1, b"hi", None, false))
            .unwrap();
        assert_eq!(disposition, ChunkDisposition::NotFilePayload);

        // Declared total disagreeing with the selector size is rejected too.
        let selector = FileSelector::new("report.txt", "text/plain").with_size(100);
        let disposition = reassembler
            .handle_chunk(stream, &selector, &chunk("m1", 1, b"hi", Some(5), false))
            .unwrap();
        assert_eq!(disposition, ChunkDisposition::NotFilePayload);
    }

    #[test]
    fn collision_suffixes_count_upwards() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            collision_free_path(dir.path(), "report.txt").unwrap(),
            dir.path().join("report.txt")
        );

        fs::write(dir.path().join("report.txt"), b"x").unwrap();
        assert_eq!(
            collision_free_path(dir.path(), "report.txt").unwrap(),
            dir.path().join("report.txt.1")
        );

        fs::write(dir.path().join("report.txt.1"), b"x").unwrap();
        assert_eq!(
            collision_free_path(dir.path(), "report.txt").unwrap(),
            dir.path().join("report.txt.2")
        );
    }

    #[test]
    fn collision_path_strips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = collision_free_path(dir.path(), "/etc/passwd").unwrap();
        assert_eq!(path, dir.path().join("passwd"));
    }

    #[test]
    fn sha1_format_matches_contract() {
        assert_eq!(format_sha1_digest(&[0x0a, 0xff, 0x00]), "sha-1:0A:FF:00");
    }

    #[test]
    fn file_sizes_format_for_humans() {
        assert_eq!(format_file_size(532), "532 B");
        assert_eq!(format_file_size(4_200), "4.2 KB");
        assert_eq!(format_file_size(1_300_000), "1.3 MB");
        assert_eq!(format_file_size(2_000_000_000), "2.0 GB");
    }
}
