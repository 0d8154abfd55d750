//! File-service collaborator: chunk geometry, per-chunk digests, and lookups resolved outside the core lock.

use std::ops::Range;

use sha2::{Digest, Sha256};

use crate::protocol::{ByteRange, Message};

/// Default chunk size in bytes for files served by the swarm.
pub const DEFAULT_CHUNK_SIZE: u64 = 512;

/// Size and chunking of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub file_size: u64,
    pub base_chunk_size: u64,
    pub streaming: bool,
}

impl FileInfo {
    pub fn new(file_size: u64, base_chunk_size: u64) -> Self {
        Self {
            file_size,
            base_chunk_size,
            streaming: false,
        }
    }

    pub fn num_chunks(&self) -> usize {
        if self.base_chunk_size == 0 {
            return 0;
        }
        self.file_size.div_ceil(self.base_chunk_size) as usize
    }

    /// Chunk containing byte `offset`.
    pub fn chunk_index(&self, offset: u64) -> usize {
        if self.base_chunk_size == 0 {
            return 0;
        }
        (offset / self.base_chunk_size) as usize
    }

    /// Length of chunk `chunk`; the final chunk may be shorter, chunks past the end are empty.
    pub fn chunk_size(&self, chunk: usize) -> u64 {
        self.chunk_byte_range(chunk).len()
    }

    /// Byte range covered by chunk `chunk`, clamped to the file size.
    pub fn chunk_byte_range(&self, chunk: usize) -> ByteRange {
        let start = (chunk as u64)
            .saturating_mul(self.base_chunk_size)
            .min(self.file_size);
        let end = start
            .saturating_add(self.base_chunk_size)
            .min(self.file_size);
        ByteRange::new(start, end)
    }

    /// Chunks touched by a byte range. With `exclude_partial`, only chunks the range fully
    /// covers are returned (a range reaching the end of file covers the short final chunk).
    pub fn chunk_range_from_byte_range(
        &self,
        range: ByteRange,
        exclude_partial: bool,
    ) -> Range<usize> {
        let cs = self.base_chunk_size;
        let end = range.end.min(self.file_size);
        if cs == 0 || range.start >= end {
            return 0..0;
        }
        let (first, last) = if exclude_partial {
            let first = range.start.div_ceil(cs) as usize;
            let last = if end == self.file_size {
                self.num_chunks()
            } else {
                (end / cs) as usize
            };
            (first, last)
        } else {
            ((range.start / cs) as usize, end.div_ceil(cs) as usize)
        };
        let last = last.min(self.num_chunks());
        first.min(last)..last
    }
}

/// Read-only view of the files the swarm distributes. Implementations must be safe to
/// call from many tasks at once and hold no shared mutable state.
pub trait FileService: Send + Sync {
    fn get_info(&self, url: &str) -> Option<FileInfo>;

    /// Authoritative digest of one chunk, or `None` if the file or chunk can't be read.
    fn get_chunk_hash(&self, url: &str, chunk: usize) -> Option<String>;
}

/// Hash a chunk payload. Returns lowercase hex SHA-256.
pub fn hash_chunk(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// File-service results a message needs, fetched before the coordination lock is taken.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FileLookup {
    #[default]
    Nothing,
    Info(Option<FileInfo>),
    ChunkHash {
        info: Option<FileInfo>,
        chunk: usize,
        hash: Option<String>,
    },
}

impl FileLookup {
    /// Run the disk lookups `msg` will need. Cheap for messages that need none.
    pub fn resolve(files: &dyn FileService, msg: &Message) -> Self {
        match msg {
            Message::AskInfo { url }
            | Message::Request { url, .. }
            | Message::Provide { url, .. }
            | Message::Unrequest { url, .. }
            | Message::Unprovide { url, .. } => FileLookup::Info(files.get_info(url)),
            Message::Completed { url, range, .. } => {
                let info = files.get_info(url);
                let chunk = info.map(|i| i.chunk_index(range.start)).unwrap_or(0);
                let hash = info.and_then(|_| files.get_chunk_hash(url, chunk));
                FileLookup::ChunkHash { info, chunk, hash }
            }
            _ => FileLookup::Nothing,
        }
    }

    pub fn info(&self) -> Option<FileInfo> {
        match self {
            FileLookup::Info(info) | FileLookup::ChunkHash { info, .. } => *info,
            FileLookup::Nothing => None,
        }
    }

    /// Authoritative hash of `chunk`, if this lookup fetched that chunk.
    pub fn chunk_hash(&self, chunk: usize) -> Option<&str> {
        match self {
            FileLookup::ChunkHash {
                chunk: c,
                hash: Some(h),
                ..
            } if *c == chunk => Some(h.as_str()),
            _ => None,
        }
    }
}
