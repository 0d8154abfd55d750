//! Chunk state table: per-url state of every chunk a peer has asked for or offers.

use std::collections::HashMap;
use std::ops::Range;

/// State of one chunk for one peer. Exactly one holds per (url, chunk).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChunkState {
    #[default]
    None,
    Requested,
    Provided,
    Transferring,
}

/// Chunk counts for one url, for the status page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStats {
    pub url: String,
    pub chunks: usize,
    pub requested: usize,
    pub provided: usize,
    pub transferring: usize,
}

struct FileChunks {
    url: String,
    states: Vec<ChunkState>,
}

/// Per-peer table. Urls are kept in first-reference order so scans are deterministic.
#[derive(Default)]
pub struct ChunkTable {
    files: Vec<FileChunks>,
    index: HashMap<String, usize>,
}

impl ChunkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the state of every chunk in `range`, growing the table with `None` as needed.
    pub fn set_range(&mut self, url: &str, range: Range<usize>, state: ChunkState) {
        if range.is_empty() {
            return;
        }
        let file = self.file_mut(url);
        if file.states.len() < range.end {
            file.states.resize(range.end, ChunkState::None);
        }
        for s in &mut file.states[range] {
            *s = state;
        }
    }

    pub fn request(&mut self, url: &str, range: Range<usize>) {
        self.set_range(url, range, ChunkState::Requested);
    }

    pub fn provide(&mut self, url: &str, range: Range<usize>) {
        self.set_range(url, range, ChunkState::Provided);
    }

    pub fn transfer(&mut self, url: &str, chunk: usize) {
        self.set_range(url, chunk..chunk + 1, ChunkState::Transferring);
    }

    /// State of a chunk; `None` for any url or chunk never referenced.
    pub fn state(&self, url: &str, chunk: usize) -> ChunkState {
        self.index
            .get(url)
            .and_then(|&i| self.files[i].states.get(chunk).copied())
            .unwrap_or_default()
    }

    pub fn is_state(&self, url: &str, chunk: usize, state: ChunkState) -> bool {
        self.state(url, chunk) == state
    }

    pub fn is_provided(&self, url: &str, chunk: usize) -> bool {
        self.is_state(url, chunk, ChunkState::Provided)
    }

    /// First requested chunk in url order, then ascending index. No weighting beyond that.
    pub fn high_priority_chunk(&self) -> Option<(&str, usize)> {
        self.files.iter().find_map(|f| {
            f.states
                .iter()
                .position(|&s| s == ChunkState::Requested)
                .map(|i| (f.url.as_str(), i))
        })
    }

    /// Call `f` for every (url, chunk) currently in `state`.
    pub fn for_each_of_state(&self, state: ChunkState, mut f: impl FnMut(&str, usize)) {
        for file in &self.files {
            for (i, &s) in file.states.iter().enumerate() {
                if s == state {
                    f(&file.url, i);
                }
            }
        }
    }

    /// Per-url counts. `chunks` is the known file chunk count when given, else the table length.
    pub fn file_stats(&self, num_chunks: impl Fn(&str) -> Option<usize>) -> Vec<FileStats> {
        let mut stats: Vec<FileStats> = self
            .files
            .iter()
            .map(|f| FileStats {
                url: f.url.clone(),
                chunks: num_chunks(&f.url).unwrap_or(f.states.len()),
                requested: 0,
                provided: 0,
                transferring: 0,
            })
            .collect();
        for state in [
            ChunkState::Requested,
            ChunkState::Provided,
            ChunkState::Transferring,
        ] {
            self.for_each_of_state(state, |url, _| {
                let entry = &mut stats[self.index[url]];
                match state {
                    ChunkState::Requested => entry.requested += 1,
                    ChunkState::Provided => entry.provided += 1,
                    ChunkState::Transferring => entry.transferring += 1,
                    ChunkState::None => {}
                }
            });
        }
        stats
    }

    fn file_mut(&mut self, url: &str) -> &mut FileChunks {
        let i = match self.index.get(url) {
            Some(&i) => i,
            None => {
                self.files.push(FileChunks {
                    url: url.to_string(),
                    states: Vec::new(),
                });
                self.index.insert(url.to_string(), self.files.len() - 1);
                self.files.len() - 1
            }
        };
        &mut self.files[i]
    }
}
