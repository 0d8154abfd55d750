//! Disk-backed file service: maps `scheme://host/path` urls under a root directory.
//! Blocking; the transport calls it from `spawn_blocking`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;
use swarm_core::{hash_chunk, FileInfo, FileService};
use url::Url;

pub struct DiskFileService {
    root: PathBuf,
    chunk_size: u64,
}

impl DiskFileService {
    pub fn new(root: impl Into<PathBuf>, chunk_size: u64) -> Self {
        Self {
            root: root.into(),
            chunk_size,
        }
    }

    /// Local path for `url`: its decoded path segments joined under the root. `None` for
    /// unparseable urls, an empty path, or a segment that would leave the root.
    pub fn local_path(&self, url: &str) -> Option<PathBuf> {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(%url, error = %e, "unparseable url");
                return None;
            }
        };
        let mut path = self.root.clone();
        let mut depth = 0;
        for segment in parsed.path_segments()? {
            if segment.is_empty() {
                continue;
            }
            let decoded = percent_decode_str(segment).decode_utf8().ok()?;
            let mut components = Path::new(decoded.as_ref()).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(name)), None) => path.push(name),
                _ => {
                    tracing::debug!(%url, segment = %decoded, "rejecting path outside the file root");
                    return None;
                }
            }
            depth += 1;
        }
        (depth > 0).then_some(path)
    }
}

impl FileService for DiskFileService {
    fn get_info(&self, url: &str) -> Option<FileInfo> {
        let path = self.local_path(url)?;
        let meta = std::fs::metadata(&path).ok()?;
        if !meta.is_file() || meta.len() == 0 {
            return None;
        }
        Some(FileInfo::new(meta.len(), self.chunk_size))
    }

    fn get_chunk_hash(&self, url: &str, chunk: usize) -> Option<String> {
        let info = self.get_info(url)?;
        let range = info.chunk_byte_range(chunk);
        if range.is_empty() {
            return None;
        }
        let path = self.local_path(url)?;
        let read = || -> std::io::Result<Vec<u8>> {
            let mut file = File::open(&path)?;
            file.seek(SeekFrom::Start(range.start))?;
            let mut buf = vec![0u8; range.len() as usize];
            file.read_exact(&mut buf)?;
            Ok(buf)
        };
        match read() {
            Ok(data) => Some(hash_chunk(&data)),
            Err(e) => {
                tracing::warn!(%url, chunk, error = %e, "failed to read chunk");
                None
            }
        }
    }
}
