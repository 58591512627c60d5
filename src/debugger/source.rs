use std::io;
use std::path::Path;
use std::time::SystemTime;

/// File snapshot used to invalidate per-file caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mtime: SystemTime,
}

/// Source-reading collaborator.
///
/// The engine reads source text to classify exception-suppression tags and
/// to translate template byte offsets to line numbers. An alternative
/// implementation may serve sources from a remote session cache.
pub trait SourceReader: Send + Sync {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// Single source line (1-based), `None` if the file has fewer lines.
    fn line(&self, path: &Path, line: u64) -> io::Result<Option<String>> {
        let text = self.read_to_string(path)?;
        Ok(text
            .lines()
            .nth(line.saturating_sub(1) as usize)
            .map(ToOwned::to_owned))
    }
}

/// Reader over the local filesystem.
#[derive(Default)]
pub struct FsSourceReader;

impl SourceReader for FsSourceReader {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = std::fs::metadata(path)?;
        Ok(FileStat {
            size: meta.len(),
            mtime: meta.modified()?,
        })
    }
}
