use crate::debugger::frame::FrameRef;
use crate::debugger::source::{FileStat, SourceReader};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Trailing comment tag requesting exception suppression at its line.
static IGNORE_EXCEPTION_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^#]*#.*@IgnoreException").expect("valid regex"));

/// Exception payload of a trace event.
#[derive(Clone)]
pub struct ExceptionInfo {
    pub type_name: String,
    pub message: String,
    /// Propagation chain, absent on platforms that cannot provide it
    /// (then the whole exception-handling path is silently skipped).
    pub traceback: Option<Arc<TracebackEntry>>,
}

impl ExceptionInfo {
    pub fn new(
        type_name: impl Into<String>,
        message: impl Into<String>,
        traceback: Option<Arc<TracebackEntry>>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            traceback,
        }
    }
}

/// One link of an exception propagation chain, ordered from the frame
/// currently inspecting the exception towards the frame that raised it.
pub struct TracebackEntry {
    pub frame: FrameRef,
    pub line: u64,
    pub next: Option<Arc<TracebackEntry>>,
}

impl TracebackEntry {
    /// The chain has no further link, i.e. this is the frame where the
    /// exception was thrown, not a re-catch further up.
    pub fn just_raised(&self) -> bool {
        self.next.is_none()
    }

    /// Walk to the entry where the exception was raised.
    pub fn raise_site(self: Arc<Self>) -> Arc<Self> {
        let mut current = self;
        while let Some(next) = current.next.clone() {
            current = next;
        }
        current
    }
}

#[derive(Default)]
struct FileIgnoreState {
    stat: Option<FileStat>,
    lines: HashMap<u64, bool>,
}

/// Ignore-by-source-tag cache of the exception filter.
///
/// Owned by the engine instance. A per-file `line → ignored` classification,
/// invalidated wholesale when the file (size, mtime) snapshot changes.
/// An externally supplied override table takes precedence over the cache.
#[derive(Default)]
pub struct ExceptionFilter {
    lines_ignored: Mutex<HashMap<PathBuf, FileIgnoreState>>,
}

impl ExceptionFilter {
    /// Classify a source line. Not-yet-classified lines are read through
    /// `reader` and matched against the suppression tag; read failures are
    /// conservatively "not ignored".
    pub(super) fn is_line_ignored(
        &self,
        reader: &dyn SourceReader,
        overrides: Option<&HashMap<u64, bool>>,
        file: &Path,
        line: u64,
    ) -> bool {
        let mut cache = self.lines_ignored.lock().expect("unpoisoned");
        let entry = cache.entry(file.to_path_buf()).or_default();

        let current_stat = reader.stat(file).ok();
        if entry.stat != current_stat {
            entry.stat = current_stat;
            entry.lines.clear();
        }

        // check the merged view but update only the cache
        if let Some(ignored) = overrides.and_then(|o| o.get(&line)) {
            return *ignored;
        }
        if let Some(ignored) = entry.lines.get(&line) {
            return *ignored;
        }

        let ignored = reader
            .line(file, line)
            .ok()
            .flatten()
            .map(|text| IGNORE_EXCEPTION_TAG.is_match(&text))
            .unwrap_or(false);
        entry.lines.insert(line, ignored);
        ignored
    }
}
