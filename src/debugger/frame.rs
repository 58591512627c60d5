use crate::debugger::template::{RenderCall, RenderContext};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Shared handle to a frame. The tracer never owns frame lifetime, it always
/// deals with handles borrowed from the host runtime.
pub type FrameRef = Arc<Frame>;

/// Frame identity, stable while the host keeps the frame alive.
/// All "is exactly that frame" anchors in step state use it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

impl FrameId {
    pub fn of(frame: &FrameRef) -> FrameId {
        FrameId(Arc::as_ptr(frame) as usize)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Host runtime value visible to the tracer: condition results,
/// local bindings and template context entries.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Unit => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("()"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

/// Frame flavor.
pub enum FrameKind {
    /// Ordinary interpreter frame.
    Native,
    /// The engine own top-level run harness. Returning into it means
    /// that stepping for this thread is finished.
    Harness,
    /// Native frame that enters the template renderer, carries the render
    /// call description (source handle + layered context).
    Render(RenderCall),
    /// Synthetic frame constructed by the frame bridge, wraps a real render
    /// frame as its back-reference.
    Template(RenderContext),
}

/// One entry of a call chain.
pub struct Frame {
    code_name: String,
    file: PathBuf,
    line: AtomicU64,
    locals: Mutex<HashMap<String, Value>>,
    back: Option<FrameRef>,
    kind: FrameKind,
    trace_enabled: AtomicBool,
}

impl Frame {
    pub fn new(
        code_name: impl Into<String>,
        file: impl Into<PathBuf>,
        line: u64,
        back: Option<FrameRef>,
    ) -> FrameRef {
        Self::with_kind(code_name, file, line, back, FrameKind::Native)
    }

    pub fn new_harness(file: impl Into<PathBuf>, back: Option<FrameRef>) -> FrameRef {
        Self::with_kind("run", file, 0, back, FrameKind::Harness)
    }

    pub fn new_render(
        code_name: impl Into<String>,
        file: impl Into<PathBuf>,
        line: u64,
        back: Option<FrameRef>,
        call: RenderCall,
    ) -> FrameRef {
        Self::with_kind(code_name, file, line, back, FrameKind::Render(call))
    }

    pub(super) fn with_kind(
        code_name: impl Into<String>,
        file: impl Into<PathBuf>,
        line: u64,
        back: Option<FrameRef>,
        kind: FrameKind,
    ) -> FrameRef {
        Arc::new(Frame {
            code_name: code_name.into(),
            file: file.into(),
            line: AtomicU64::new(line),
            locals: Mutex::default(),
            back,
            kind,
            trace_enabled: AtomicBool::new(true),
        })
    }

    pub fn code_name(&self) -> &str {
        &self.code_name
    }

    /// Function name with the top-level (module) scope normalized to an
    /// empty name, suitable for breakpoint context matching.
    pub fn scope_name(&self) -> &str {
        match self.code_name.as_str() {
            "?" | "<module>" => "",
            name => name,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn line(&self) -> u64 {
        self.line.load(Ordering::Acquire)
    }

    /// Update the frame line counter. Called by the host before every Line
    /// event and by SET_NEXT_STATEMENT jump semantics.
    pub fn set_line(&self, line: u64) {
        self.line.store(line, Ordering::Release)
    }

    pub fn back(&self) -> Option<&FrameRef> {
        self.back.as_ref()
    }

    pub fn kind(&self) -> &FrameKind {
        &self.kind
    }

    pub fn is_harness(&self) -> bool {
        matches!(self.kind, FrameKind::Harness)
    }

    pub fn render_call(&self) -> Option<&RenderCall> {
        match &self.kind {
            FrameKind::Render(call) => Some(call),
            _ => None,
        }
    }

    pub fn local(&self, name: &str) -> Option<Value> {
        self.locals.lock().expect("unpoisoned").get(name).cloned()
    }

    pub fn set_local(&self, name: impl Into<String>, value: Value) {
        self.locals
            .lock()
            .expect("unpoisoned")
            .insert(name.into(), value);
    }

    pub fn locals_snapshot(&self) -> HashMap<String, Value> {
        self.locals.lock().expect("unpoisoned").clone()
    }

    pub(super) fn replace_locals(&self, locals: HashMap<String, Value>) {
        *self.locals.lock().expect("unpoisoned") = locals;
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace_enabled.load(Ordering::Acquire)
    }

    pub fn disable_trace(&self) {
        self.trace_enabled.store(false, Ordering::Release)
    }

    /// Re-arm tracing for this frame and all its ancestors. Used after a
    /// caught-exception stop so suspension keeps working above this frame.
    pub fn enable_trace_with_parents(&self) {
        self.trace_enabled.store(true, Ordering::Release);
        let mut current = self.back().cloned();
        while let Some(frame) = current {
            frame.trace_enabled.store(true, Ordering::Release);
            current = frame.back().cloned();
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("code_name", &self.code_name)
            .field("file", &self.file)
            .field("line", &self.line())
            .finish_non_exhaustive()
    }
}
