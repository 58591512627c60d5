use crate::debugger::error::Error;
use crate::debugger::frame::{Frame, FrameKind, FrameRef, Value};
use crate::debugger::source::SourceReader;
use crate::muted_error;
use log::{debug, warn};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Code name of synthetic frames built by the bridge.
pub const TEMPLATE_FRAME_NAME: &str = "<template>";

/// Renderer internal entry points that resolve a template variable into
/// interpreter code. STEP_INTO from a template stops only when execution
/// lands below one of these.
const RESOLVE_ENTRIES: [&str; 2] = ["resolve", "resolve_lookup"];

/// Context-lookup helpers of the renderer, not interesting as step targets.
const CONTEXT_LOOKUP_ENTRIES: [&str; 1] = ["get"];

/// Renderer boundary functions where a template-level exception is
/// recognized as such.
const EXCEPTION_BREAK_ENTRIES: [&str; 2] = ["resolve_lookup", "find_template"];

/// Error types the renderer raises for broken templates.
const TEMPLATE_ERROR_TYPES: [&str; 3] = [
    "VariableDoesNotExist",
    "TemplateDoesNotExist",
    "TemplateSyntaxError",
];

/// Placeholder the renderer reports when a template origin is unknown.
const UNKNOWN_SOURCE: &str = "<unknown source>";

static TEMPLATE_SOURCE_WARN: OnceCell<()> = OnceCell::new();

/// Renderer source handle: the template origin plus the byte offset of the
/// node currently being rendered.
#[derive(Debug, Clone)]
pub struct TemplateSource {
    pub origin: String,
    pub offset: usize,
}

/// Layered variable scope of the renderer. Layers are shared with the host,
/// later layers override earlier ones on lookup.
#[derive(Clone, Default)]
pub struct RenderContext {
    layers: Vec<Arc<Mutex<HashMap<String, Value>>>>,
}

impl RenderContext {
    pub fn push_layer(&mut self, layer: HashMap<String, Value>) {
        self.layers.push(Arc::new(Mutex::new(layer)));
    }

    /// Flatten the context stack into a single binding map.
    pub fn flatten(&self) -> HashMap<String, Value> {
        let mut bindings = HashMap::new();
        for layer in &self.layers {
            bindings.extend(layer.lock().expect("unpoisoned").clone());
        }
        bindings
    }

    /// Write `value` into every layer that already defines `name`.
    pub fn set_existing(&self, name: &str, value: &Value) {
        for layer in &self.layers {
            let mut layer = layer.lock().expect("unpoisoned");
            if layer.contains_key(name) {
                layer.insert(name.to_string(), value.clone());
            }
        }
    }

    pub fn layer_value(&self, layer: usize, name: &str) -> Option<Value> {
        self.layers
            .get(layer)?
            .lock()
            .expect("unpoisoned")
            .get(name)
            .cloned()
    }
}

/// Description of one render call, attached by the host to the native frame
/// that enters the renderer.
#[derive(Clone)]
pub struct RenderCall {
    pub source: Option<TemplateSource>,
    pub context: RenderContext,
}

/// Translate a byte offset inside template text to a 1-based line number.
/// Supports "\n", "\r" and "\r\n" line conventions. `None` if the offset
/// is out of the text range.
pub fn offset_to_line(text: &str, offset: usize) -> Option<u64> {
    let bytes = text.as_bytes();
    let mut line = 1u64;
    let mut cursor = 0usize;
    while cursor < offset {
        if cursor == bytes.len() {
            return None;
        }
        match bytes[cursor] {
            b'\n' => line += 1,
            b'\r' => {
                line += 1;
                if bytes.get(cursor + 1) == Some(&b'\n') {
                    cursor += 1;
                }
            }
            _ => {}
        }
        cursor += 1;
    }
    Some(line)
}

/// Resolve the template file from the renderer source handle.
pub fn template_file(call: &RenderCall) -> Result<PathBuf, Error> {
    let source = match &call.source {
        Some(source) => source,
        None => {
            if TEMPLATE_SOURCE_WARN.set(()).is_ok() {
                warn!(
                    target: "template",
                    "template path is not available, enable template debug info \
                     in the renderer to make template breakpoints work"
                );
            }
            return Err(Error::TemplateSourceUnavailable);
        }
    };
    if source.origin == UNKNOWN_SOURCE {
        debug!(target: "template", "template source name is {UNKNOWN_SOURCE}");
        return Err(Error::TemplateSourceUnavailable);
    }
    Ok(PathBuf::from(&source.origin))
}

/// Current line inside the template, 0 means unknown.
pub fn template_line(reader: &dyn SourceReader, file: &Path, offset: usize) -> u64 {
    match muted_error!(reader.read_to_string(file), "read template:") {
        Some(text) => offset_to_line(&text, offset).unwrap_or(0),
        None => 0,
    }
}

/// Construct a synthetic frame for a template position: translated source
/// file and line, flattened context as local bindings, the real render frame
/// as the back-reference.
pub fn build_template_frame(
    reader: &dyn SourceReader,
    render_frame: &FrameRef,
) -> Result<FrameRef, Error> {
    let call = render_frame
        .render_call()
        .ok_or(Error::TemplateSourceUnavailable)?;
    let file = template_file(call)?;
    let offset = call.source.as_ref().map(|s| s.offset).unwrap_or(0);
    let line = template_line(reader, &file, offset);

    let frame = Frame::with_kind(
        TEMPLATE_FRAME_NAME,
        file,
        line,
        Some(render_frame.clone()),
        FrameKind::Template(call.context.clone()),
    );
    frame.replace_locals(call.context.flatten());
    Ok(frame)
}

impl Frame {
    /// Set-variable entry point. On a synthetic template frame the value is
    /// written into every context layer that already defines the name, and
    /// into the frame own binding set; on native frames only the local
    /// binding changes.
    pub fn change_variable(&self, name: &str, value: Value) {
        if let FrameKind::Template(context) = self.kind() {
            context.set_existing(name, &value);
        }
        self.set_local(name, value);
    }
}

pub(super) fn is_render_frame(frame: &Frame) -> bool {
    frame.render_call().is_some()
}

pub(super) fn is_resolve_frame(frame: &Frame) -> bool {
    RESOLVE_ENTRIES.contains(&frame.code_name())
}

pub(super) fn is_context_lookup_frame(frame: &Frame) -> bool {
    CONTEXT_LOOKUP_ENTRIES.contains(&frame.code_name())
}

/// Is an exception occurring inside template variable resolution or
/// template loading.
pub(super) fn is_template_exception_context(frame: &Frame) -> bool {
    EXCEPTION_BREAK_ENTRIES.contains(&frame.code_name())
}

pub(super) fn is_template_error(type_name: &str) -> bool {
    TEMPLATE_ERROR_TYPES.contains(&type_name)
}

/// Nearest render call on the chain starting at `frame`.
pub(super) fn find_render_frame(frame: &FrameRef) -> Option<FrameRef> {
    let mut current = Some(frame.clone());
    while let Some(candidate) = current {
        if is_render_frame(&candidate) {
            return Some(candidate);
        }
        current = candidate.back().cloned();
    }
    None
}
