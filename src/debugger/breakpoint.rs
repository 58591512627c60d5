use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Breakpoints of one source file, keyed by line.
pub type LineBreakpoints = IndexMap<u64, Arc<Breakpoint>>;

/// Line breakpoint representation.
#[derive(Debug)]
pub struct Breakpoint {
    pub file: PathBuf,
    pub line: u64,
    func_name: Option<String>,
    condition: Option<String>,
    expression: Option<String>,
    enabled: AtomicBool,
    one_shot: bool,
}

impl Breakpoint {
    pub fn new(file: impl Into<PathBuf>, line: u64) -> Self {
        Self {
            file: file.into(),
            line,
            func_name: None,
            condition: None,
            expression: None,
            enabled: AtomicBool::new(true),
            one_shot: false,
        }
    }

    /// Restrict the breakpoint to a function scope. Without a filter the
    /// breakpoint is global and hits in any function of the file.
    pub fn with_func_name(mut self, name: impl Into<String>) -> Self {
        self.func_name = Some(name.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    /// One-shot breakpoints disarm themselves on a first hit.
    pub fn one_shot(mut self) -> Self {
        self.one_shot = true;
        self
    }

    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }

    pub fn expression(&self) -> Option<&str> {
        self.expression.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release)
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release)
    }

    /// Scope match: an empty (absent) filter matches any function.
    pub fn matches_scope(&self, scope_name: &str) -> bool {
        match self.func_name.as_deref() {
            None | Some("") => true,
            Some(name) => name == scope_name,
        }
    }

    /// Check that the breakpoint is armed, a one-shot disarms itself here.
    /// The swap makes the check race-safe when several threads pass the
    /// same line simultaneously.
    pub fn take_hit(&self) -> bool {
        if self.one_shot {
            self.enabled.swap(false, Ordering::AcqRel)
        } else {
            self.enabled.load(Ordering::Acquire)
        }
    }
}

/// Exception breakpoint: stop when an exception of this type is raised.
#[derive(Debug, Clone)]
pub struct ExceptionBreakpoint {
    pub type_name: String,
    /// Notify only at the frame where the exception was thrown,
    /// not on every re-examination further up the propagation chain.
    pub notify_on_first_raise_only: bool,
}

impl ExceptionBreakpoint {
    pub fn new(type_name: impl Into<String>, notify_on_first_raise_only: bool) -> Self {
        Self {
            type_name: type_name.into(),
            notify_on_first_raise_only,
        }
    }
}

/// Shared breakpoint table.
///
/// Mutated by the external session, read concurrently by every dispatching
/// thread. Per-file maps are stored behind an `Arc` and swapped wholesale on
/// mutation (last-writer-wins), so a dispatch in flight keeps a consistent
/// snapshot while writers never block the hot path for long.
#[derive(Default)]
pub struct BreakpointRegistry {
    line: RwLock<HashMap<PathBuf, Arc<LineBreakpoints>>>,
    template: RwLock<HashMap<PathBuf, Arc<LineBreakpoints>>>,
    exception: RwLock<Vec<Arc<ExceptionBreakpoint>>>,
    template_exception_break: AtomicBool,
    /// Externally supplied "ignore exceptions at those lines" table, takes
    /// precedence over the tag classification cache of the exception filter.
    exception_lines_ignored: RwLock<HashMap<PathBuf, Arc<HashMap<u64, bool>>>>,
}

impl BreakpointRegistry {
    pub fn add(&self, brkpt: Breakpoint) -> Arc<Breakpoint> {
        Self::add_to(&self.line, brkpt)
    }

    pub fn remove(&self, file: &Path, line: u64) -> Option<Arc<Breakpoint>> {
        Self::remove_from(&self.line, file, line)
    }

    pub fn add_template(&self, brkpt: Breakpoint) -> Arc<Breakpoint> {
        Self::add_to(&self.template, brkpt)
    }

    pub fn remove_template(&self, file: &Path, line: u64) -> Option<Arc<Breakpoint>> {
        Self::remove_from(&self.template, file, line)
    }

    fn add_to(
        table: &RwLock<HashMap<PathBuf, Arc<LineBreakpoints>>>,
        brkpt: Breakpoint,
    ) -> Arc<Breakpoint> {
        let brkpt = Arc::new(brkpt);
        let mut table = table.write().expect("unpoisoned");
        let mut for_file = table
            .get(&brkpt.file)
            .map(|m| (**m).clone())
            .unwrap_or_default();
        for_file.insert(brkpt.line, brkpt.clone());
        table.insert(brkpt.file.clone(), Arc::new(for_file));
        brkpt
    }

    fn remove_from(
        table: &RwLock<HashMap<PathBuf, Arc<LineBreakpoints>>>,
        file: &Path,
        line: u64,
    ) -> Option<Arc<Breakpoint>> {
        let mut table = table.write().expect("unpoisoned");
        let mut for_file = (**table.get(file)?).clone();
        let removed = for_file.shift_remove(&line);
        if for_file.is_empty() {
            table.remove(file);
        } else {
            table.insert(file.to_path_buf(), Arc::new(for_file));
        }
        removed
    }

    /// Breakpoint map snapshot for a file, `None` if the file has no
    /// breakpoints at all.
    pub fn for_file(&self, file: &Path) -> Option<Arc<LineBreakpoints>> {
        self.line.read().expect("unpoisoned").get(file).cloned()
    }

    pub fn template_for_file(&self, file: &Path) -> Option<Arc<LineBreakpoints>> {
        self.template.read().expect("unpoisoned").get(file).cloned()
    }

    /// Any template breakpoints exist globally. While true, the dispatcher
    /// must inspect every call event, so the skip fast-path is disabled.
    pub fn has_template_breakpoints(&self) -> bool {
        !self.template.read().expect("unpoisoned").is_empty()
    }

    pub fn add_exception_breakpoint(&self, brkpt: ExceptionBreakpoint) -> Arc<ExceptionBreakpoint> {
        let brkpt = Arc::new(brkpt);
        self.exception
            .write()
            .expect("unpoisoned")
            .push(brkpt.clone());
        brkpt
    }

    pub fn remove_exception_breakpoint(&self, type_name: &str) {
        self.exception
            .write()
            .expect("unpoisoned")
            .retain(|b| b.type_name != type_name);
    }

    pub fn exception_breakpoint_for(&self, type_name: &str) -> Option<Arc<ExceptionBreakpoint>> {
        self.exception
            .read()
            .expect("unpoisoned")
            .iter()
            .find(|b| b.type_name == type_name)
            .cloned()
    }

    pub fn has_exception_breakpoints(&self) -> bool {
        !self.exception.read().expect("unpoisoned").is_empty()
    }

    /// Enable stops on exceptions raised at template sub-language
    /// boundaries (unresolved variables, missing or broken templates).
    pub fn set_template_exception_break(&self, enabled: bool) {
        self.template_exception_break
            .store(enabled, Ordering::Release)
    }

    pub fn template_exception_break(&self) -> bool {
        self.template_exception_break.load(Ordering::Acquire)
    }

    pub fn set_exception_lines_ignored(&self, file: impl Into<PathBuf>, lines: HashMap<u64, bool>) {
        self.exception_lines_ignored
            .write()
            .expect("unpoisoned")
            .insert(file.into(), Arc::new(lines));
    }

    pub fn exception_lines_ignored(&self, file: &Path) -> Option<Arc<HashMap<u64, bool>>> {
        self.exception_lines_ignored
            .read()
            .expect("unpoisoned")
            .get(file)
            .cloned()
    }
}
