pub mod breakpoint;
pub mod error;
pub mod eval;
pub mod exception;
pub mod frame;
pub mod registry;
pub mod source;
pub mod step;
pub mod template;
pub mod thread;

pub use error::Error;
pub use step::StepCommand;

use crate::debugger::breakpoint::BreakpointRegistry;
use crate::debugger::eval::{ExpressionEvaluator, NullEvaluator};
use crate::debugger::exception::{ExceptionFilter, ExceptionInfo};
use crate::debugger::frame::{FrameId, FrameKind, FrameRef, Value};
use crate::debugger::registry::AdditionalFrameRegistry;
use crate::debugger::source::{FsSourceReader, SourceReader};
use crate::debugger::thread::{ResumeCommand, SuspendFlavor, ThreadId, ThreadRegistry, TracedThread};
use crate::weak_error;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Name of the local binding that carries an intercepted exception.
const EXCEPTION_LOCAL: &str = "__exception__";

/// Execution event fired by the host runtime.
#[derive(Clone)]
pub enum TraceEvent {
    Call,
    Line,
    Return,
    Exception(ExceptionInfo),
}

/// Why a thread got suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum SuspendReason {
    Breakpoint,
    Step(StepCommand),
    CaughtException,
    TemplateBreakpoint,
    TemplateException,
}

/// What the host must do with subsequent events of a frame and its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Keep calling [`TraceDispatcher::dispatch`].
    Dispatch,
    /// Keep scanning for exception breakpoints only, without full
    /// line-level overhead: call [`TraceDispatcher::trace_exception`].
    ExceptionOnly,
}

/// External session callbacks. Hook errors are logged and never reach the
/// debugged program.
pub trait EventHook: Send + Sync {
    /// A thread is about to park on `frame`.
    fn on_suspend(
        &self,
        thread: &Arc<TracedThread>,
        frame: &FrameRef,
        reason: SuspendReason,
    ) -> anyhow::Result<()>;

    /// A caught-exception stack is available for display, frames of the
    /// propagation chain are resolvable through the additional-frame
    /// registry until the matching `done` notification.
    fn on_caught_exception_stack(
        &self,
        thread: &Arc<TracedThread>,
        exception: &ExceptionInfo,
        top_frame: FrameId,
    ) -> anyhow::Result<()>;

    fn on_caught_exception_stack_done(&self, thread: &Arc<TracedThread>);
}

struct NopHook;

impl EventHook for NopHook {
    fn on_suspend(
        &self,
        _: &Arc<TracedThread>,
        _: &FrameRef,
        _: SuspendReason,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_caught_exception_stack(
        &self,
        _: &Arc<TracedThread>,
        _: &ExceptionInfo,
        _: FrameId,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_caught_exception_stack_done(&self, _: &Arc<TracedThread>) {}
}

/// Debugger engine builder.
pub struct DebuggerBuilder {
    hooks: Arc<dyn EventHook>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    reader: Arc<dyn SourceReader>,
    skip_exceptions_caught_in_raise_frame: bool,
    ignore_exception_tags: bool,
}

impl Default for DebuggerBuilder {
    fn default() -> Self {
        Self {
            hooks: Arc::new(NopHook),
            evaluator: Arc::new(NullEvaluator),
            reader: Arc::new(FsSourceReader),
            skip_exceptions_caught_in_raise_frame: false,
            ignore_exception_tags: true,
        }
    }
}

impl DebuggerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hooks(mut self, hooks: impl EventHook + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_evaluator(mut self, evaluator: impl ExpressionEvaluator + 'static) -> Self {
        self.evaluator = Arc::new(evaluator);
        self
    }

    pub fn with_source_reader(mut self, reader: impl SourceReader + 'static) -> Self {
        self.reader = Arc::new(reader);
        self
    }

    /// Don't break on an exception that is caught in the same frame from
    /// which it was thrown.
    pub fn skip_exceptions_caught_in_raise_frame(mut self, skip: bool) -> Self {
        self.skip_exceptions_caught_in_raise_frame = skip;
        self
    }

    /// Honor `@IgnoreException` trailing comment tags in source files.
    pub fn ignore_exception_tags(mut self, enabled: bool) -> Self {
        self.ignore_exception_tags = enabled;
        self
    }

    pub fn build(self) -> Arc<Debugger> {
        Arc::new(Debugger {
            breakpoints: BreakpointRegistry::default(),
            exception_filter: ExceptionFilter::default(),
            additional_frames: AdditionalFrameRegistry::default(),
            threads: ThreadRegistry::default(),
            hooks: self.hooks,
            evaluator: self.evaluator,
            reader: self.reader,
            quitting: AtomicBool::new(false),
            skip_exceptions_caught_in_raise_frame: self.skip_exceptions_caught_in_raise_frame,
            ignore_exception_tags: self.ignore_exception_tags,
        })
    }
}

/// Tracer engine: shared breakpoint tables, per-thread debug state and the
/// collaborator seams. One instance per debug session, shared by every
/// traced thread.
pub struct Debugger {
    breakpoints: BreakpointRegistry,
    exception_filter: ExceptionFilter,
    additional_frames: AdditionalFrameRegistry,
    threads: ThreadRegistry,
    hooks: Arc<dyn EventHook>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    reader: Arc<dyn SourceReader>,
    quitting: AtomicBool,
    skip_exceptions_caught_in_raise_frame: bool,
    ignore_exception_tags: bool,
}

impl Debugger {
    pub fn builder() -> DebuggerBuilder {
        DebuggerBuilder::new()
    }

    pub fn breakpoints(&self) -> &BreakpointRegistry {
        &self.breakpoints
    }

    pub fn additional_frames(&self) -> &AdditionalFrameRegistry {
        &self.additional_frames
    }

    /// Session ending flag: every dispatch observes it and detaches, parked
    /// threads leave their wait loops without an explicit resume.
    pub fn quit(&self) {
        self.quitting.store(true, Ordering::Release)
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::Acquire)
    }

    pub fn thread(&self, id: ThreadId) -> Option<Arc<TracedThread>> {
        self.threads.get(id)
    }

    pub fn threads(&self) -> Vec<Arc<TracedThread>> {
        self.threads.dump()
    }

    pub fn drop_thread(&self, id: ThreadId) {
        self.threads.remove(id)
    }

    /// Release a suspended thread, installing the next step command.
    pub fn resume(&self, id: ThreadId, command: ResumeCommand) -> Result<(), Error> {
        let thread = self.threads.get(id).ok_or(Error::ThreadNotFound(id))?;
        thread.resume(command);
        Ok(())
    }

    /// Create a dispatcher for a thread of control. The host runtime calls
    /// it once per thread and then invokes `dispatch` inline for every
    /// event that thread produces.
    pub fn tracer(self: &Arc<Self>, id: ThreadId) -> TraceDispatcher {
        TraceDispatcher {
            thread: self.threads.register(id),
            debugger: self.clone(),
        }
    }
}

/// Per-thread event dispatcher, the tracing hot path.
pub struct TraceDispatcher {
    debugger: Arc<Debugger>,
    thread: Arc<TracedThread>,
}

impl TraceDispatcher {
    pub fn thread(&self) -> &Arc<TracedThread> {
        &self.thread
    }

    /// Route one execution event.
    ///
    /// `None` tells the host to stop instrumenting this frame descendants.
    /// Any internal error is logged and the thread step state is reset so
    /// the debugged program always makes forward progress.
    pub fn dispatch(&self, frame: &FrameRef, event: &TraceEvent) -> Option<Continuation> {
        match self.dispatch_inner(frame, event) {
            Ok(continuation) => continuation,
            Err(e) => {
                warn!(target: "tracer", "dispatch: {e:#}");
                self.thread.lock_state().clear_step();
                if self.debugger.is_quitting() {
                    None
                } else {
                    Some(Continuation::Dispatch)
                }
            }
        }
    }

    /// Exception-only continuation: scan for exception breakpoints without
    /// the line-level machinery.
    pub fn trace_exception(&self, frame: &FrameRef, event: &TraceEvent) -> Option<Continuation> {
        if self.debugger.is_quitting() {
            return None;
        }
        if let TraceEvent::Exception(info) = event {
            let handled = self.should_stop_on_exception(frame, info).and_then(|stop| {
                match stop {
                    Some(stop_frame) => {
                        self.handle_exception(&stop_frame, info)?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            });
            match handled {
                Ok(true) => return Some(Continuation::Dispatch),
                Ok(false) => {}
                Err(e) => warn!(target: "exception", "trace exception: {e:#}"),
            }
        }
        Some(Continuation::ExceptionOnly)
    }

    fn dispatch_inner(
        &self,
        frame: &FrameRef,
        event: &TraceEvent,
    ) -> Result<Option<Continuation>, Error> {
        let debugger = &self.debugger;
        if debugger.is_quitting() {
            return Ok(None);
        }
        if self.thread.do_not_trace() || !frame.trace_enabled() {
            return Ok(None);
        }

        if let TraceEvent::Exception(info) = event {
            return self.dispatch_exception(frame, event, info);
        }

        let (step_cmd, stop_frame) = {
            let state = self.thread.lock_state();
            (state.step, state.stop_frame)
        };

        // Skip eligibility: thread is running with no active step target, or
        // the step is an over/return anchored elsewhere. Template breakpoints
        // require call-site inspection on every call, they disable the skip
        // globally.
        let mut can_skip = false;
        if !self.thread.is_suspended() {
            can_skip = (step_cmd == StepCommand::None && stop_frame.is_none())
                || (matches!(step_cmd, StepCommand::StepOver | StepCommand::StepReturn)
                    && stop_frame != Some(FrameId::of(frame)));
        }
        if debugger.breakpoints.has_template_breakpoints() {
            can_skip = false;
        }

        let breakpoints_for_file = debugger.breakpoints.for_file(frame.file());
        match &breakpoints_for_file {
            None => {
                if can_skip {
                    if debugger.breakpoints.has_exception_breakpoints()
                        || debugger.breakpoints.template_exception_break()
                    {
                        return Ok(Some(Continuation::ExceptionOnly));
                    }
                    return Ok(None);
                }
            }
            Some(for_file) => {
                // a breakpoint must match either the global or the current
                // function scope, otherwise this is a context to skip
                let scope = frame.scope_name();
                let context_match = for_file.values().any(|b| b.matches_scope(scope));
                if !context_match && can_skip {
                    return Ok(None);
                }
            }
        }

        // The frame may be replaced by a synthetic template frame below.
        let mut frame = frame.clone();

        if matches!(event, TraceEvent::Call)
            && !self.thread.is_suspended()
            && debugger.breakpoints.has_template_breakpoints()
            && template::is_render_frame(&frame)
        {
            if let Some(template_frame) = self.should_stop_on_template_break(&frame)? {
                frame = template_frame;
            }
        }

        // Breakpoint test. A return is not taken into account, it would be
        // a double hit: one for the line and one for the return.
        if !self.thread.is_suspended() && !matches!(event, TraceEvent::Return) {
            if let Some(brkpt) = breakpoints_for_file
                .as_ref()
                .and_then(|m| m.get(&frame.line()))
            {
                if brkpt.matches_scope(frame.scope_name()) && brkpt.take_hit() {
                    let mut stop = true;
                    if step_cmd == StepCommand::StepOver
                        && stop_frame == Some(FrameId::of(&frame))
                        && matches!(event, TraceEvent::Line | TraceEvent::Return)
                    {
                        // don't stop, a step-over completes at this location
                        // and will be processed by the step machinery
                        stop = false;
                    } else if let Some(condition) = brkpt.condition() {
                        match debugger.evaluator.evaluate(condition, &frame) {
                            Ok(value) if !value.is_truthy() => {
                                return Ok(Some(Continuation::Dispatch));
                            }
                            Ok(_) => {}
                            Err(e) => {
                                info!(
                                    target: "tracer",
                                    "error while evaluating condition `{condition}`: {e:#}"
                                );
                                return Ok(Some(Continuation::Dispatch));
                            }
                        }
                    }

                    if let Some(expression) = brkpt.expression() {
                        let message = match debugger.evaluator.evaluate(expression, &frame) {
                            Ok(value) => value.to_string(),
                            Err(e) => format!("{e:#}"),
                        };
                        self.thread.lock_state().message = Some(message);
                    }

                    if stop {
                        self.thread.set_suspend(SuspendReason::Breakpoint);
                    }
                }
            }
        }

        // A thread with a suspend flag parks itself with a busy wait.
        if self.thread.is_suspended() {
            self.wait_suspend(&frame);
            return Ok(Some(Continuation::Dispatch));
        }

        // Stepping state machine: stop when the right frame is hit.
        let decision = {
            let mut state = self.thread.lock_state();
            step::stop_decision(&mut state, &frame, event)
        };

        if decision.template_stop {
            match template::build_template_frame(debugger.reader.as_ref(), &frame) {
                Ok(template_frame) => {
                    self.thread
                        .set_suspend(SuspendReason::Step(StepCommand::StepOver));
                    self.wait_suspend(&template_frame);
                }
                Err(e) => debug!(target: "template", "template step stop: {e:#}"),
            }
        } else if decision.stop {
            match event {
                TraceEvent::Return => {
                    // on a return the user wants to see the call site, so
                    // suspend on the caller frame
                    match frame.back() {
                        Some(back) if !back.is_harness() => {
                            let back = back.clone();
                            self.thread
                                .set_suspend(SuspendReason::Step(decision.command));
                            self.wait_suspend(&back);
                        }
                        _ => {
                            // returning into the run harness: debugging of
                            // this thread is finished
                            self.thread.lock_state().clear_step();
                        }
                    }
                }
                _ => {
                    self.thread
                        .set_suspend(SuspendReason::Step(decision.command));
                    self.wait_suspend(&frame);
                }
            }
        }

        if debugger.is_quitting() {
            return Ok(None);
        }
        Ok(Some(Continuation::Dispatch))
    }

    fn dispatch_exception(
        &self,
        frame: &FrameRef,
        event: &TraceEvent,
        info: &ExceptionInfo,
    ) -> Result<Option<Continuation>, Error> {
        if let Some(stop_frame) = self.should_stop_on_exception(frame, info)? {
            self.handle_exception(&stop_frame, info)?;
            return Ok(Some(Continuation::Dispatch));
        }

        // a declined exception still feeds the step machine: smart step and
        // run-to-line act on exception events too
        let decision = {
            let mut state = self.thread.lock_state();
            step::stop_decision(&mut state, frame, event)
        };
        if decision.stop && !self.thread.is_suspended() {
            self.thread
                .set_suspend(SuspendReason::Step(decision.command));
            self.wait_suspend(frame);
            return Ok(Some(Continuation::Dispatch));
        }

        Ok(Some(Continuation::ExceptionOnly))
    }

    /// Exception filter (stop decision part): a matching exception
    /// breakpoint, or a template error raised at a recognized template
    /// boundary. Returns the frame to suspend on, which for template errors
    /// is a synthetic one.
    fn should_stop_on_exception(
        &self,
        frame: &FrameRef,
        info: &ExceptionInfo,
    ) -> Result<Option<FrameRef>, Error> {
        if self.thread.is_suspended() {
            return Ok(None);
        }
        // no propagation chain data on this platform
        let Some(trace) = info.traceback.clone() else {
            return Ok(None);
        };

        if let Some(exc_brkpt) = self
            .debugger
            .breakpoints
            .exception_breakpoint_for(&info.type_name)
        {
            if !exc_brkpt.notify_on_first_raise_only || trace.just_raised() {
                add_exception_to_frame(frame, info);
                self.thread.lock_state().message = Some(exc_brkpt.type_name.clone());
                return Ok(Some(frame.clone()));
            }
            return Ok(None);
        }

        if self.debugger.breakpoints.template_exception_break()
            && template::is_template_error(&info.type_name)
            && trace.just_raised()
            && template::is_template_exception_context(frame)
        {
            let stop = self.template_exception_stop(frame, info);
            // fail closed: a broken template bridge never stops
            return Ok(weak_error!(stop).flatten());
        }

        Ok(None)
    }

    fn template_exception_stop(
        &self,
        frame: &FrameRef,
        info: &ExceptionInfo,
    ) -> Result<Option<FrameRef>, Error> {
        let Some(render_frame) = template::find_render_frame(frame) else {
            return Ok(None);
        };
        let template_frame =
            template::build_template_frame(self.debugger.reader.as_ref(), &render_frame)?;
        add_exception_to_frame(&template_frame, info);
        self.thread.lock_state().message = Some(info.type_name.clone());
        self.thread.set_suspend(SuspendReason::TemplateException);
        Ok(Some(template_frame))
    }

    /// Accepted exception stop: honor the ignore tags, publish the
    /// propagation chain for the session and park the thread.
    fn handle_exception(&self, stop_frame: &FrameRef, info: &ExceptionInfo) -> Result<(), Error> {
        let debugger = &self.debugger;
        let Some(initial) = info.traceback.clone() else {
            return Ok(());
        };

        let raise_entry = if initial.just_raised()
            && FrameId::of(&initial.frame) == FrameId::of(stop_frame)
        {
            if debugger.skip_exceptions_caught_in_raise_frame {
                return Ok(());
            }
            initial.clone()
        } else {
            initial.clone().raise_site()
        };

        if debugger.ignore_exception_tags {
            for entry in [&initial, &raise_entry] {
                let file = entry.frame.file();
                let overrides = debugger.breakpoints.exception_lines_ignored(file);
                if debugger.exception_filter.is_line_ignored(
                    debugger.reader.as_ref(),
                    overrides.as_deref(),
                    file,
                    entry.line,
                ) {
                    return Ok(());
                }
            }
        }

        // publish every frame of the propagation chain so the session can
        // display the caught-exception stack independent of the live stack
        let mut chain_frames = HashMap::new();
        for start in [raise_entry.frame.clone(), stop_frame.clone()] {
            let mut current = Some(start);
            while let Some(f) = current {
                chain_frames.insert(FrameId::of(&f), f.clone());
                current = f.back().cloned();
            }
        }

        {
            let _guard = debugger
                .additional_frames
                .register(self.thread.id(), chain_frames);
            weak_error!(debugger
                .hooks
                .on_caught_exception_stack(&self.thread, info, FrameId::of(stop_frame))
                .map_err(Error::Hook));
            if !self.thread.is_suspended() {
                self.thread.set_suspend(SuspendReason::CaughtException);
            }
            self.wait_suspend(stop_frame);
            debugger.hooks.on_caught_exception_stack_done(&self.thread);
        }

        // suspension must keep working above this frame even if something
        // had disabled it
        stop_frame.enable_trace_with_parents();
        Ok(())
    }

    /// Template breakpoint test at a render call entry (the frame bridge
    /// side of a call event).
    fn should_stop_on_template_break(
        &self,
        render_frame: &FrameRef,
    ) -> Result<Option<FrameRef>, Error> {
        let debugger = &self.debugger;
        let Some(call) = render_frame.render_call() else {
            return Ok(None);
        };
        let file = match template::template_file(call) {
            Ok(file) => file,
            Err(_) => return Ok(None),
        };
        let Some(for_file) = debugger.breakpoints.template_for_file(&file) else {
            return Ok(None);
        };

        let offset = call.source.as_ref().map(|s| s.offset).unwrap_or(0);
        let line = template::template_line(debugger.reader.as_ref(), &file, offset);
        let Some(brkpt) = for_file.get(&line) else {
            return Ok(None);
        };
        if !brkpt.take_hit() {
            return Ok(None);
        }

        let template_frame = template::build_template_frame(debugger.reader.as_ref(), render_frame)?;

        let mut stop = true;
        if let Some(condition) = brkpt.condition() {
            match debugger.evaluator.evaluate(condition, &template_frame) {
                Ok(value) if !value.is_truthy() => {
                    debug!(
                        target: "template",
                        "condition `{condition}` evaluated to false, not suspending"
                    );
                    stop = false;
                }
                Ok(_) => {}
                Err(e) => {
                    info!(
                        target: "template",
                        "error while evaluating condition `{condition}`: {e:#}"
                    );
                    stop = false;
                }
            }
        }
        if let Some(expression) = brkpt.expression() {
            let message = match debugger.evaluator.evaluate(expression, &template_frame) {
                Ok(value) => value.to_string(),
                Err(e) => format!("{e:#}"),
            };
            self.thread.lock_state().message = Some(message);
        }

        if stop {
            self.thread.set_suspend(SuspendReason::TemplateBreakpoint);
            Ok(Some(template_frame))
        } else {
            Ok(None)
        }
    }

    /// `WaitSuspended` of the suspend protocol: notify the session and park
    /// until an external resume (or session end) releases the thread.
    fn wait_suspend(&self, frame: &FrameRef) {
        let reason = {
            let mut state = self.thread.lock_state();
            state.suspend_flavor = match frame.kind() {
                FrameKind::Template(_) => SuspendFlavor::Template,
                _ => SuspendFlavor::Native,
            };
            state.suspended_at = Some(frame.clone());
            state.suspend_reason.unwrap_or(SuspendReason::Breakpoint)
        };

        weak_error!(self
            .debugger
            .hooks
            .on_suspend(&self.thread, frame, reason)
            .map_err(Error::Hook));

        let debugger = self.debugger.clone();
        self.thread.park_while_suspended(move || debugger.is_quitting());
        self.thread.lock_state().suspended_at = None;
    }
}

fn add_exception_to_frame(frame: &FrameRef, info: &ExceptionInfo) {
    frame.set_local(
        EXCEPTION_LOCAL,
        Value::Str(format!("{}: {}", info.type_name, info.message)),
    );
}
