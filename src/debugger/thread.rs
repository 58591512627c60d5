use crate::debugger::frame::{FrameId, FrameRef};
use crate::debugger::step::StepCommand;
use crate::debugger::SuspendReason;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Identifier of a traced thread of control, assigned by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const MODE_RUNNING: u8 = 0;
const MODE_SUSPENDED: u8 = 1;

/// How often a parked thread re-checks its mode flag.
const SUSPEND_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Which world the last suspension belongs to: native frames or synthetic
/// template frames. Stepping semantics differ between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
pub enum SuspendFlavor {
    #[default]
    Native,
    Template,
}

/// Step bookkeeping of one thread. Anchors are valid only while a step is in
/// flight; they are cleared when the step completes or a new resume command
/// supersedes them.
#[derive(Default)]
pub struct StepState {
    pub step: StepCommand,
    /// Frame identity a STEP_OVER/STEP_RETURN is anchored to.
    pub stop_frame: Option<FrameId>,
    /// Frame where a SMART_STEP_INTO was issued.
    pub smart_stop_frame: Option<FrameId>,
    /// Target function name for smart-step and run-to-line.
    pub target_func: Option<String>,
    /// Target line for run-to-line/set-next-statement.
    pub target_line: Option<u64>,
    /// Enclosing render call to re-anchor on when stepping returns back
    /// into template rendering.
    pub render_anchor: Option<FrameId>,
    pub suspend_flavor: SuspendFlavor,
    /// Frame the thread is currently parked on, present only while the
    /// thread is inside its wait loop.
    pub suspended_at: Option<FrameRef>,
    /// Last display-expression value (or matched exception type name),
    /// read by the session on suspension.
    pub message: Option<String>,
    pub suspend_reason: Option<SuspendReason>,
}

impl StepState {
    /// Drop an active step command with all its anchors. The template
    /// suspend flavor and render anchor survive, they describe where the
    /// thread conceptually is, not what the user asked for.
    pub(super) fn clear_step(&mut self) {
        self.step = StepCommand::None;
        self.stop_frame = None;
        self.smart_stop_frame = None;
        self.target_func = None;
        self.target_line = None;
    }
}

/// Resume command installed by the external session when it releases
/// a suspended thread.
#[derive(Debug, Clone)]
pub enum ResumeCommand {
    Continue,
    StepInto,
    StepOver,
    StepReturn,
    SmartStepInto { func_name: String },
    RunToLine { line: u64 },
    SetNextStatement { line: u64 },
}

/// Debug state of one traced thread of control.
///
/// Owned by its thread, except the mode flag which is the single
/// synchronization point between the thread wait loop and the external
/// resume command.
pub struct TracedThread {
    id: ThreadId,
    mode: AtomicU8,
    do_not_trace: AtomicBool,
    state: Mutex<StepState>,
}

impl TracedThread {
    pub(super) fn new(id: ThreadId) -> Arc<Self> {
        Arc::new(Self {
            id,
            mode: AtomicU8::new(MODE_RUNNING),
            do_not_trace: AtomicBool::new(false),
            state: Mutex::default(),
        })
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn is_suspended(&self) -> bool {
        self.mode.load(Ordering::Acquire) == MODE_SUSPENDED
    }

    /// Per-thread tracing opt-out, checked at the top of every dispatch.
    pub fn set_do_not_trace(&self, value: bool) {
        self.do_not_trace.store(value, Ordering::Release)
    }

    pub fn do_not_trace(&self) -> bool {
        self.do_not_trace.load(Ordering::Acquire)
    }

    pub(super) fn lock_state(&self) -> MutexGuard<'_, StepState> {
        self.state.lock().expect("unpoisoned")
    }

    /// `Suspend(thread, reason)` of the suspend protocol: mark the thread
    /// suspended, the thread parks itself on the next wait call.
    pub(super) fn set_suspend(&self, reason: SuspendReason) {
        self.lock_state().suspend_reason = Some(reason);
        self.mode.store(MODE_SUSPENDED, Ordering::Release);
    }

    /// Cooperative wait loop: park until an external resume (or session
    /// shutdown) switches the mode back to running. Re-entrant by
    /// construction, the loop owns no locks while parked.
    pub(super) fn park_while_suspended(&self, quitting: impl Fn() -> bool) {
        while self.is_suspended() && !quitting() {
            std::thread::sleep(SUSPEND_POLL_INTERVAL);
        }
    }

    /// Release a suspended thread, optionally installing the next step
    /// command. Step anchors derive from the frame the thread is parked on.
    pub fn resume(&self, command: ResumeCommand) {
        {
            let mut state = self.lock_state();
            let anchor = state.suspended_at.clone();
            let anchor_id = anchor.as_ref().map(FrameId::of);
            state.clear_step();
            state.suspend_reason = None;

            match command {
                ResumeCommand::Continue => {}
                ResumeCommand::StepInto => state.step = StepCommand::StepInto,
                ResumeCommand::StepOver => {
                    state.step = StepCommand::StepOver;
                    state.stop_frame = anchor_id;
                }
                ResumeCommand::StepReturn => {
                    state.step = StepCommand::StepReturn;
                    state.stop_frame = anchor_id;
                }
                ResumeCommand::SmartStepInto { func_name } => {
                    state.step = StepCommand::SmartStepInto;
                    state.smart_stop_frame = anchor_id;
                    state.target_func = Some(func_name);
                }
                ResumeCommand::RunToLine { line } => {
                    state.step = StepCommand::RunToLine;
                    state.target_func = anchor.as_ref().map(|f| f.scope_name().to_string());
                    state.target_line = Some(line);
                }
                ResumeCommand::SetNextStatement { line } => {
                    state.step = StepCommand::SetNextStatement;
                    state.target_func = anchor.as_ref().map(|f| f.scope_name().to_string());
                    state.target_line = Some(line);
                }
            }
        }
        self.mode.store(MODE_RUNNING, Ordering::Release);
    }

    /// Last display-expression value or exception message recorded on
    /// a stop, for the session to show next to the suspension.
    pub fn message(&self) -> Option<String> {
        self.lock_state().message.clone()
    }

    pub fn suspend_reason(&self) -> Option<SuspendReason> {
        self.lock_state().suspend_reason
    }
}

/// All threads known to the engine.
#[derive(Default)]
pub(super) struct ThreadRegistry {
    state: Mutex<HashMap<ThreadId, Arc<TracedThread>>>,
}

impl ThreadRegistry {
    /// Get-or-create state for a thread.
    pub(super) fn register(&self, id: ThreadId) -> Arc<TracedThread> {
        self.state
            .lock()
            .expect("unpoisoned")
            .entry(id)
            .or_insert_with(|| TracedThread::new(id))
            .clone()
    }

    pub(super) fn get(&self, id: ThreadId) -> Option<Arc<TracedThread>> {
        self.state.lock().expect("unpoisoned").get(&id).cloned()
    }

    pub(super) fn remove(&self, id: ThreadId) {
        self.state.lock().expect("unpoisoned").remove(&id);
    }

    pub(super) fn dump(&self) -> Vec<Arc<TracedThread>> {
        self.state.lock().expect("unpoisoned").values().cloned().collect()
    }
}
