use crate::debugger::frame::{FrameId, FrameRef};
use crate::debugger::template;
use crate::debugger::thread::{StepState, SuspendFlavor};
use crate::debugger::TraceEvent;

/// Active step command of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
pub enum StepCommand {
    #[default]
    None,
    StepInto,
    StepOver,
    StepReturn,
    SmartStepInto,
    RunToLine,
    SetNextStatement,
}

pub(super) struct StepDecision {
    pub command: StepCommand,
    /// Stop here and suspend.
    pub stop: bool,
    /// STEP_OVER inside template rendering: stop at the next render call
    /// without descending into it.
    pub template_stop: bool,
}

impl StepDecision {
    fn run(command: StepCommand) -> Self {
        Self {
            command,
            stop: false,
            template_stop: false,
        }
    }

    fn stop(command: StepCommand) -> Self {
        Self {
            command,
            stop: true,
            template_stop: false,
        }
    }
}

/// Evaluate whether the event satisfies the active step command.
/// May mutate step anchors (template re-anchor, smart-step target reset,
/// set-next-statement line jump).
pub(super) fn stop_decision(
    state: &mut StepState,
    frame: &FrameRef,
    event: &TraceEvent,
) -> StepDecision {
    let command = state.step;
    let line_or_return = matches!(event, TraceEvent::Line | TraceEvent::Return);
    let line_or_exception = matches!(event, TraceEvent::Line | TraceEvent::Exception(_));

    match command {
        StepCommand::None => StepDecision::run(command),

        StepCommand::StepInto => {
            let mut stop = line_or_return;
            if state.suspend_flavor == SuspendFlavor::Template {
                // only a stop below a variable-resolution entry is a step
                // "into" interpreter code from a template position
                stop = stop
                    && frame.back().is_some_and(|b| template::is_resolve_frame(b))
                    && !template::is_context_lookup_frame(frame);
                if stop {
                    // remember the render call we came from, STEP_OVER on
                    // return re-anchors to it
                    state.render_anchor =
                        template::find_render_frame(frame).as_ref().map(FrameId::of);
                }
            }
            StepDecision {
                command,
                stop,
                template_stop: false,
            }
        }

        StepCommand::StepOver => {
            if state.suspend_flavor == SuspendFlavor::Template {
                StepDecision {
                    command,
                    stop: false,
                    template_stop: matches!(event, TraceEvent::Call)
                        && template::is_render_frame(frame),
                }
            } else {
                if matches!(event, TraceEvent::Return)
                    && state.render_anchor.is_some()
                    && frame.back().is_some_and(|b| template::is_resolve_frame(b))
                {
                    // returning into template rendering: anchor at the
                    // enclosing render call so the user keeps seeing
                    // template-level steps
                    state.stop_frame = state.render_anchor.take();
                    state.suspend_flavor = SuspendFlavor::Template;
                }
                if line_or_return && state.stop_frame == Some(FrameId::of(frame)) {
                    StepDecision::stop(command)
                } else {
                    StepDecision::run(command)
                }
            }
        }

        StepCommand::StepReturn => {
            if matches!(event, TraceEvent::Return)
                && state.stop_frame == Some(FrameId::of(frame))
            {
                StepDecision::stop(command)
            } else {
                StepDecision::run(command)
            }
        }

        StepCommand::SmartStepInto => {
            if state.smart_stop_frame == Some(FrameId::of(frame)) {
                // execution landed back in the frame where the command was
                // issued: the call that should have entered the target is
                // over, cancel it
                state.smart_stop_frame = None;
                state.target_func = None;
            }
            let reached = line_or_exception
                && state.target_func.as_deref() == Some(frame.scope_name());
            if reached {
                state.target_func = None;
                state.smart_stop_frame = None;
                StepDecision::stop(command)
            } else {
                StepDecision::run(command)
            }
        }

        StepCommand::RunToLine | StepCommand::SetNextStatement => {
            if !(line_or_exception
                && state.target_func.as_deref() == Some(frame.scope_name()))
            {
                return StepDecision::run(command);
            }
            let Some(target_line) = state.target_line else {
                return StepDecision::run(command);
            };
            if frame.line() == target_line {
                StepDecision::stop(command)
            } else if command == StepCommand::SetNextStatement {
                // jump semantics: force the line counter to the target
                frame.set_line(target_line);
                StepDecision::stop(command)
            } else {
                StepDecision::run(command)
            }
        }
    }
}
