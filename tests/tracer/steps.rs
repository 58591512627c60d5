use crate::common::{line, TestHooks, TestInfo};
use crate::{APP_SRC, LIB_SRC};
use tracestep::debugger::breakpoint::Breakpoint;
use tracestep::debugger::frame::Frame;
use tracestep::debugger::thread::{ResumeCommand, ThreadId};
use tracestep::debugger::{Continuation, Debugger, StepCommand, SuspendReason, TraceEvent};

fn session(info: &TestInfo, script: Vec<ResumeCommand>) -> std::sync::Arc<Debugger> {
    let debugger = Debugger::builder()
        .with_hooks(TestHooks::new(info.clone(), script))
        .build();
    info.attach(&debugger);
    debugger
}

#[test]
fn test_step_into() {
    let info = TestInfo::default();
    let debugger = session(&info, vec![ResumeCommand::StepInto]);
    debugger.breakpoints().add(Breakpoint::new(APP_SRC, 3));

    let tracer = debugger.tracer(ThreadId(1));
    let main = Frame::new("main", APP_SRC, 1, None);
    let calc = Frame::new("calc", APP_SRC, 9, Some(main.clone()));

    line(&tracer, &main, 3);
    // a call alone is not yet a new position, the first line inside is
    tracer.dispatch(&calc, &TraceEvent::Call);
    assert_eq!(info.stops.lock().unwrap().len(), 1);
    line(&tracer, &calc, 10);

    let stops = info.stops.lock().unwrap();
    assert_eq!(stops.len(), 2);
    assert_eq!(stops[1].code_name, "calc");
    assert_eq!(stops[1].line, 10);
    assert_eq!(stops[1].reason, SuspendReason::Step(StepCommand::StepInto));
}

#[test]
fn test_step_over() {
    let info = TestInfo::default();
    let debugger = session(&info, vec![ResumeCommand::StepOver]);
    debugger.breakpoints().add(Breakpoint::new(APP_SRC, 3));

    let tracer = debugger.tracer(ThreadId(1));
    let main = Frame::new("main", APP_SRC, 1, None);
    let calc = Frame::new("calc", APP_SRC, 9, Some(main.clone()));

    line(&tracer, &main, 3);

    // the called frame is stepped over entirely
    tracer.dispatch(&calc, &TraceEvent::Call);
    line(&tracer, &calc, 10);
    line(&tracer, &calc, 11);
    tracer.dispatch(&calc, &TraceEvent::Return);
    assert_eq!(info.stops.lock().unwrap().len(), 1);

    line(&tracer, &main, 4);
    let stops = info.stops.lock().unwrap();
    assert_eq!(stops.len(), 2);
    assert_eq!(stops[1].code_name, "main");
    assert_eq!(stops[1].line, 4);
    assert_eq!(stops[1].reason, SuspendReason::Step(StepCommand::StepOver));
}

#[test]
fn test_step_return() {
    let info = TestInfo::default();
    let debugger = session(&info, vec![ResumeCommand::StepReturn]);
    debugger.breakpoints().add(Breakpoint::new(LIB_SRC, 10));

    let tracer = debugger.tracer(ThreadId(1));
    let main = Frame::new("main", APP_SRC, 3, None);
    let calc = Frame::new("calc", LIB_SRC, 9, Some(main.clone()));

    line(&tracer, &calc, 10);
    line(&tracer, &calc, 11);
    assert_eq!(info.stops.lock().unwrap().len(), 1);

    // the stop lands on the call site, not on the returning frame
    tracer.dispatch(&calc, &TraceEvent::Return);
    let stops = info.stops.lock().unwrap();
    assert_eq!(stops.len(), 2);
    assert_eq!(stops[1].code_name, "main");
    assert_eq!(stops[1].line, 3);
    assert_eq!(stops[1].reason, SuspendReason::Step(StepCommand::StepReturn));
}

#[test]
fn test_step_return_into_harness_finishes_stepping() {
    let info = TestInfo::default();
    let debugger = session(&info, vec![ResumeCommand::StepReturn]);
    debugger.breakpoints().add(Breakpoint::new(APP_SRC, 3));

    let tracer = debugger.tracer(ThreadId(1));
    let harness = Frame::new_harness("runner.src", None);
    let main = Frame::new("main", APP_SRC, 1, Some(harness.clone()));

    line(&tracer, &main, 3);
    assert_eq!(
        tracer.dispatch(&main, &TraceEvent::Return),
        Some(Continuation::Dispatch)
    );

    // no second stop: returning into the run harness ends the step
    assert_eq!(info.stops.lock().unwrap().len(), 1);
    line(&tracer, &main, 4);
    assert_eq!(info.stops.lock().unwrap().len(), 1);
}

#[test]
fn test_smart_step_into() {
    let info = TestInfo::default();
    let debugger = session(
        &info,
        vec![ResumeCommand::SmartStepInto {
            func_name: "calc".to_string(),
        }],
    );
    debugger.breakpoints().add(Breakpoint::new(APP_SRC, 3));

    let tracer = debugger.tracer(ThreadId(1));
    let main = Frame::new("main", APP_SRC, 1, None);
    let helper = Frame::new("helper", APP_SRC, 20, Some(main.clone()));
    let calc = Frame::new("calc", APP_SRC, 30, Some(helper.clone()));

    line(&tracer, &main, 3);

    // intermediate calls on the way to the target are passed through
    tracer.dispatch(&helper, &TraceEvent::Call);
    line(&tracer, &helper, 21);
    assert_eq!(info.stops.lock().unwrap().len(), 1);

    tracer.dispatch(&calc, &TraceEvent::Call);
    line(&tracer, &calc, 31);
    let stops = info.stops.lock().unwrap();
    assert_eq!(stops.len(), 2);
    assert_eq!(stops[1].code_name, "calc");
    assert_eq!(
        stops[1].reason,
        SuspendReason::Step(StepCommand::SmartStepInto)
    );
}

#[test]
fn test_smart_step_into_cancelled_at_anchor_frame() {
    let info = TestInfo::default();
    let debugger = session(
        &info,
        vec![ResumeCommand::SmartStepInto {
            func_name: "calc".to_string(),
        }],
    );
    debugger.breakpoints().add(Breakpoint::new(APP_SRC, 3));

    let tracer = debugger.tracer(ThreadId(1));
    let main = Frame::new("main", APP_SRC, 1, None);
    let helper = Frame::new("helper", APP_SRC, 20, Some(main.clone()));
    let calc = Frame::new("calc", APP_SRC, 30, Some(main.clone()));

    line(&tracer, &main, 3);

    // the call at the anchor line never reaches the target
    tracer.dispatch(&helper, &TraceEvent::Call);
    line(&tracer, &helper, 21);
    tracer.dispatch(&helper, &TraceEvent::Return);

    // landing back in the anchor frame cancels the target
    line(&tracer, &main, 4);
    assert_eq!(info.stops.lock().unwrap().len(), 1);

    // a later call of the target function no longer stops
    tracer.dispatch(&calc, &TraceEvent::Call);
    line(&tracer, &calc, 31);
    assert_eq!(info.stops.lock().unwrap().len(), 1);
}

#[test]
fn test_run_to_line() {
    let info = TestInfo::default();
    let debugger = session(&info, vec![ResumeCommand::RunToLine { line: 7 }]);
    debugger.breakpoints().add(Breakpoint::new(APP_SRC, 3));

    let tracer = debugger.tracer(ThreadId(1));
    let main = Frame::new("main", APP_SRC, 1, None);
    let calc = Frame::new("calc", APP_SRC, 9, Some(main.clone()));

    line(&tracer, &main, 3);
    line(&tracer, &main, 4);

    // the same line in another function does not count
    tracer.dispatch(&calc, &TraceEvent::Call);
    line(&tracer, &calc, 7);
    tracer.dispatch(&calc, &TraceEvent::Return);
    assert_eq!(info.stops.lock().unwrap().len(), 1);

    line(&tracer, &main, 7);
    let stops = info.stops.lock().unwrap();
    assert_eq!(stops.len(), 2);
    assert_eq!(stops[1].code_name, "main");
    assert_eq!(stops[1].line, 7);
    assert_eq!(stops[1].reason, SuspendReason::Step(StepCommand::RunToLine));
}

#[test]
fn test_set_next_statement_jumps() {
    let info = TestInfo::default();
    let debugger = session(&info, vec![ResumeCommand::SetNextStatement { line: 9 }]);
    debugger.breakpoints().add(Breakpoint::new(APP_SRC, 3));

    let tracer = debugger.tracer(ThreadId(1));
    let main = Frame::new("main", APP_SRC, 1, None);

    line(&tracer, &main, 3);
    line(&tracer, &main, 4);

    // the frame line counter is forced to the target
    assert_eq!(main.line(), 9);
    let stops = info.stops.lock().unwrap();
    assert_eq!(stops.len(), 2);
    assert_eq!(stops[1].line, 9);
    assert_eq!(
        stops[1].reason,
        SuspendReason::Step(StepCommand::SetNextStatement)
    );
}

#[test]
fn test_breakpoint_swallowed_by_completing_step_over() {
    let info = TestInfo::default();
    let debugger = session(&info, vec![ResumeCommand::StepOver]);
    debugger.breakpoints().add(Breakpoint::new(APP_SRC, 3));
    debugger.breakpoints().add(Breakpoint::new(APP_SRC, 4));

    let tracer = debugger.tracer(ThreadId(1));
    let main = Frame::new("main", APP_SRC, 1, None);

    line(&tracer, &main, 3);
    line(&tracer, &main, 4);

    // one stop at line 4 with the step as its reason, not two
    let stops = info.stops.lock().unwrap();
    assert_eq!(stops.len(), 2);
    assert_eq!(stops[1].line, 4);
    assert_eq!(stops[1].reason, SuspendReason::Step(StepCommand::StepOver));
}
