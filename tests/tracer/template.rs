use crate::common::{line, raised, MemReader, TestHooks, TestInfo};
use crate::APP_SRC;
use std::collections::HashMap;
use std::path::PathBuf;
use tracestep::debugger::breakpoint::Breakpoint;
use tracestep::debugger::frame::{Frame, FrameRef, Value};
use tracestep::debugger::template::{RenderCall, RenderContext, TemplateSource, TEMPLATE_FRAME_NAME};
use tracestep::debugger::thread::{ResumeCommand, ThreadId};
use tracestep::debugger::{Continuation, Debugger, StepCommand, SuspendReason, TraceEvent};

const RENDERER_SRC: &str = "renderer.src";
const INDEX_TPL: &str = "index.tpl";
const INDEX_TPL_TEXT: &str = "<h1>{{ title }}</h1>\n<p>{{ body }}</p>\n";

fn reader_with_template() -> MemReader {
    let reader = MemReader::default();
    reader.set_file(INDEX_TPL, INDEX_TPL_TEXT, 1);
    reader
}

fn render_frame_at(offset: usize, back: Option<FrameRef>) -> FrameRef {
    let mut context = RenderContext::default();
    context.push_layer(HashMap::from([
        ("title".to_string(), Value::Str("hello".to_string())),
        ("body".to_string(), Value::Str("world".to_string())),
    ]));
    Frame::new_render(
        "render",
        RENDERER_SRC,
        40,
        back,
        RenderCall {
            source: Some(TemplateSource {
                origin: INDEX_TPL.to_string(),
                offset,
            }),
            context,
        },
    )
}

#[test]
fn test_template_breakpoint() {
    let info = TestInfo::default();
    let debugger = Debugger::builder()
        .with_hooks(TestHooks::new(info.clone(), vec![]))
        .with_source_reader(reader_with_template())
        .build();
    info.attach(&debugger);
    debugger
        .breakpoints()
        .add_template(Breakpoint::new(INDEX_TPL, 2));

    let tracer = debugger.tracer(ThreadId(1));
    let main = Frame::new("main", APP_SRC, 3, None);

    // rendering the first template line passes through
    let render = render_frame_at(0, Some(main.clone()));
    assert_eq!(
        tracer.dispatch(&render, &TraceEvent::Call),
        Some(Continuation::Dispatch)
    );
    assert!(info.stops.lock().unwrap().is_empty());

    // the node at template line 2 hits
    let offset = INDEX_TPL_TEXT.find("{{ body }}").unwrap();
    let render = render_frame_at(offset, Some(main.clone()));
    tracer.dispatch(&render, &TraceEvent::Call);

    let stops = info.stops.lock().unwrap();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].file, PathBuf::from(INDEX_TPL));
    assert_eq!(stops[0].line, 2);
    assert_eq!(stops[0].code_name, TEMPLATE_FRAME_NAME);
    assert_eq!(stops[0].reason, SuspendReason::TemplateBreakpoint);
}

#[test]
fn test_template_breakpoint_condition_fails_closed() {
    let info = TestInfo::default();
    // the default evaluator cannot evaluate anything
    let debugger = Debugger::builder()
        .with_hooks(TestHooks::new(info.clone(), vec![]))
        .with_source_reader(reader_with_template())
        .build();
    info.attach(&debugger);
    debugger
        .breakpoints()
        .add_template(Breakpoint::new(INDEX_TPL, 1).with_condition("title"));

    let tracer = debugger.tracer(ThreadId(1));
    let render = render_frame_at(0, None);
    assert_eq!(
        tracer.dispatch(&render, &TraceEvent::Call),
        Some(Continuation::Dispatch)
    );
    assert!(info.stops.lock().unwrap().is_empty());
}

#[test]
fn test_template_breakpoint_condition_on_context() {
    let info = TestInfo::default();
    let debugger = Debugger::builder()
        .with_hooks(TestHooks::new(info.clone(), vec![]))
        .with_source_reader(reader_with_template())
        .with_evaluator(|expression: &str, frame: &FrameRef| {
            frame
                .local(expression)
                .ok_or_else(|| anyhow::anyhow!("name `{expression}` is not defined"))
        })
        .build();
    info.attach(&debugger);
    debugger
        .breakpoints()
        .add_template(Breakpoint::new(INDEX_TPL, 1).with_condition("title"));

    let tracer = debugger.tracer(ThreadId(1));
    // context bindings are the locals of the synthetic frame
    let render = render_frame_at(0, None);
    tracer.dispatch(&render, &TraceEvent::Call);
    assert_eq!(info.stops.lock().unwrap().len(), 1);
}

#[test]
fn test_template_step_over_stops_at_next_render() {
    let info = TestInfo::default();
    let debugger = Debugger::builder()
        .with_hooks(TestHooks::new(info.clone(), vec![ResumeCommand::StepOver]))
        .with_source_reader(reader_with_template())
        .build();
    info.attach(&debugger);
    debugger
        .breakpoints()
        .add_template(Breakpoint::new(INDEX_TPL, 1));

    let tracer = debugger.tracer(ThreadId(1));
    let main = Frame::new("main", APP_SRC, 3, None);

    let render = render_frame_at(0, Some(main.clone()));
    tracer.dispatch(&render, &TraceEvent::Call);
    assert_eq!(info.stops.lock().unwrap().len(), 1);

    // interpreter-level noise between two render calls is stepped over
    let helper = Frame::new("helper", RENDERER_SRC, 60, Some(render.clone()));
    tracer.dispatch(&helper, &TraceEvent::Call);
    line(&tracer, &helper, 61);
    assert_eq!(info.stops.lock().unwrap().len(), 1);

    let offset = INDEX_TPL_TEXT.find("{{ body }}").unwrap();
    let next_render = render_frame_at(offset, Some(main.clone()));
    tracer.dispatch(&next_render, &TraceEvent::Call);

    let stops = info.stops.lock().unwrap();
    assert_eq!(stops.len(), 2);
    assert_eq!(stops[1].file, PathBuf::from(INDEX_TPL));
    assert_eq!(stops[1].line, 2);
    assert_eq!(stops[1].code_name, TEMPLATE_FRAME_NAME);
    assert_eq!(stops[1].reason, SuspendReason::Step(StepCommand::StepOver));
}

#[test]
fn test_template_step_into_interpreter_code() {
    let info = TestInfo::default();
    let debugger = Debugger::builder()
        .with_hooks(TestHooks::new(info.clone(), vec![ResumeCommand::StepInto]))
        .with_source_reader(reader_with_template())
        .build();
    info.attach(&debugger);
    debugger
        .breakpoints()
        .add_template(Breakpoint::new(INDEX_TPL, 1));

    let tracer = debugger.tracer(ThreadId(1));
    let main = Frame::new("main", APP_SRC, 3, None);
    let render = render_frame_at(0, Some(main.clone()));
    tracer.dispatch(&render, &TraceEvent::Call);
    assert_eq!(info.stops.lock().unwrap().len(), 1);

    let resolve = Frame::new("resolve_lookup", RENDERER_SRC, 50, Some(render.clone()));
    tracer.dispatch(&resolve, &TraceEvent::Call);

    // a renderer context lookup is not user code, no stop there
    let lookup = Frame::new("get", RENDERER_SRC, 70, Some(resolve.clone()));
    tracer.dispatch(&lookup, &TraceEvent::Call);
    line(&tracer, &lookup, 71);
    assert_eq!(info.stops.lock().unwrap().len(), 1);

    // a user tag implementation below the resolve entry is
    let tag = Frame::new("my_tag", "tags.src", 5, Some(resolve.clone()));
    tracer.dispatch(&tag, &TraceEvent::Call);
    line(&tracer, &tag, 5);

    let stops = info.stops.lock().unwrap();
    assert_eq!(stops.len(), 2);
    assert_eq!(stops[1].code_name, "my_tag");
    assert_eq!(stops[1].reason, SuspendReason::Step(StepCommand::StepInto));
}

#[test]
fn test_template_exception_break() {
    let info = TestInfo::default();
    let debugger = Debugger::builder()
        .with_hooks(TestHooks::new(info.clone(), vec![]))
        .with_source_reader(reader_with_template())
        .build();
    info.attach(&debugger);
    debugger.breakpoints().set_template_exception_break(true);

    let tracer = debugger.tracer(ThreadId(1));
    let main = Frame::new("main", APP_SRC, 3, None);
    let render = render_frame_at(0, Some(main.clone()));
    let resolve = Frame::new("resolve_lookup", RENDERER_SRC, 50, Some(render.clone()));

    let event = TraceEvent::Exception(raised(
        &resolve,
        50,
        "VariableDoesNotExist",
        "missing is not in the context",
    ));
    assert_eq!(
        tracer.dispatch(&resolve, &event),
        Some(Continuation::Dispatch)
    );

    let stops = info.stops.lock().unwrap();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].file, PathBuf::from(INDEX_TPL));
    assert_eq!(stops[0].code_name, TEMPLATE_FRAME_NAME);
    assert_eq!(stops[0].reason, SuspendReason::TemplateException);
    assert_eq!(
        tracer.thread().message(),
        Some("VariableDoesNotExist".to_string())
    );

    // the display stack includes the synthetic frame and its render chain
    let stacks = info.exception_stacks.lock().unwrap();
    assert_eq!(stacks.len(), 1);
    assert_eq!(stacks[0].0, "VariableDoesNotExist");
    assert!(stacks[0].1 >= 3);
}

#[test]
fn test_template_exception_needs_boundary() {
    let info = TestInfo::default();
    let debugger = Debugger::builder()
        .with_hooks(TestHooks::new(info.clone(), vec![]))
        .with_source_reader(reader_with_template())
        .build();
    info.attach(&debugger);
    debugger.breakpoints().set_template_exception_break(true);

    let tracer = debugger.tracer(ThreadId(1));
    let main = Frame::new("main", APP_SRC, 3, None);
    let render = render_frame_at(0, Some(main.clone()));
    // not one of the renderer boundary functions
    let helper = Frame::new("helper", RENDERER_SRC, 60, Some(render.clone()));

    let event = TraceEvent::Exception(raised(
        &helper,
        60,
        "VariableDoesNotExist",
        "missing is not in the context",
    ));
    assert_eq!(
        tracer.dispatch(&helper, &event),
        Some(Continuation::ExceptionOnly)
    );
    assert!(info.stops.lock().unwrap().is_empty());
}
