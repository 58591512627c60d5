use crate::debugger::frame::{FrameRef, Value};
use anyhow::bail;

/// Pluggable expression evaluation capability.
///
/// The engine calls it for breakpoint conditions and display expressions and
/// assumes nothing about the evaluator beyond "returns a value or fails".
/// Evaluation happens against the given frame local bindings (for synthetic
/// template frames these are the flattened context layers).
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, frame: &FrameRef) -> anyhow::Result<Value>;
}

impl<F> ExpressionEvaluator for F
where
    F: Fn(&str, &FrameRef) -> anyhow::Result<Value> + Send + Sync,
{
    fn evaluate(&self, expression: &str, frame: &FrameRef) -> anyhow::Result<Value> {
        self(expression, frame)
    }
}

/// Default evaluator: evaluation is not available, so any condition fails
/// and, fail closed, never stops the debugged program.
pub struct NullEvaluator;

impl ExpressionEvaluator for NullEvaluator {
    fn evaluate(&self, expression: &str, _frame: &FrameRef) -> anyhow::Result<Value> {
        bail!("no evaluator installed, cannot evaluate `{expression}`")
    }
}
