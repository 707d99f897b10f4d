//! Sandboxed, synchronous condition/expression evaluation (spec §4.3).
//!
//! Expressions gate a check's `if` and are also used for routing's
//! `runExpr`/`gotoExpr` fields. Evaluation never performs I/O, never loads
//! code, and is bounded both in wall time and in the size of the context it
//! is given — evaluation failures are fail-secure (the condition is treated
//! as `false`, never propagated as an error), per spec §4.3.

use crate::config::EventInfo;
use crate::journal::ContextView;
use evalexpr::{ContextWithMutableVariables, Value as EvalValue};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;

/// Read-only context exposed to an expression evaluation (spec §4.3).
pub struct EvalContext<'a> {
    pub outputs: &'a ContextView,
    pub event: &'a EventInfo,
    pub env: &'a HashMap<String, String>,
    /// Check ids the expression is allowed to reference from `outputs`,
    /// kept explicit so the context built per evaluation stays bounded
    /// rather than flattening the entire journal.
    pub visible_checks: &'a [String],
}

/// Wall-clock cap per evaluation (spec: "a few hundred milliseconds").
const EVAL_TIME_BUDGET: Duration = Duration::from_millis(300);
/// Input size cap: total flattened bindings built for one evaluation.
const MAX_BINDINGS: usize = 2_000;
/// Depth cap when flattening nested JSON output values into bindings.
const MAX_FLATTEN_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalOutcome {
    True,
    False,
}

impl EvalOutcome {
    pub fn as_bool(self) -> bool {
        matches!(self, EvalOutcome::True)
    }
}

/// Evaluates a boolean gate expression. Any failure (parse error, type
/// error, timeout) evaluates to `false` — this function never returns `Err`
/// to the caller, matching the fail-secure policy in spec §4.3.
pub async fn evaluate_bool(expression: &str, ctx: EvalContext<'_>) -> EvalOutcome {
    match evaluate_value(expression, ctx).await {
        Some(JsonValue::Bool(b)) => {
            if b {
                EvalOutcome::True
            } else {
                EvalOutcome::False
            }
        }
        _ => EvalOutcome::False,
    }
}

/// Evaluates an expression expected to produce a `string[]` (routing
/// `runExpr`), returning an empty vector on any failure.
pub async fn evaluate_string_list(expression: &str, ctx: EvalContext<'_>) -> Vec<String> {
    match evaluate_value(expression, ctx).await {
        Some(JsonValue::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        Some(JsonValue::String(s)) => vec![s],
        _ => Vec::new(),
    }
}

/// Evaluates an expression expected to produce a single check id (routing
/// `gotoExpr`), returning `None` on any failure.
pub async fn evaluate_string(expression: &str, ctx: EvalContext<'_>) -> Option<String> {
    match evaluate_value(expression, ctx).await {
        Some(JsonValue::String(s)) => Some(s),
        _ => None,
    }
}

async fn evaluate_value(expression: &str, ctx: EvalContext<'_>) -> Option<JsonValue> {
    let context = build_context(&ctx);
    let expression_owned = expression.to_string();
    let expression_for_log = expression_owned.clone();

    let eval = tokio::task::spawn_blocking(move || {
        let mut eval_ctx = context;
        evalexpr::eval_with_context_mut(&expression_owned, &mut eval_ctx)
    });

    match tokio::time::timeout(EVAL_TIME_BUDGET, eval).await {
        Ok(Ok(Ok(value))) => eval_value_to_json(value),
        Ok(Ok(Err(err))) => {
            tracing::warn!(error = %err, expression = %expression_for_log, "condition evaluation failed");
            None
        }
        Ok(Err(join_err)) => {
            tracing::warn!(error = %join_err, "condition evaluation task panicked");
            None
        }
        Err(_timeout) => {
            tracing::warn!(expression = %expression_for_log, "condition evaluation exceeded time budget");
            None
        }
    }
}

fn build_context(ctx: &EvalContext<'_>) -> evalexpr::HashMapContext {
    let mut bindings: HashMap<String, EvalValue> = HashMap::new();

    insert_capped(&mut bindings, "event_name".to_string(), EvalValue::String(ctx.event.event_name.clone()));
    insert_capped(&mut bindings, "branch".to_string(), EvalValue::String(ctx.event.branch.clone()));
    insert_capped(
        &mut bindings,
        "base_branch".to_string(),
        EvalValue::String(ctx.event.base_branch.clone()),
    );
    insert_capped(
        &mut bindings,
        "files_changed_count".to_string(),
        EvalValue::Int(ctx.event.files_changed.len() as i64),
    );

    for (key, value) in ctx.env {
        insert_capped(&mut bindings, format!("env_{}", sanitize(key)), EvalValue::String(value.clone()));
    }

    for check_id in ctx.visible_checks {
        if let Some(result) = ctx.outputs.get(check_id) {
            if let Some(output) = result.output {
                flatten_into(&mut bindings, &format!("outputs_{}", sanitize(check_id)), &output, 0);
            }
        }
    }

    let mut context = evalexpr::HashMapContext::new();
    for (name, value) in bindings {
        let _ = context.set_value(name, value);
    }
    context
}

fn insert_capped(bindings: &mut HashMap<String, EvalValue>, key: String, value: EvalValue) {
    if bindings.len() < MAX_BINDINGS {
        bindings.insert(key, value);
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn flatten_into(bindings: &mut HashMap<String, EvalValue>, prefix: &str, value: &JsonValue, depth: usize) {
    if bindings.len() >= MAX_BINDINGS {
        return;
    }
    match value {
        JsonValue::Null => {}
        JsonValue::Bool(b) => insert_capped(bindings, prefix.to_string(), EvalValue::Boolean(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                insert_capped(bindings, prefix.to_string(), EvalValue::Int(i));
            } else if let Some(f) = n.as_f64() {
                insert_capped(bindings, prefix.to_string(), EvalValue::Float(f));
            }
        }
        JsonValue::String(s) => insert_capped(bindings, prefix.to_string(), EvalValue::String(s.clone())),
        JsonValue::Array(items) => {
            insert_capped(bindings, format!("{prefix}_count"), EvalValue::Int(items.len() as i64));
            if depth < MAX_FLATTEN_DEPTH {
                for (i, item) in items.iter().enumerate() {
                    flatten_into(bindings, &format!("{prefix}_{i}"), item, depth + 1);
                }
            }
        }
        JsonValue::Object(map) => {
            if depth < MAX_FLATTEN_DEPTH {
                for (k, v) in map {
                    flatten_into(bindings, &format!("{prefix}_{}", sanitize(k)), v, depth + 1);
                }
            }
        }
    }
}

fn eval_value_to_json(value: EvalValue) -> Option<JsonValue> {
    match value {
        EvalValue::String(s) => Some(JsonValue::String(s)),
        EvalValue::Boolean(b) => Some(JsonValue::Bool(b)),
        EvalValue::Int(i) => Some(JsonValue::Number(i.into())),
        EvalValue::Float(f) => serde_json::Number::from_f64(f).map(JsonValue::Number),
        EvalValue::Tuple(items) => {
            let values: Vec<JsonValue> = items.into_iter().filter_map(eval_value_to_json).collect();
            Some(JsonValue::Array(values))
        }
        EvalValue::Empty => None,
    }
}
