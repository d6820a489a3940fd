//! Helper functions reachable through path resolution.
//!
//! A path whose leading segment names one of these (`{$math.add.1.2}`,
//! `{$date.now}`, `{$value.}`) invokes the helper with the remaining
//! segments as positional arguments, each already resolved and normalized.

pub(crate) mod date;
pub(crate) mod ident;
pub(crate) mod math;

use crate::datasource::LogLevel;
use crate::engine::FireMacro;
use crate::error::MacroResult;
use crate::resolver::{self, PathSeg};
use crate::value::Value;

pub(crate) const HELPER_NAMES: &[&str] = &["$math", "$date", "$value", "$log", "$id"];

pub(crate) fn is_helper(name: &str) -> bool {
    HELPER_NAMES.contains(&name)
}

/// Invoke a helper by name. Helpers never fail the merge; `$log` reports
/// delivery problems through the engine's log route itself.
pub(crate) async fn call(
    engine: &FireMacro,
    name: &str,
    args: Vec<Value>,
) -> MacroResult<Value> {
    match name {
        "$math" => Ok(math::eval(&args)),
        "$date" => Ok(date::eval(&args)),
        "$id" => Ok(ident::generate(args.first())),
        "$log" => {
            let level = args
                .first()
                .map(|v| v.to_string())
                .and_then(|s| s.parse::<LogLevel>().ok())
                .unwrap_or(LogLevel::Info);
            let message = args.get(1).map(|v| v.to_string()).unwrap_or_default();
            engine.log(level, &message).await;
            Ok(Value::Null)
        }
        "$value" => value_handle(engine, args).await,
        _ => Ok(Value::Null),
    }
}

/// `$value`: an explicit attribute resolves as a single-segment path; no
/// attribute (or an empty one) yields the current top-of-stack value. A
/// non-string attribute is already a value and passes through as-is.
async fn value_handle(engine: &FireMacro, args: Vec<Value>) -> MacroResult<Value> {
    match args.into_iter().next() {
        Some(Value::String(attr)) if !attr.is_empty() => {
            let resolved =
                resolver::resolve_path(engine, vec![PathSeg::Text(attr)], false).await?;
            if resolved.protect {
                Ok(Value::Opaque(Box::new(resolved.value)))
            } else {
                Ok(resolved.value)
            }
        }
        Some(Value::String(_)) | Some(Value::Null) | None => Ok(engine.stack().top_value()),
        Some(other) => Ok(other),
    }
}
