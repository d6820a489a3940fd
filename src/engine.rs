//! The merge engine.
//!
//! `FireMacro` owns a model (the template tree), a context stack and an
//! optional data source. `parse` walks the model: strings run through the
//! macro matcher, arrays recurse element-wise, and objects dispatch on their
//! keys. Directive keys (`$DATA`, `$EACH`, `$LOG`, ...) invoke handlers;
//! every other key is ordinary data. Connector frames pushed by earlier keys
//! of an object stay visible to its later keys, which is why objects keep
//! insertion order end to end.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_recursion::async_recursion;
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::config::MacroOptions;
use crate::context::{ContextStack, Frame, FrameGuard};
use crate::datasource::{DataSource, LogEntry, LogLevel};
use crate::directive::{directive_kind, DirectiveKind};
use crate::error::MacroResult;
use crate::resolver;
use crate::tokenizer;
use crate::value::{normalize, Value};

/// Accumulated state for one `$COUNT` key. Counters live on the engine, so
/// they persist across `parse` calls.
#[derive(Debug, Clone)]
struct Counter {
    threshold: u64,
    count: u64,
    action: CounterAction,
}

#[derive(Debug, Clone)]
enum CounterAction {
    Log(Value),
    Do(Value),
    None,
}

impl Counter {
    fn from_spec(spec: &Value) -> Self {
        match spec {
            // "3:message" fires a log every third invocation
            Value::String(s) => {
                let (threshold, message) = match s.split_once(':') {
                    Some((n, msg)) => (n.trim().parse().unwrap_or(0), msg.to_string()),
                    None => (s.trim().parse().unwrap_or(0), String::new()),
                };
                let action = if message.is_empty() {
                    CounterAction::None
                } else {
                    CounterAction::Log(Value::String(message))
                };
                Self {
                    threshold,
                    count: 0,
                    action,
                }
            }
            Value::Number(n) if *n >= 0.0 => Self {
                threshold: *n as u64,
                count: 0,
                action: CounterAction::None,
            },
            obj @ Value::Object(_) => {
                let threshold = obj
                    .get("threshold")
                    .and_then(Value::as_number)
                    .filter(|n| *n >= 0.0)
                    .unwrap_or(0.0) as u64;
                let action = if let Some(template) = obj.get("do") {
                    CounterAction::Do(template.clone())
                } else if let Some(message) = obj.get("log") {
                    CounterAction::Log(message.clone())
                } else {
                    CounterAction::None
                };
                Self {
                    threshold,
                    count: 0,
                    action,
                }
            }
            _ => Self {
                threshold: 0,
                count: 0,
                action: CounterAction::None,
            },
        }
    }
}

/// The macro interpreter.
pub struct FireMacro {
    model: Value,
    options: MacroOptions,
    data_source: Option<Arc<dyn DataSource>>,
    stack: ContextStack,
    counters: DashMap<String, Counter>,
}

impl FireMacro {
    pub fn new(model: impl Into<Value>, options: MacroOptions) -> Self {
        let stack = ContextStack::new();
        if !options.no_helpers {
            stack.install(Frame::Helpers);
        }
        Self {
            model: model.into(),
            options,
            data_source: None,
            stack,
            counters: DashMap::new(),
        }
    }

    pub fn with_data_source(mut self, data_source: Arc<dyn DataSource>) -> Self {
        self.data_source = Some(data_source);
        self
    }

    /// Swap the model. Counters and the helper frame survive the swap.
    pub fn set_model(&mut self, model: impl Into<Value>) {
        self.model = model.into();
    }

    pub(crate) fn stack(&self) -> &ContextStack {
        &self.stack
    }

    pub(crate) fn options(&self) -> &MacroOptions {
        &self.options
    }

    /// Merge the model against the engine's current context.
    pub async fn parse(&self) -> MacroResult<Value> {
        self.parse_with(Vec::new()).await
    }

    /// Merge the model with extra data frames pushed for the duration of
    /// this call only, top of the stack last.
    pub async fn parse_with(&self, frames: Vec<Value>) -> MacroResult<Value> {
        let _guards: Vec<FrameGuard> = frames
            .into_iter()
            .map(|frame| self.stack.push_data(frame))
            .collect();
        let merged = self.traverse(&self.model).await?;
        Ok(normalize(merged))
    }

    #[async_recursion]
    pub(crate) async fn traverse(&self, node: &Value) -> MacroResult<Value> {
        match node {
            Value::String(text) => self.traverse_string(text).await,
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.traverse(item).await?);
                }
                Ok(Value::Array(out))
            }
            Value::Object(pairs) => self.traverse_object(pairs).await,
            other => Ok(other.clone()),
        }
    }

    async fn traverse_string(&self, text: &str) -> MacroResult<Value> {
        let resolved = tokenizer::identify(self, text).await?;
        if resolved.protect {
            return Ok(Value::Opaque(Box::new(resolved.value)));
        }
        match resolved.value {
            Value::String(s) => Ok(Value::String(s)),
            // a macro resolved to structured data: its strings may carry
            // macros of their own
            other => self.traverse(&other).await,
        }
    }

    async fn traverse_object(&self, pairs: &[(String, Value)]) -> MacroResult<Value> {
        let mut result = Value::Object(Vec::new());
        let mut guards: Vec<FrameGuard> = Vec::new();
        for (key, val) in pairs {
            match directive_kind(key) {
                Some(DirectiveKind::Writer) => {
                    let sub = self.run_writer(key, val).await?;
                    result = merge_result(result, sub);
                }
                Some(DirectiveKind::Connector) => {
                    let frame = self.run_connector(key, val).await?;
                    guards.push(self.stack.push_data(frame));
                }
                Some(DirectiveKind::Monitor) => {
                    if let Some(sub) = self.run_monitor(key, val).await? {
                        result = merge_result(result, sub);
                    }
                }
                None => {
                    let merged_key = tokenizer::identify(self, key).await?.value.to_string();
                    let merged_val = self.traverse(val).await?;
                    if let Value::Object(entries) = &mut result {
                        entries.push((merged_key, merged_val));
                    }
                }
            }
        }
        drop(guards);
        Ok(result)
    }

    async fn run_connector(&self, key: &str, val: &Value) -> MacroResult<Value> {
        match key {
            "$TRYGET" => match self.connect_data(val).await {
                Ok(frame) => Ok(frame),
                Err(err) => {
                    self.log(LogLevel::Warning, &format!("optional fetch failed: {}", err))
                        .await;
                    Ok(Value::Null)
                }
            },
            _ => self.connect_data(val).await,
        }
    }

    /// Assemble a data frame from a connector value. String entries are
    /// data-source references and get fetched; anything else is inline data.
    /// The `_` alias makes the fetched value the frame itself.
    async fn connect_data(&self, val: &Value) -> MacroResult<Value> {
        let resolved = normalize(self.traverse(val).await?);
        let entries: Vec<(String, Value)> = match resolved {
            Value::Object(pairs) => pairs,
            other => vec![("_".to_string(), other)],
        };
        let mut frame: Vec<(String, Value)> = Vec::new();
        for (alias, entry) in entries {
            let fetched = match entry {
                Value::String(reference) => {
                    if reference.is_empty() {
                        continue;
                    }
                    let Some(ds) = self.data_source.as_ref() else {
                        debug!(reference = %reference, "no data source, skipping fetch");
                        continue;
                    };
                    ds.get(&reference).await?
                }
                inline => inline,
            };
            if alias == "_" {
                return Ok(fetched);
            }
            frame.push((alias, fetched));
        }
        Ok(Value::Object(frame))
    }

    async fn run_monitor(&self, key: &str, val: &Value) -> MacroResult<Option<Value>> {
        match key {
            "$LOG" => {
                self.monitor_log(val).await?;
                Ok(None)
            }
            "$COUNT" => self.count(val).await,
            "$SLEEP" => {
                let ms = normalize(self.traverse(val).await?)
                    .as_number()
                    .unwrap_or(0.0);
                if ms > 0.0 {
                    tokio::time::sleep(Duration::from_millis(ms as u64)).await;
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    async fn monitor_log(&self, val: &Value) -> MacroResult<()> {
        let rendered = normalize(self.traverse(val).await?);
        let (level, message) = match &rendered {
            Value::String(s) => (LogLevel::Info, s.clone()),
            other => {
                let level = other
                    .get("level")
                    .map(|v| v.to_string())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(LogLevel::Info);
                let message = other
                    .get("message")
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| other.to_string());
                (level, message)
            }
        };
        if self.stack.has_log_capability() {
            self.log(level, &message).await;
        } else {
            error!("{}", message);
        }
        Ok(())
    }

    /// `$COUNT`: register a counter keyed by the raw spec, bump it, and fire
    /// its action on every Nth invocation. A zero threshold never fires.
    async fn count(&self, val: &Value) -> MacroResult<Option<Value>> {
        let id = val.to_json().to_string();
        let fired = {
            let mut counter = self
                .counters
                .entry(id)
                .or_insert_with(|| Counter::from_spec(val));
            counter.count += 1;
            if counter.threshold > 0 && counter.count % counter.threshold == 0 {
                Some((counter.count, counter.action.clone()))
            } else {
                None
            }
        };
        let Some((count, action)) = fired else {
            return Ok(None);
        };
        // the running total is visible to the fired action as {count}
        let _guard = self.stack.push_data(Value::Object(vec![(
            "count".to_string(),
            Value::Number(count as f64),
        )]));
        match action {
            CounterAction::Log(message) => {
                let rendered = normalize(self.traverse(&message).await?);
                self.log(LogLevel::Info, &rendered.to_string()).await;
                Ok(None)
            }
            CounterAction::Do(template) => Ok(Some(normalize(self.traverse(&template).await?))),
            CounterAction::None => Ok(None),
        }
    }

    async fn run_writer(&self, key: &str, val: &Value) -> MacroResult<Value> {
        match key {
            "$EACH" => self.each(val).await,
            "$PIPE" => self.pipe(val).await,
            "$JSON" => self.json(val).await,
            "$ASSIGN" => self.assign(val).await,
            "$IF" => self.branch(val).await,
            "$REDUCE" => self.reduce(val).await,
            "$MAP" => self.map(val).await,
            "$CONCAT" => self.concat(val).await,
            "$SORT" => self.sort(val).await,
            "$VALUE" => self.value_of(val).await,
            "$PUT" => self.store("put", val).await,
            "$POST" => self.store("post", val).await,
            _ => Ok(Value::Null),
        }
    }

    /// `$EACH`: run a template once per list element, each element pushed as
    /// the top frame. With both `data` and `template` keys the list comes
    /// through the connector path; otherwise the current top frame is the
    /// list and the whole value is the template. A non-list iterable yields
    /// an empty list.
    async fn each(&self, val: &Value) -> MacroResult<Value> {
        let (data, template) = match val.get("data").zip(val.get("template")) {
            Some((source, template)) => {
                let data = match self.connect_data(source).await {
                    Ok(frame) => frame,
                    Err(err) => {
                        self.log(
                            LogLevel::Warning,
                            &format!("iteration source failed: {}", err),
                        )
                        .await;
                        Value::Null
                    }
                };
                (data, template.clone())
            }
            None => (self.stack.top_value(), val.clone()),
        };
        let Value::Array(items) = normalize(data) else {
            return Ok(Value::Array(Vec::new()));
        };
        let template_is_array = matches!(template, Value::Array(_));
        let guard = self.stack.push_data(Value::Null);
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            guard.swap(item);
            let produced = normalize(self.traverse(&template).await?);
            match produced {
                // an array result under a non-array template splices in flat
                Value::Array(inner) if !template_is_array => out.extend(inner),
                other => out.push(other),
            }
        }
        drop(guard);
        Ok(Value::Array(out))
    }

    /// `$PIPE`: evaluate stages in order; each stage sees the previous
    /// stage's result as the top frame. The final stage's result wins.
    async fn pipe(&self, val: &Value) -> MacroResult<Value> {
        let Value::Array(stages) = val else {
            return Ok(normalize(self.traverse(val).await?));
        };
        let mut current = Value::Null;
        let mut guard: Option<FrameGuard> = None;
        for stage in stages {
            let produced = normalize(self.traverse(stage).await?);
            drop(guard.take());
            current = produced;
            guard = Some(self.stack.push_data(current.clone()));
        }
        drop(guard);
        Ok(current)
    }

    /// `$JSON`: merge macros inside a JSON text, parse it, then merge the
    /// parsed tree. Parse failures become an error node instead of aborting
    /// the whole merge.
    async fn json(&self, val: &Value) -> MacroResult<Value> {
        let text = match val {
            Value::String(s) => tokenizer::identify(self, s).await?.value.to_string(),
            other => normalize(self.traverse(other).await?).to_json().to_string(),
        };
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(parsed) => {
                let tree = Value::from(parsed);
                Ok(normalize(self.traverse(&tree).await?))
            }
            Err(err) => {
                warn!(%err, "embedded JSON failed to parse");
                Ok(Value::Object(vec![(
                    "error".to_string(),
                    Value::String(format!("invalid JSON: {}", err)),
                )]))
            }
        }
    }

    /// `$ASSIGN`: fold a list of objects into one, later keys overwriting
    /// earlier ones. Non-object items are skipped.
    async fn assign(&self, val: &Value) -> MacroResult<Value> {
        let resolved = normalize(self.traverse(val).await?);
        let Value::Array(items) = resolved else {
            return Ok(resolved);
        };
        let mut merged: Vec<(String, Value)> = Vec::new();
        for item in items {
            if let Value::Object(pairs) = item {
                for (k, v) in pairs {
                    upsert(&mut merged, k, v);
                }
            }
        }
        Ok(Value::Object(merged))
    }

    /// `$IF`: `eq` as a list means all entries must be equal to the first
    /// (vacuously true when the list is empty); anything else is plain
    /// truthiness. The chosen branch is merged, a missing branch yields null.
    async fn branch(&self, val: &Value) -> MacroResult<Value> {
        let condition = match val.get("eq") {
            Some(test) => {
                let resolved = normalize(self.traverse(test).await?);
                match resolved {
                    Value::Array(items) => match items.split_first() {
                        Some((first, rest)) => rest.iter().all(|v| v == first),
                        None => true,
                    },
                    other => other.truthy(),
                }
            }
            None => false,
        };
        let branch = if condition {
            val.get("then")
        } else {
            val.get("else")
        };
        match branch {
            Some(node) => Ok(normalize(self.traverse(node).await?)),
            None => Ok(Value::Null),
        }
    }

    /// `$REDUCE`: fold a list through a template. The accumulator is visible
    /// as `{result}` and the current element as the top frame. A non-list
    /// iterable yields the untouched seed.
    async fn reduce(&self, val: &Value) -> MacroResult<Value> {
        let (data, template, seed) = match val.get("data").zip(val.get("template")) {
            Some((source, template)) => (
                normalize(self.traverse(source).await?),
                template.clone(),
                val.get("result").cloned(),
            ),
            None => (self.stack.top_value(), val.clone(), None),
        };
        let mut acc = match seed {
            Some(seed) => normalize(self.traverse(&seed).await?),
            None => Value::String(String::new()),
        };
        let Value::Array(items) = normalize(data) else {
            return Ok(acc);
        };
        for item in items {
            let result_frame = self.stack.push_data(Value::Object(vec![(
                "result".to_string(),
                acc.clone(),
            )]));
            let item_frame = self.stack.push_data(item);
            acc = normalize(self.traverse(&template).await?);
            drop(item_frame);
            drop(result_frame);
        }
        Ok(acc)
    }

    /// `$MAP`: one result per element; `result` seeds the output list, and
    /// a non-list iterable yields just that seed.
    async fn map(&self, val: &Value) -> MacroResult<Value> {
        let (data, template, seed) = match val.get("data").zip(val.get("template")) {
            Some((source, template)) => (
                normalize(self.traverse(source).await?),
                template.clone(),
                val.get("result").cloned(),
            ),
            None => (self.stack.top_value(), val.clone(), None),
        };
        let mut out = match seed {
            Some(seed) => match normalize(self.traverse(&seed).await?) {
                Value::Array(seeded) => seeded,
                _ => Vec::new(),
            },
            None => Vec::new(),
        };
        let Value::Array(items) = normalize(data) else {
            return Ok(Value::Array(out));
        };
        for item in items {
            let guard = self.stack.push_data(item);
            out.push(normalize(self.traverse(&template).await?));
            drop(guard);
        }
        Ok(Value::Array(out))
    }

    /// `$CONCAT`: merge each piece and collect the truthy ones, splicing
    /// lists in flat.
    async fn concat(&self, val: &Value) -> MacroResult<Value> {
        let Value::Array(pieces) = val else {
            return Ok(normalize(self.traverse(val).await?));
        };
        let mut out = Vec::new();
        for piece in pieces {
            let produced = normalize(self.traverse(piece).await?);
            if !produced.truthy() {
                continue;
            }
            match produced {
                Value::Array(items) => out.extend(items),
                other => out.push(other),
            }
        }
        Ok(Value::Array(out))
    }

    /// `$SORT`: stable multi-key sort of the list on top of the stack, keys
    /// given as `"field:dir"` pairs. The sorted list replaces the top frame
    /// in place and is also the node's result.
    async fn sort(&self, val: &Value) -> MacroResult<Value> {
        let spec = normalize(self.traverse(val).await?);
        let Value::String(spec) = spec else {
            self.log(LogLevel::Error, "sort expects a key specification string")
                .await;
            return Ok(Value::Null);
        };
        let Value::Array(mut items) = self.stack.top_value() else {
            self.log(LogLevel::Error, "sort expects a list on the context stack")
                .await;
            return Ok(Value::Null);
        };
        let keys: Vec<(String, f64)> = spec
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (field, dir) = part.split_once(':').unwrap_or((part, "1"));
                let dir: f64 = dir.trim().parse().unwrap_or(1.0);
                (field.trim().to_string(), if dir == 0.0 { 1.0 } else { dir })
            })
            .collect();
        items.sort_by(|a, b| {
            for (field, dir) in &keys {
                let ordering = compare(&sort_key(a, field), &sort_key(b, field));
                if ordering != Ordering::Equal {
                    return if *dir < 0.0 { ordering.reverse() } else { ordering };
                }
            }
            Ordering::Equal
        });
        let sorted = Value::Array(items);
        self.stack.replace_top(sorted.clone());
        Ok(sorted)
    }

    /// `$VALUE`: resolve a fixed path and keep the result final, exempt from
    /// further macro scanning.
    async fn value_of(&self, val: &Value) -> MacroResult<Value> {
        let path = resolver::split_path(&val.to_string());
        let resolved = resolver::resolve_path(self, path, true).await?;
        Ok(resolved.value)
    }

    /// `$PUT` / `$POST`: hand a merged payload to the data source. A string
    /// value is shorthand for writing the current top frame to that url.
    async fn store(&self, method: &'static str, val: &Value) -> MacroResult<Value> {
        let ds = self.data_source.as_ref();
        let supported = ds
            .map(|ds| match method {
                "put" => ds.supports_put(),
                _ => ds.supports_post(),
            })
            .unwrap_or(false);
        let Some(ds) = ds.filter(|_| supported) else {
            self.log(
                LogLevel::Error,
                &format!("Datasource doesn't define '{}'", method),
            )
            .await;
            return Ok(Value::Null);
        };
        let spec = match val {
            Value::String(url) => Value::Object(vec![
                ("url".to_string(), Value::String(url.clone())),
                ("data".to_string(), Value::String("{$value.}".to_string())),
            ]),
            other => other.clone(),
        };
        let resolved = normalize(self.traverse(&spec).await?);
        let url = resolved.get("url").map(|v| v.to_string()).unwrap_or_default();
        let data = resolved.get("data").cloned().unwrap_or(Value::Null);
        let stored = match method {
            "put" => ds.put(&url, data).await?,
            _ => ds.post(&url, data).await?,
        };
        Ok(stored)
    }

    /// Route a log entry to the data source when it accepts logs, otherwise
    /// to the process-level subscriber.
    pub(crate) async fn log(&self, level: LogLevel, message: &str) {
        if let Some(ds) = self.data_source.as_ref() {
            if ds.supports_log() {
                if let Err(err) = ds.log(LogEntry::new(level, message)).await {
                    error!(%err, "log delivery failed");
                }
                return;
            }
        }
        match level {
            LogLevel::Error => error!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Info | LogLevel::Success => info!("{}", message),
        }
    }
}

/// Fold one directive's result into the node result: objects merge key-wise
/// into an object result, everything else replaces it.
fn merge_result(current: Value, sub: Value) -> Value {
    match sub {
        Value::Object(pairs) => {
            if let Value::Object(mut existing) = current {
                for (k, v) in pairs {
                    upsert(&mut existing, k, v);
                }
                Value::Object(existing)
            } else {
                Value::Object(pairs)
            }
        }
        other => other,
    }
}

fn upsert(pairs: &mut Vec<(String, Value)>, key: String, value: Value) {
    if let Some(slot) = pairs.iter_mut().find(|(k, _)| *k == key) {
        slot.1 = value;
    } else {
        pairs.push((key, value));
    }
}

fn sort_key(item: &Value, field: &str) -> Value {
    match item.get(field) {
        Some(v) if v.truthy() => v.clone(),
        _ => Value::Number(0.0),
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
