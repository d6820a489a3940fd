//! The macro matcher: a character-by-character scan with brace-nesting
//! awareness.
//!
//! Every `{` opens a path builder, every `}` resolves the innermost one. A
//! resolved plain string splices back into the source and the scan restarts
//! at the splice point, so a macro may expand into further macro syntax.
//! Anything else is appended to the enclosing builder as a typed unit.
//! Unbalanced braces are not errors: the original text passes through
//! unchanged.

use crate::engine::FireMacro;
use crate::error::MacroResult;
use crate::resolver::{self, PathSeg};
use crate::value::{Resolved, Value};

/// Characters permitted inside a macro expression. Anything else marks the
/// expression as ignored and it is restored verbatim.
fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "/|()!$%.,@#&~:_-".contains(c)
}

#[derive(Debug)]
enum Part {
    Text(String),
    Unit(Resolved),
}

/// Bottom-of-stack builder: literal text interleaved with resolved units.
#[derive(Debug, Default)]
struct LiteralBuilder {
    parts: Vec<Part>,
}

impl LiteralBuilder {
    fn add_char(&mut self, c: char) {
        if let Some(Part::Text(text)) = self.parts.last_mut() {
            text.push(c);
        } else {
            self.parts.push(Part::Text(c.to_string()));
        }
    }

    fn add_str(&mut self, s: &str) {
        if let Some(Part::Text(text)) = self.parts.last_mut() {
            text.push_str(s);
        } else {
            self.parts.push(Part::Text(s.to_string()));
        }
    }

    fn add_unit(&mut self, unit: Resolved) {
        self.parts.push(Part::Unit(unit));
    }

    /// A single unit keeps its type; anything else concatenates to text.
    fn finish(mut self) -> Resolved {
        if self.parts.len() == 1 {
            match self.parts.pop() {
                Some(Part::Unit(unit)) => return unit,
                Some(Part::Text(text)) => return Resolved::plain(Value::String(text)),
                None => {}
            }
        }
        let mut out = String::new();
        for part in self.parts {
            match part {
                Part::Text(text) => out.push_str(&text),
                Part::Unit(unit) => out.push_str(&unit.value.to_string()),
            }
        }
        Resolved::plain(Value::String(out))
    }
}

/// Builder for one `{...}` expression: accumulates path segments, tracking
/// parenthesis depth so dots inside `(...)` stay literal.
#[derive(Debug)]
struct PathBuilder {
    raw: String,
    ignore: bool,
    protect: bool,
    parens: usize,
    segs: Vec<PathSeg>,
}

impl PathBuilder {
    fn new() -> Self {
        Self {
            raw: String::new(),
            ignore: false,
            protect: false,
            parens: 0,
            segs: vec![PathSeg::Text(String::new())],
        }
    }

    fn first_is_empty(&self) -> bool {
        self.segs.len() == 1 && matches!(&self.segs[0], PathSeg::Text(t) if t.is_empty())
    }

    fn add_char(&mut self, c: char) {
        self.raw.push(c);
        if !self.ignore {
            if !is_path_char(c) {
                self.ignore = true;
            } else if c == '(' {
                self.parens += 1;
                return;
            } else if c == ')' {
                self.parens = self.parens.saturating_sub(1);
                return;
            } else if c == '.' && self.parens == 0 {
                self.segs.push(PathSeg::Text(String::new()));
                return;
            } else if c == '!' && self.first_is_empty() {
                self.protect = true;
                return;
            }
        }
        self.push_text(&c.to_string());
    }

    fn add_str(&mut self, s: &str) {
        self.raw.push_str(s);
        self.push_text(s);
    }

    fn add_unit(&mut self, unit: Resolved) {
        let rendered = unit.value.to_string();
        self.raw.push_str(&rendered);
        if matches!(self.segs.last(), Some(PathSeg::Text(t)) if t.is_empty()) {
            if let Some(last) = self.segs.last_mut() {
                *last = PathSeg::Unit(unit);
            }
        } else {
            self.push_text(&rendered);
        }
    }

    fn push_text(&mut self, s: &str) {
        let last = self.segs.last_mut().expect("segment present");
        match last {
            PathSeg::Text(text) => text.push_str(s),
            PathSeg::Unit(unit) => {
                let mut text = unit.value.to_string();
                text.push_str(s);
                *last = PathSeg::Text(text);
            }
        }
    }
}

#[derive(Debug)]
enum Builder {
    Literal(LiteralBuilder),
    Path(PathBuilder),
}

impl Builder {
    fn add_char(&mut self, c: char) {
        match self {
            Builder::Literal(b) => b.add_char(c),
            Builder::Path(b) => b.add_char(c),
        }
    }

    fn add_str(&mut self, s: &str) {
        match self {
            Builder::Literal(b) => b.add_str(s),
            Builder::Path(b) => b.add_str(s),
        }
    }

    fn add_unit(&mut self, unit: Resolved) {
        match self {
            Builder::Literal(b) => b.add_unit(unit),
            Builder::Path(b) => b.add_unit(unit),
        }
    }
}

/// A double-brace literal `{{word}}` at the start of `rest`: the escape
/// hatch for foreign template syntax. Word characters, dots and hyphens
/// only, up to the first closing pair.
fn foreign_macro(rest: &[char]) -> Option<String> {
    if rest.len() < 4 || rest[0] != '{' || rest[1] != '{' {
        return None;
    }
    let mut i = 2;
    while i < rest.len()
        && (rest[i].is_ascii_alphanumeric() || matches!(rest[i], '_' | '.' | '-'))
    {
        i += 1;
    }
    if i + 1 < rest.len() && rest[i] == '}' && rest[i + 1] == '}' {
        Some(rest[..i + 2].iter().collect())
    } else {
        None
    }
}

/// Scan a string and resolve every embedded macro expression.
///
/// Returns a typed unit when the whole input was exactly one expression,
/// otherwise the substituted text. Unmatched braces in either direction
/// return the original input unchanged.
pub(crate) async fn identify(engine: &FireMacro, input: &str) -> MacroResult<Resolved> {
    let mut chars: Vec<char> = input.chars().collect();
    let mut builders: Vec<Builder> = vec![Builder::Literal(LiteralBuilder::default())];
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' {
            if let Some(literal) = foreign_macro(&chars[i..]) {
                let len = literal.chars().count();
                top(&mut builders).add_str(&literal);
                i += len;
                continue;
            }
            builders.push(Builder::Path(PathBuilder::new()));
        } else if c == '}' {
            match builders.pop() {
                Some(Builder::Path(builder)) => {
                    if builder.ignore {
                        // invalid expression: restore it verbatim
                        top(&mut builders).add_str(&format!("{{{}}}", builder.raw));
                    } else {
                        let resolved =
                            resolver::resolve_path(engine, builder.segs, builder.protect)
                                .await?;
                        if let (Value::String(s), false) = (&resolved.value, resolved.protect) {
                            // splice the expansion in and restart the scan
                            // from the splice point
                            let mut next: Vec<char> = s.chars().collect();
                            next.extend_from_slice(&chars[i + 1..]);
                            chars = next;
                            i = 0;
                            continue;
                        }
                        top(&mut builders).add_unit(resolved);
                    }
                }
                // unmatched closing brace: not a macro
                _ => return Ok(Resolved::plain(Value::String(input.to_string()))),
            }
        } else {
            top(&mut builders).add_char(c);
        }
        i += 1;
    }
    if builders.len() > 1 {
        // unmatched opening brace: not a macro
        return Ok(Resolved::plain(Value::String(input.to_string())));
    }
    match builders.pop() {
        Some(Builder::Literal(base)) => Ok(base.finish()),
        _ => Ok(Resolved::plain(Value::String(input.to_string()))),
    }
}

fn top(builders: &mut [Builder]) -> &mut Builder {
    builders.last_mut().expect("builder stack never empty")
}
