use tracing::warn;

use crate::value::Value;

/// `$math` helper: named sub-operations plus a fallback to the standard
/// float function library.
pub(crate) fn eval(args: &[Value]) -> Value {
    let Some(method) = args.first() else {
        return Value::Null;
    };
    let method = method.to_string();
    let rest = &args[1..];
    match method.as_str() {
        "as" => cast(rest),
        "add" => fold(rest, |a, b| a + b),
        "subtract" => fold(rest, |a, b| a - b),
        "multiply" => fold(rest, |a, b| a * b),
        "divide" => divide(rest),
        "precision" => precision(rest),
        "diff" => diff(rest),
        other => builtin(other, rest),
    }
}

fn numbers(args: &[Value]) -> Vec<f64> {
    args.iter()
        .map(|v| v.as_number().unwrap_or(f64::NAN))
        .collect()
}

fn fold(args: &[Value], op: impl Fn(f64, f64) -> f64) -> Value {
    let mut values = numbers(args).into_iter();
    let Some(first) = values.next() else {
        return Value::Null;
    };
    Value::Number(values.fold(first, op))
}

/// Division never raises: any zero or non-numeric operand anywhere in the
/// argument list yields `0`.
fn divide(args: &[Value]) -> Value {
    let values = numbers(args);
    if values.is_empty() || values.iter().any(|n| *n == 0.0 || n.is_nan()) {
        return Value::Number(0.0);
    }
    let mut iter = values.into_iter();
    let first = iter.next().unwrap_or(0.0);
    Value::Number(iter.fold(first, |a, b| a / b))
}

/// `precision(p, x)`: fixed-point rendering, string result.
fn precision(args: &[Value]) -> Value {
    let places = args
        .first()
        .and_then(Value::as_number)
        .map(|p| p.max(0.0) as usize)
        .unwrap_or(0);
    let x = args.get(1).and_then(Value::as_number).unwrap_or(f64::NAN);
    Value::String(format!("{:.*}", places, x))
}

/// Signed percent difference between two values, negative when the first is
/// larger.
fn diff(args: &[Value]) -> Value {
    let a = args.first().and_then(Value::as_number).unwrap_or(f64::NAN);
    let b = args.get(1).and_then(Value::as_number).unwrap_or(f64::NAN);
    let places = args.get(2).and_then(Value::as_number).unwrap_or(0.0) as i32;
    let factor = 10f64.powi(places);
    let spread = ((a - b).abs() / ((a + b) / 2.0) * 100.0 * factor).round() / factor;
    Value::Number(if a > b { -spread } else { spread })
}

/// `as(cast, value, ...)`: type-cast-and-format.
fn cast(args: &[Value]) -> Value {
    let cast = args.first().map(|v| v.to_string()).unwrap_or_default();
    let raw = args.get(1).cloned().unwrap_or(Value::Null);
    if cast == "string" {
        return Value::String(raw.to_string());
    }
    // strip currency characters and other noise before parsing
    let numeric_text: String = raw
        .to_string()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    let number = numeric_text.parse::<f64>().unwrap_or(f64::NAN);
    let b = args.get(2).map(|v| v.to_string());
    let c = args.get(3).map(|v| v.to_string());
    match cast.as_str() {
        "integer" => {
            let n = number.trunc();
            if b.as_deref() == Some("pretty") {
                Value::String(pretty(n, 0))
            } else {
                Value::Number(n)
            }
        }
        "float" => {
            let mut n = number;
            let places = b.as_deref().and_then(|p| p.parse::<i32>().ok());
            if let Some(p) = places.filter(|p| *p > 0) {
                let exp = 10f64.powi(p);
                n = (n * exp).round() / exp;
            }
            if c.as_deref() == Some("pretty") || b.as_deref() == Some("pretty") {
                Value::String(pretty(n, places.unwrap_or(0).max(0) as usize))
            } else {
                Value::Number(n)
            }
        }
        "currency" => {
            let symbol = match b.as_deref().unwrap_or("USD") {
                "USD" => "$".to_string(),
                "EUR" => "\u{20ac}".to_string(),
                "GBP" => "\u{a3}".to_string(),
                "JPY" => "\u{a5}".to_string(),
                other => format!("{} ", other),
            };
            Value::String(format!("{}{}", symbol, pretty(number, 2)))
        }
        "percent" => {
            let places = b
                .as_deref()
                .and_then(|p| p.parse::<usize>().ok())
                .unwrap_or(2);
            Value::String(format!("{}%", pretty(number * 100.0, places)))
        }
        _ => raw,
    }
}

/// Thousands-separated fixed-point rendering.
fn pretty(n: f64, places: usize) -> String {
    if !n.is_finite() {
        return n.to_string();
    }
    let rendered = format!("{:.*}", places, n.abs());
    let (int_part, frac_part) = match rendered.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (rendered, None),
    };
    let mut grouped = String::new();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let mut out = String::new();
    if n < 0.0 {
        out.push('-');
    }
    out.push_str(&grouped);
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(&frac);
    }
    out
}

/// Fallback for unrecognized names: the standard float function library.
fn builtin(name: &str, args: &[Value]) -> Value {
    let values = numbers(args);
    let x = values.first().copied().unwrap_or(f64::NAN);
    let y = values.get(1).copied().unwrap_or(f64::NAN);
    let result = match name {
        "abs" => x.abs(),
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "round" => x.round(),
        "trunc" => x.trunc(),
        "sqrt" => x.sqrt(),
        "cbrt" => x.cbrt(),
        "exp" => x.exp(),
        "log" | "ln" => x.ln(),
        "log10" => x.log10(),
        "log2" => x.log2(),
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        "atan" => x.atan(),
        "atan2" => x.atan2(y),
        "pow" => x.powf(y),
        "sign" => x.signum(),
        "min" => values.iter().copied().fold(f64::INFINITY, f64::min),
        "max" => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        "random" => rand::random::<f64>(),
        _ => {
            warn!("$math: unrecognized operation '{}'", name);
            return Value::Null;
        }
    };
    Value::Number(result)
}
