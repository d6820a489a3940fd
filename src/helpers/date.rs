use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::value::Value;

lazy_static! {
    static ref SHIFT_SPEC: Regex = Regex::new(r"^(\d+)([yQMwdhms])$").expect("shift pattern");
}

/// `$date` helper.
///
/// Arguments: source (`now`, a date, or a parseable date string), optional
/// method (`to`, `from`, `add`, `subtract`), a pattern or shift amount, and
/// an optional output format. Patterns use the conventional date tokens
/// (`YYYY-MM-DD HH:mm:ss`), translated internally to strftime specifiers.
pub(crate) fn eval(args: &[Value]) -> Value {
    let source = args.first().cloned().unwrap_or(Value::Null);
    let method = args.get(1).map(|v| v.to_string()).unwrap_or_default();
    let value = args.get(2).map(|v| v.to_string()).unwrap_or_default();
    let mut format = args.get(3).map(|v| v.to_string());

    if method.is_empty() {
        return match parse_source(&source) {
            Some(dt) => Value::Date(dt),
            None => Value::Null,
        };
    }
    if method == "to" {
        format = Some(value.clone());
    }

    let input = match method.as_str() {
        "to" => parse_source(&source),
        "from" => parse_with_pattern(&source.to_string(), &value),
        "add" | "subtract" => {
            let Some(caps) = SHIFT_SPEC.captures(&value) else {
                return Value::Null;
            };
            let amount: u64 = caps[1].parse().unwrap_or(0);
            let unit = caps[2].chars().next().unwrap_or('d');
            parse_source(&source).and_then(|dt| shift(dt, amount, unit, method == "subtract"))
        }
        _ => return Value::String("NA".to_string()),
    };

    let Some(dt) = input else {
        return Value::Null;
    };
    match format.filter(|f| !f.is_empty()) {
        Some(pattern) => Value::String(format_pattern(&dt, &pattern)),
        None => Value::Date(dt),
    }
}

/// Interpret a source value as a UTC instant. `now` and null mean the
/// current time.
pub(crate) fn parse_source(source: &Value) -> Option<DateTime<Utc>> {
    match source {
        Value::Null => Some(Utc::now()),
        Value::Date(dt) => Some(*dt),
        Value::String(s) if s == "now" || s.is_empty() => Some(Utc::now()),
        Value::String(s) => parse_text(s),
        Value::Number(ms) => Utc.timestamp_millis_opt(*ms as i64).single(),
        Value::Opaque(inner) => parse_source(inner),
        _ => None,
    }
}

fn parse_text(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn parse_with_pattern(s: &str, pattern: &str) -> Option<DateTime<Utc>> {
    let spec = translate(pattern);
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, &spec) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(s, &spec)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn shift(dt: DateTime<Utc>, amount: u64, unit: char, back: bool) -> Option<DateTime<Utc>> {
    let months = |n: u64| {
        let months = Months::new(n as u32);
        if back {
            dt.checked_sub_months(months)
        } else {
            dt.checked_add_months(months)
        }
    };
    let span = |d: Duration| if back { dt.checked_sub_signed(d) } else { dt.checked_add_signed(d) };
    let n = amount as i64;
    match unit {
        'y' => months(amount * 12),
        'Q' => months(amount * 3),
        'M' => months(amount),
        'w' => span(Duration::weeks(n)),
        'd' => span(Duration::days(n)),
        'h' => span(Duration::hours(n)),
        'm' => span(Duration::minutes(n)),
        's' => span(Duration::seconds(n)),
        _ => None,
    }
}

/// Render an instant with a conventional date pattern (`YYYY-MM-DD`).
pub(crate) fn format_pattern(dt: &DateTime<Utc>, pattern: &str) -> String {
    dt.format(&translate(pattern)).to_string()
}

// Token table, longest match first.
const TOKENS: &[(&str, &str)] = &[
    ("YYYY", "%Y"),
    ("YY", "%y"),
    ("MMMM", "%B"),
    ("MMM", "%b"),
    ("MM", "%m"),
    ("M", "%-m"),
    ("dddd", "%A"),
    ("ddd", "%a"),
    ("DD", "%d"),
    ("D", "%-d"),
    ("HH", "%H"),
    ("H", "%-H"),
    ("hh", "%I"),
    ("h", "%-I"),
    ("mm", "%M"),
    ("m", "%-M"),
    ("ss", "%S"),
    ("s", "%-S"),
    ("SSS", "%3f"),
    ("A", "%p"),
    ("a", "%P"),
    ("ZZ", "%z"),
    ("Z", "%:z"),
    ("X", "%s"),
];

fn translate(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    'outer: while i < chars.len() {
        if chars[i] == '%' {
            out.push_str("%%");
            i += 1;
            continue;
        }
        for (token, spec) in TOKENS {
            let token_chars: Vec<char> = token.chars().collect();
            if chars[i..].starts_with(&token_chars) {
                out.push_str(spec);
                i += token_chars.len();
                continue 'outer;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}
