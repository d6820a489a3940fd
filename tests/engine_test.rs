use firemacro::{FireMacro, MacroOptions, Value};
use pretty_assertions::assert_eq;
use serde_json::json;

fn engine(model: serde_json::Value) -> FireMacro {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    FireMacro::new(Value::from(model), MacroOptions::default())
}

#[tokio::test]
async fn plain_substitution_in_text() {
    let merged = engine(json!("hello {name}, you have {n} messages"))
        .parse_with(vec![Value::from(json!({"name": "ada", "n": 3}))])
        .await
        .unwrap();
    assert_eq!(merged, Value::from("hello ada, you have 3 messages"));
}

#[tokio::test]
async fn single_expression_keeps_its_type() {
    let merged = engine(json!("{n}"))
        .parse_with(vec![Value::from(json!({"n": 5}))])
        .await
        .unwrap();
    assert_eq!(merged, Value::Number(5.0));

    let merged = engine(json!("{user}"))
        .parse_with(vec![Value::from(json!({"user": {"name": "ada"}}))])
        .await
        .unwrap();
    assert_eq!(merged, Value::from(json!({"name": "ada"})));
}

#[tokio::test]
async fn unresolved_paths_pass_through_literally() {
    let merged = engine(json!("value: {missing}")).parse().await.unwrap();
    assert_eq!(merged, Value::from("value: {missing}"));
}

#[tokio::test]
async fn clear_option_blanks_unresolved_paths() {
    let options = MacroOptions {
        clear: true,
        ..Default::default()
    };
    let engine = FireMacro::new(Value::from("value: {missing}"), options);
    assert_eq!(engine.parse().await.unwrap(), Value::from("value: "));
}

#[tokio::test]
async fn defaults_apply_when_unresolved_or_empty() {
    let merged = engine(json!("{missing|fallback}")).parse().await.unwrap();
    assert_eq!(merged, Value::from("fallback"));

    // an empty resolved string also yields the default
    let merged = engine(json!("{name|anonymous}"))
        .parse_with(vec![Value::from(json!({"name": ""}))])
        .await
        .unwrap();
    assert_eq!(merged, Value::from("anonymous"));

    // the literal default "null" forces an actual null
    let merged = engine(json!("{missing|null}")).parse().await.unwrap();
    assert_eq!(merged, Value::Null);
}

#[tokio::test]
async fn unbalanced_braces_are_not_macros() {
    for text in ["{open", "close}", "a } b { c"] {
        let merged = engine(json!(text)).parse().await.unwrap();
        assert_eq!(merged, Value::from(text));
    }
}

#[tokio::test]
async fn double_brace_literals_pass_through() {
    let merged = engine(json!("keep {{handlebars.var}} here"))
        .parse_with(vec![Value::from(json!({"handlebars": "nope"}))])
        .await
        .unwrap();
    assert_eq!(merged, Value::from("keep {{handlebars.var}} here"));
}

#[tokio::test]
async fn expansions_are_rescanned() {
    let merged = engine(json!("{reference}"))
        .parse_with(vec![Value::from(json!({
            "reference": "{inner}",
            "inner": "deep"
        }))])
        .await
        .unwrap();
    assert_eq!(merged, Value::from("deep"));
}

#[tokio::test]
async fn protected_expressions_are_not_rescanned() {
    let merged = engine(json!("{!reference}"))
        .parse_with(vec![Value::from(json!({
            "reference": "{inner}",
            "inner": "deep"
        }))])
        .await
        .unwrap();
    assert_eq!(merged, Value::from("{inner}"));
}

#[tokio::test]
async fn later_frames_shadow_earlier_ones() {
    let merged = engine(json!("{env}"))
        .parse_with(vec![
            Value::from(json!({"env": "base", "region": "eu"})),
            Value::from(json!({"env": "override"})),
        ])
        .await
        .unwrap();
    assert_eq!(merged, Value::from("override"));

    // keys absent from the top frame fall through
    let merged = engine(json!("{region}"))
        .parse_with(vec![
            Value::from(json!({"env": "base", "region": "eu"})),
            Value::from(json!({"env": "override"})),
        ])
        .await
        .unwrap();
    assert_eq!(merged, Value::from("eu"));
}

#[tokio::test]
async fn dotted_paths_descend_objects_and_record_lists() {
    let frame = Value::from(json!({
        "user": {"address": {"city": "Oslo"}},
        "fields": [
            {"name": "a", "value": 10},
            {"name": "b", "value": 20}
        ]
    }));
    let merged = engine(json!("{user.address.city}"))
        .parse_with(vec![frame.clone()])
        .await
        .unwrap();
    assert_eq!(merged, Value::from("Oslo"));

    let merged = engine(json!("{fields.b}"))
        .parse_with(vec![frame])
        .await
        .unwrap();
    assert_eq!(merged, Value::Number(20.0));
}

#[tokio::test]
async fn iso_strings_format_with_a_trailing_pattern() {
    let merged = engine(json!("{created.YYYY-MM-DD}"))
        .parse_with(vec![Value::from(
            json!({"created": "2024-03-05T06:07:08.000Z"}),
        )])
        .await
        .unwrap();
    assert_eq!(merged, Value::from("2024-03-05"));
}

#[tokio::test]
async fn object_keys_are_merged_too() {
    let merged = engine(json!({"{key}": "{val}"}))
        .parse_with(vec![Value::from(json!({"key": "name", "val": "ada"}))])
        .await
        .unwrap();
    assert_eq!(merged.to_json(), json!({"name": "ada"}));
}

#[tokio::test]
async fn math_helper_evaluates_inline() {
    assert_eq!(
        engine(json!("{$math.add.1.2.3}")).parse().await.unwrap(),
        Value::Number(6.0)
    );
    assert_eq!(
        engine(json!("{$math.divide.10.0}")).parse().await.unwrap(),
        Value::Number(0.0)
    );
    // nested expressions resolve before the helper runs
    let merged = engine(json!("{$math.multiply.{n}.4}"))
        .parse_with(vec![Value::from(json!({"n": 3}))])
        .await
        .unwrap();
    assert_eq!(merged, Value::Number(12.0));
}

#[tokio::test]
async fn date_helper_formats_with_parenthesized_patterns() {
    assert_eq!(
        engine(json!("{$date.2024-03-05.to.(YYYY)}"))
            .parse()
            .await
            .unwrap(),
        Value::from("2024")
    );
    assert_eq!(
        engine(json!("{$date.2024-03-05.add.2d.(YYYY-MM-DD)}"))
            .parse()
            .await
            .unwrap(),
        Value::from("2024-03-07")
    );
}

#[tokio::test]
async fn id_helper_generates_requested_length() {
    let merged = engine(json!("{$id.8}")).parse().await.unwrap();
    let Value::String(id) = merged else {
        panic!("expected a string id");
    };
    assert_eq!(id.len(), 8);
    assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
}

#[tokio::test]
async fn value_helper_yields_the_top_frame() {
    let merged = engine(json!("{$value.}"))
        .parse_with(vec![Value::from(json!({"a": 1}))])
        .await
        .unwrap();
    assert_eq!(merged, Value::from(json!({"a": 1})));
}

#[tokio::test]
async fn no_helpers_option_disables_the_helper_frame() {
    let options = MacroOptions {
        no_helpers: true,
        ..Default::default()
    };
    let engine = FireMacro::new(Value::from("{$math.add.1.2}"), options);
    assert_eq!(engine.parse().await.unwrap(), Value::from("{$math.add.1.2}"));
}

#[tokio::test]
async fn set_model_swaps_the_template() {
    let mut engine = FireMacro::new(Value::from("old"), MacroOptions::default());
    assert_eq!(engine.parse().await.unwrap(), Value::from("old"));
    engine.set_model("new {x}");
    let merged = engine
        .parse_with(vec![Value::from(json!({"x": 1}))])
        .await
        .unwrap();
    assert_eq!(merged, Value::from("new 1"));
}
