use fabric::query::{eval_str, parse, template};
use fabric::Value;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

fn first(source: &str, input: serde_json::Value) -> Value {
    eval_str(source, &Value::from(input))
        .unwrap()
        .into_iter()
        .next()
        .unwrap_or_default()
}

proptest! {
    #[test]
    fn prop_addition_matches_integers(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000) {
        prop_assert_eq!(first(".a + .b", json!({"a": a, "b": b})), Value::from(a + b));
    }

    #[test]
    fn prop_list_builtins_agree(items in prop::collection::vec(-1000i64..1000, 1..20)) {
        let input = json!(items);
        prop_assert_eq!(first("length", input.clone()), Value::from(items.len()));
        prop_assert_eq!(first("sort | first", input.clone()), Value::from(*items.iter().min().unwrap()));
        prop_assert_eq!(first("max", input.clone()), Value::from(*items.iter().max().unwrap()));
        let doubled: i64 = items.iter().map(|i| i * 2).sum();
        prop_assert_eq!(first("map(. * 2) | add", input), Value::from(doubled));
    }

    #[test]
    fn prop_map_lookup(key in "[a-z]{1,8}", value in any::<i32>()) {
        let input = json!({ key.clone(): value });
        prop_assert_eq!(first(&format!(".[\"{}\"]", key), input.clone()), Value::from(value));
        prop_assert_eq!(first(&format!(".[\"{}_missing\"]", key), input), Value::Null);
    }

    #[test]
    fn prop_parser_never_panics(source in "\\PC{0,40}") {
        let _ = parse(&source);
    }
}

#[test]
fn test_indexing_scalar_is_an_error() {
    assert!(eval_str(".a.b", &Value::from(json!({"a": 1}))).is_err());
    assert_eq!(
        eval_str(".a.b?", &Value::from(json!({"a": 1}))).unwrap(),
        Vec::<Value>::new()
    );
}

#[test]
fn test_generators_and_bindings() {
    let input = Value::from(json!({"items": [{"n": 1}, {"n": 2}, {"n": 3}]}));
    let out = eval_str(".items[] | select(.n > 1) | .n", &input).unwrap();
    assert_eq!(out, vec![Value::from(2), Value::from(3)]);
    let out = eval_str(".items | length as $n | map(.n * $n)", &input).unwrap();
    assert_eq!(out, vec![Value::from(json!([3, 6, 9]))]);
}

#[test]
fn test_template_interpolation() {
    let data = Value::from(json!({"vars": {"who": "world", "list": [1, 2]}}));
    assert_eq!(
        template::render("hi {{ .vars.who }} {{ .vars.list }}", &data).unwrap(),
        "hi world [1,2]"
    );
}
