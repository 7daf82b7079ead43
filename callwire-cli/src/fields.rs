//! Command-line field syntax and JSON rendering of envelopes.

use anyhow::{Context, Result, bail};
use callwire::{Envelope, Fields, Value};
use serde_json::{Map, json};

/// Parses `key=value`, `key:int=1`, `key:long=1` or `key:bool=true`.
pub fn parse(arg: &str) -> Result<(String, Value)> {
    let (key, raw) = arg
        .split_once('=')
        .with_context(|| format!("field `{arg}` is not key=value"))?;
    let (name, kind) = key.split_once(':').unwrap_or((key, "str"));
    if name.is_empty() {
        bail!("field `{arg}` has an empty key");
    }
    let value = match kind {
        "str" => Value::from(raw),
        "int" => Value::Int(raw.parse().with_context(|| format!("`{raw}` is not an int"))?),
        "long" => Value::Long(raw.parse().with_context(|| format!("`{raw}` is not a long"))?),
        "bool" => Value::Bool(raw.parse().with_context(|| format!("`{raw}` is not a bool"))?),
        other => bail!("unknown field type `{other}`"),
    };
    Ok((name.to_owned(), value))
}

/// Renders fields as a JSON object.
pub fn to_json(fields: &Fields) -> serde_json::Value {
    let map: Map<_, _> = fields
        .iter()
        .map(|(key, value)| (key.clone(), value_to_json(value)))
        .collect();
    serde_json::Value::Object(map)
}

/// Renders an envelope as `{"action": .., "fields": {..}}`.
pub fn envelope_to_json(envelope: &Envelope) -> serde_json::Value {
    json!({
        "action": envelope.action(),
        "fields": to_json(envelope.fields()),
    })
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::String(s) => json!(s),
        Value::Int(v) => json!(v),
        Value::Long(v) => json!(v),
        Value::Bool(v) => json!(v),
        Value::Bytes(b) => json!(b),
        Value::BytesArray(items) => json!(items),
        Value::Envelope(e) => envelope_to_json(e),
        Value::Token(t) => json!({ "token": t.as_bytes() }),
        Value::IntArray(v) => json!(v),
        other => json!(other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_fields() {
        assert_eq!(parse("name=bob").unwrap(), ("name".to_owned(), Value::from("bob")));
        assert_eq!(parse("n:int=-3").unwrap().1, Value::Int(-3));
        assert_eq!(parse("id:long=9000000000").unwrap().1, Value::Long(9_000_000_000));
        assert_eq!(parse("ok:bool=true").unwrap().1, Value::Bool(true));
        assert_eq!(parse("eq=a=b").unwrap().1, Value::from("a=b"));
    }

    #[test]
    fn malformed_fields() {
        assert!(parse("novalue").is_err());
        assert!(parse("=x").is_err());
        assert!(parse("n:int=abc").is_err());
        assert!(parse("n:float=1.0").is_err());
    }

    #[test]
    fn renders_nested_values() {
        let inner = Envelope::new("inner").with("k", 1);
        let fields = Fields::from([
            ("s".to_owned(), Value::from("x")),
            ("e".to_owned(), Value::Envelope(Box::new(inner))),
            ("v".to_owned(), Value::IntArray(vec![1, 2])),
        ]);
        assert_eq!(
            to_json(&fields),
            json!({
                "s": "x",
                "e": { "action": "inner", "fields": { "k": 1 } },
                "v": [1, 2],
            })
        );
    }
}
