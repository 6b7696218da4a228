use serde_json::{Map, Value};

/// An inbound event body in OneBot shape, normalized to a mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    fields: Map<String, Value>,
    interpreted: bool,
}

impl Payload {
    /// Never fails: values that are not a mapping end up as `{"raw": "<value>"}`.
    pub fn normalize(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self {
                fields,
                interpreted: true,
            },
            Value::String(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(fields)) => Self {
                    fields,
                    interpreted: true,
                },
                _ => Self::uninterpreted(text),
            },
            other => Self::uninterpreted(other.to_string()),
        }
    }

    fn uninterpreted(raw: String) -> Self {
        let mut fields = Map::new();
        fields.insert("raw".to_owned(), Value::String(raw));
        Self {
            fields,
            interpreted: false,
        }
    }

    /// `false` when the original value could not be read as a mapping.
    pub fn is_interpreted(&self) -> bool {
        self.interpreted
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Non empty string field.
    pub fn text_field(&self, name: &str) -> Option<&str> {
        self.str_field(name).filter(|text| !text.trim().is_empty())
    }

    /// Numeric id, `0` when missing or not a number.
    pub fn id_field(&self, name: &str) -> i64 {
        self.get(name).map(coerce_id).unwrap_or(0)
    }

    pub fn to_json_string(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }
}

pub(crate) fn coerce_id(value: &Value) -> i64 {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .unwrap_or(0),
        Value::String(text) => text.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn object_is_kept() {
        let payload = Payload::normalize(json!({"post_type": "notice", "user_id": 1}));
        assert!(payload.is_interpreted());
        assert_eq!(payload.str_field("post_type"), Some("notice"));
        assert_eq!(payload.id_field("user_id"), 1);
    }

    #[test]
    fn json_text_is_parsed() {
        let payload = Payload::normalize(json!(r#"{"group_id": "2002"}"#));
        assert!(payload.is_interpreted());
        assert_eq!(payload.id_field("group_id"), 2002);
    }

    #[test]
    fn garbage_is_wrapped() {
        let payload = Payload::normalize(json!("not an event"));
        assert!(!payload.is_interpreted());
        assert_eq!(payload.str_field("raw"), Some("not an event"));
        assert!(payload.get("post_type").is_none());

        let payload = Payload::normalize(json!([1, 2]));
        assert_eq!(payload.str_field("raw"), Some("[1,2]"));
    }

    #[test]
    fn ids_are_coerced() {
        let payload = Payload::normalize(json!({
            "a": 12.0,
            "b": "x1",
            "c": null,
            "d": 1.5,
            "e": " 42 ",
        }));
        assert_eq!(payload.id_field("a"), 12);
        assert_eq!(payload.id_field("b"), 0);
        assert_eq!(payload.id_field("c"), 0);
        assert_eq!(payload.id_field("d"), 0);
        assert_eq!(payload.id_field("e"), 42);
        assert_eq!(payload.id_field("missing"), 0);
    }

    #[test]
    fn blank_text_is_absent() {
        let payload = Payload::normalize(json!({"flag": "", "comment": "  hi "}));
        assert_eq!(payload.text_field("flag"), None);
        assert_eq!(payload.text_field("comment"), Some("  hi "));
    }
}
