use serde_json::{Map, Value};

/// Rewrites `snake_case` (or `kebab-case`) to `camelCase`. A separator is only dropped when
/// followed by a letter, so `token_0` and trailing underscores pass through unchanged.
pub fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '_' || c == '-' {
            if let Some(next) = chars.peek().copied().filter(|n| n.is_ascii_alphabetic()) {
                out.push(next.to_ascii_uppercase());
                chars.next();
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Recursively converts every object key in `value` to camelCase. Values are untouched.
pub fn keys_to_camel(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (snake_to_camel(&key), keys_to_camel(value)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(keys_to_camel).collect()),
        other => other,
    }
}
