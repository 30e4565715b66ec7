use serde_yaml::{Mapping, Value};

/// Deep-merge `src` into `dst`; `src` wins on scalar and sequence conflicts.
///
/// Mappings merge recursively. Keys already present keep their position, new
/// keys are appended, so declaration order survives an override. A null
/// source (an empty `mcp:` key) is no override for a mapping.
pub fn merge_values(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Mapping(_), Value::Null) => {}
        (Value::Mapping(d), Value::Mapping(s)) => {
            for (k, v) in s {
                match d.get_mut(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => {
                        d.insert(k, v);
                    }
                }
            }
        }
        (dst, src) => *dst = src,
    }
}

/// Merge an ordered list of documents left to right.
pub fn merge_documents<I>(documents: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    let mut merged = Value::Mapping(Mapping::new());
    for doc in documents {
        merge_values(&mut merged, doc);
    }
    merged
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn val(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = val("x: 1");
        merge_values(&mut dst, val("x: 2"));
        assert_eq!(dst["x"].as_i64(), Some(2));
    }

    #[test]
    fn merge_preserves_keys_not_in_src() {
        let mut dst = val("a: 1\nb: 2");
        merge_values(&mut dst, val("b: 99"));
        assert_eq!(dst["a"].as_i64(), Some(1));
        assert_eq!(dst["b"].as_i64(), Some(99));
    }

    #[test]
    fn merge_nested_mappings() {
        let mut dst = val("llm:\n  model: openai:gpt-4o\n  temperature: 0.2");
        merge_values(&mut dst, val("llm:\n  model: ollama:qwen3"));
        assert_eq!(dst["llm"]["model"].as_str(), Some("ollama:qwen3"));
        assert_eq!(dst["llm"]["temperature"].as_f64(), Some(0.2));
    }

    #[test]
    fn sequences_are_replaced_not_concatenated() {
        let mut dst = val("mcp:\n  fs:\n    command: [npx, server-fs, /tmp]");
        merge_values(&mut dst, val("mcp:\n  fs:\n    command: [uvx, fs]"));
        let argv: Vec<&str> = dst["mcp"]["fs"]["command"]
            .as_sequence()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(argv, vec!["uvx", "fs"]);
    }

    #[test]
    fn override_keeps_declaration_order() {
        let merged = merge_documents([
            val("mcp:\n  alpha: {url: a}\n  beta: {url: b}"),
            val("mcp:\n  gamma: {url: c}\n  alpha: {url: a2}"),
        ]);
        let keys: Vec<&str> = merged["mcp"]
            .as_mapping()
            .unwrap()
            .keys()
            .map(|k| k.as_str().unwrap())
            .collect();
        assert_eq!(keys, vec!["alpha", "beta", "gamma"]);
        assert_eq!(merged["mcp"]["alpha"]["url"].as_str(), Some("a2"));
    }

    #[test]
    fn empty_key_does_not_wipe_earlier_mapping() {
        let merged = merge_documents([
            val("mcp:\n  fs: {command: [fs-server]}\nagent:\n  name: a"),
            val("mcp:\nagent:\n  name: b"),
        ]);
        assert_eq!(merged["mcp"]["fs"]["command"][0].as_str(), Some("fs-server"));
        assert_eq!(merged["agent"]["name"].as_str(), Some("b"));

        // A null scalar still overrides a scalar.
        let mut dst = val("x: 1");
        merge_values(&mut dst, val("x: ~"));
        assert!(dst["x"].is_null());
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let a = val("agent:\n  instructions: hi\nmcp:\n  s1: {url: x, enabled: true}");
        let b = val("agent:\n  name: other\nmcp:\n  s1: {enabled: false}\n  s2: {url: y}");
        let once = merge_documents([a, b]);
        let twice = merge_documents([once.clone()]);
        assert_eq!(once, twice);
    }
}
