use askr_core::{AskrError, AskrResult};
use std::collections::HashMap;

/// Placeholder for the pipeline input.
pub const INPUT: &str = "input";
/// Placeholder for the output of the step just before.
pub const PREVIOUS: &str = "previous";

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Var(String),
}

/// A prompt with `{{name}}` placeholders.
///
/// `{{input}}` is the pipeline input, `{{previous}}` the output of the step
/// before, and `{{<step>}}` the output of any earlier named step. Whitespace
/// inside the braces is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse `text`. An unterminated or empty placeholder is a config error.
    pub fn parse(text: &str) -> AskrResult<Self> {
        let mut segments = Vec::new();
        let mut rest = text;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                AskrError::Config(format!("unterminated '{{{{' in prompt template: {text:?}"))
            })?;
            let name = after[..end].trim();
            if name.is_empty() {
                return Err(AskrError::Config("empty '{{}}' in prompt template".into()));
            }
            segments.push(Segment::Var(name.to_string()));
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Ok(Self { segments })
    }

    /// Names referenced, in order of first appearance.
    pub fn references(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Var(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Substitute every placeholder. A name with no value is a config error.
    pub fn render(&self, vars: &HashMap<String, String>) -> AskrResult<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Var(name) => {
                    let value = vars.get(name).ok_or_else(|| {
                        AskrError::Config(format!(
                            "prompt references '{{{{{name}}}}}' but no such output is available"
                        ))
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_named_outputs() {
        let template =
            PromptTemplate::parse("<topic>{{ input }}</topic><research>{{research}}</research>")
                .unwrap();
        let out = template
            .render(&vars(&[("input", "rust"), ("research", "notes")]))
            .unwrap();
        assert_eq!(out, "<topic>rust</topic><research>notes</research>");
        assert_eq!(template.references(), vec!["input", "research"]);
    }

    #[test]
    fn missing_reference_is_config_error() {
        let template = PromptTemplate::parse("use {{previous}}").unwrap();
        let err = template.render(&vars(&[("input", "x")])).unwrap_err();
        assert!(matches!(err, AskrError::Config(_)));
        assert!(err.to_string().contains("{{previous}}"), "{err}");
    }

    #[test]
    fn malformed_placeholders() {
        assert!(PromptTemplate::parse("oops {{input").is_err());
        assert!(PromptTemplate::parse("oops {{ }}").is_err());
    }

    #[test]
    fn plain_text_passes_through() {
        let template = PromptTemplate::parse("no placeholders { here }").unwrap();
        assert_eq!(
            template.render(&HashMap::new()).unwrap(),
            "no placeholders { here }"
        );
    }
}
