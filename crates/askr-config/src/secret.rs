use crate::source::expand_home;
use askr_core::{AskrError, AskrResult};
use std::fmt;
use std::path::Path;

/// A credential reference from `llm.api_key`.
///
/// Parsed at composition time, resolved only when the model descriptor is
/// materialized.
#[derive(Clone, PartialEq, Eq)]
pub enum SecretRef {
    /// `env:NAME`: the value of an environment variable.
    Env(String),
    /// `file:path`: trimmed contents of a file.
    File(String),
    /// Any other string, used as-is.
    Literal(String),
}

impl SecretRef {
    /// Parse a reference. A `scheme:` prefix that is neither `env` nor `file`
    /// is rejected so typos such as `evn:KEY` never leak out as literal keys.
    pub fn parse(raw: &str) -> AskrResult<Self> {
        if let Some(name) = raw.strip_prefix("env:") {
            if name.is_empty() {
                return Err(AskrError::Config(
                    "Secret reference 'env:' is missing a variable name".into(),
                ));
            }
            return Ok(Self::Env(name.to_string()));
        }
        if let Some(path) = raw.strip_prefix("file:") {
            if path.is_empty() {
                return Err(AskrError::Config(
                    "Secret reference 'file:' is missing a path".into(),
                ));
            }
            return Ok(Self::File(path.to_string()));
        }
        if let Some((scheme, _)) = raw.split_once(':') {
            if looks_like_scheme(scheme) {
                return Err(AskrError::Config(format!(
                    "Unknown secret scheme '{scheme}:' (expected 'env:' or 'file:')"
                )));
            }
        }
        Ok(Self::Literal(raw.to_string()))
    }

    /// Resolve the reference to its secret value.
    pub fn resolve(&self) -> AskrResult<String> {
        match self {
            SecretRef::Env(name) => std::env::var(name).map_err(|_| {
                AskrError::Config(format!(
                    "Environment variable '{name}' not set for 'env:{name}'"
                ))
            }),
            SecretRef::File(path) => {
                let expanded = expand_home(Path::new(path));
                std::fs::read_to_string(&expanded)
                    .map(|s| s.trim().to_string())
                    .map_err(|e| {
                        AskrError::Config(format!(
                            "Failed to read secret file '{}' for 'file:{}': {}",
                            expanded.display(),
                            path,
                            e
                        ))
                    })
            }
            SecretRef::Literal(value) => Ok(value.clone()),
        }
    }
}

fn looks_like_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl fmt::Debug for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretRef::Env(name) => write!(f, "env:{name}"),
            SecretRef::File(path) => write!(f, "file:{path}"),
            SecretRef::Literal(_) => write!(f, "<literal>"),
        }
    }
}
