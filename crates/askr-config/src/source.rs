use askr_core::{AskrError, AskrResult};
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One configuration document to be merged.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// A YAML file on disk. A leading `~` is expanded to the home directory.
    File(PathBuf),
    /// YAML text held in memory, labelled for error messages.
    Inline {
        /// Label used in diagnostics.
        name: String,
        /// The YAML document.
        text: String,
    },
    /// An already-built document tree (CLI overrides, pipeline bases).
    Value {
        /// Label used in diagnostics.
        name: String,
        /// The document root; must be a mapping.
        value: Value,
    },
}

impl ConfigSource {
    /// A file source.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// An in-memory YAML source.
    pub fn inline(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Inline {
            name: name.into(),
            text: text.into(),
        }
    }

    /// A document that only sets `agent.instructions`.
    pub fn instructions_override(instructions: impl Into<String>) -> Self {
        let mut agent = Mapping::new();
        agent.insert(
            Value::String("instructions".into()),
            Value::String(instructions.into()),
        );
        let mut root = Mapping::new();
        root.insert(Value::String("agent".into()), Value::Mapping(agent));
        Self::Value {
            name: "instructions override".into(),
            value: Value::Mapping(root),
        }
    }

    /// Resolve `path` against `base` unless it is absolute or home-relative.
    pub fn file_relative_to(base: &Path, path: &str) -> Self {
        if path.starts_with('~') || Path::new(path).is_absolute() {
            Self::file(path)
        } else {
            Self::file(base.join(path))
        }
    }

    /// Read and parse the document. An empty document is an empty mapping.
    pub fn load(&self) -> AskrResult<Value> {
        let value = match self {
            ConfigSource::File(path) => {
                let expanded = expand_home(path);
                debug!(path = %expanded.display(), "loading config layer");
                let text = std::fs::read_to_string(&expanded).map_err(|e| {
                    AskrError::Config(format!(
                        "Failed to read config '{}': {}",
                        expanded.display(),
                        e
                    ))
                })?;
                parse(&text, self)?
            }
            ConfigSource::Inline { text, .. } => parse(text, self)?,
            ConfigSource::Value { value, .. } => value.clone(),
        };

        match value {
            Value::Null => Ok(Value::Mapping(Mapping::new())),
            Value::Mapping(_) => Ok(value),
            _ => Err(AskrError::Config(format!(
                "Config '{self}' must contain a mapping at the root"
            ))),
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Inline { name, .. } | ConfigSource::Value { name, .. } => {
                write!(f, "<{name}>")
            }
        }
    }
}

fn parse(text: &str, source: &ConfigSource) -> AskrResult<Value> {
    serde_yaml::from_str(text)
        .map_err(|e| AskrError::Config(format!("Failed to parse config '{source}': {e}")))
}

/// Expand a leading `~` in `path`.
/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).into_owned()),
        None => path.to_path_buf(),
    }
}
