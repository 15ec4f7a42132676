// Layered configuration loading for bankgate
//
// Sources are applied in order: defaults, `.env` file, configuration files,
// then prefixed environment variables. Later sources win key by key.

pub mod env;
pub mod error;
pub mod loader;

pub use env::EnvOverlay;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Builder collecting configuration sources
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    defaults: Option<Value>,
    dotenv: Option<Option<PathBuf>>,
    files: Vec<(PathBuf, Option<FileFormat>)>,
    env: Option<EnvOverlay>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base values every other source overrides
    pub fn defaults(mut self, defaults: Value) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// Load a `.env` file into the process environment before reading it.
    /// `None` means the `.env` in the working directory, which may be absent.
    pub fn dotenv(mut self, path: Option<PathBuf>) -> Self {
        self.dotenv = Some(path);
        self
    }

    /// Add a configuration file; its format is detected from the path
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push((path.into(), None));
        self
    }

    /// Add a configuration file with an explicit format
    pub fn file_with_format(mut self, path: impl Into<PathBuf>, format: FileFormat) -> Self {
        self.files.push((path.into(), Some(format)));
        self
    }

    /// Overlay environment variables carrying this prefix
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env = Some(EnvOverlay::new(prefix));
        self
    }

    /// Merge every source into one tree
    pub fn build_value(self) -> Result<Value> {
        let mut root = self
            .defaults
            .unwrap_or_else(|| Value::Object(Map::new()));

        if let Some(path) = self.dotenv {
            load_dotenv(path.as_deref())?;
        }

        for (path, format) in self.files {
            let loader = match format {
                Some(format) => ConfigLoader::new(format),
                None => ConfigLoader::auto(&path)?,
            };
            merge(&mut root, loader.load_file(&path)?);
        }

        if let Some(overlay) = self.env {
            overlay.apply(&mut root);
        }

        Ok(root)
    }

    /// Merge every source and deserialize the result
    pub fn build<T: DeserializeOwned>(self) -> Result<T> {
        let value = self.build_value()?;
        serde_json::from_value(value).map_err(|e| ConfigError::DeserializationError(e.to_string()))
    }
}

/// Load a `.env` file into the process environment.
///
/// An explicit path must exist; without one, a missing `.env` in the working
/// directory is not an error.
pub fn load_dotenv(path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)
                .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    Ok(())
}

/// Deep-merge `overlay` into `base`. Objects merge per key, anything else replaces.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Interpret a raw string the way env-style sources do: numbers and booleans
/// become typed values, everything else stays a string.
pub fn scalar(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
        _ => Value::String(raw.to_string()),
    }
}

/// Set `value` at `path`, creating (or replacing non-object) parents on the way.
pub(crate) fn insert_path(root: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(last.to_string(), value);
    }
}
