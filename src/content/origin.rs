use super::ContentItem;
use crate::path::ContentPath;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OriginError {
    #[error(
        "{parent} is generation {parent_generation}, so its instances must be generation {}, not {generation}",
        parent_generation + 1
    )]
    GenerationSkip {
        parent: String,
        parent_generation: u32,
        generation: u32,
    },
}

/// A file under the input root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    full_path: PathBuf,
    content_path: ContentPath,
}

impl InputFile {
    pub fn new(input_root: &Path, content_path: ContentPath) -> Self {
        Self {
            full_path: content_path.to_fs_path(input_root),
            content_path,
        }
    }

    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    pub fn content_path(&self) -> &ContentPath {
        &self.content_path
    }
}

impl fmt::Display for InputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.content_path.fmt(f)
    }
}

/// The enumerating item an instance came from.
///
/// Holds the parent weakly: the graph owns every item, and an instance must
/// not keep a finished wave alive on its own.
#[derive(Debug, Clone)]
pub struct GeneratorOrigin {
    parent: Weak<ContentItem>,
    parent_label: String,
    generation: u32,
}

impl GeneratorOrigin {
    pub fn new(parent: &Arc<ContentItem>, generation: u32) -> Result<Self, OriginError> {
        let parent_generation = parent.generation();
        if generation != parent_generation + 1 {
            return Err(OriginError::GenerationSkip {
                parent: parent.origin().to_string(),
                parent_generation,
                generation,
            });
        }
        Ok(Self {
            parent: Arc::downgrade(parent),
            parent_label: parent.origin().to_string(),
            generation,
        })
    }

    pub fn parent(&self) -> Option<Arc<ContentItem>> {
        self.parent.upgrade()
    }

    pub fn parent_label(&self) -> &str {
        &self.parent_label
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// One instance produced by an enumerating template.
#[derive(Debug, Clone)]
pub struct EnumeratedOrigin {
    generator: GeneratorOrigin,
    template: InputFile,
    payload: Value,
}

impl EnumeratedOrigin {
    pub fn new(
        parent: &Arc<ContentItem>,
        generation: u32,
        template: InputFile,
        payload: Value,
    ) -> Result<Self, OriginError> {
        Ok(Self {
            generator: GeneratorOrigin::new(parent, generation)?,
            template,
            payload,
        })
    }

    pub fn generator(&self) -> &GeneratorOrigin {
        &self.generator
    }

    pub fn template(&self) -> &InputFile {
        &self.template
    }

    /// The value this instance was enumerated for (`item` in templates).
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The payload of the enumerating parent, or null for first-level
    /// instances.
    pub fn parent_payload(&self) -> Value {
        self.generator
            .parent()
            .and_then(|parent| parent.origin().payload().cloned())
            .unwrap_or(Value::Null)
    }
}

impl fmt::Display for EnumeratedOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.template, payload_label(&self.payload))
    }
}

/// Where a content item comes from.
#[derive(Debug, Clone)]
pub enum Origin {
    Input(InputFile),
    Enumerated(EnumeratedOrigin),
}

impl Origin {
    /// Input items are generation 0; each enumeration adds one.
    pub fn generation(&self) -> u32 {
        match self {
            Origin::Input(_) => 0,
            Origin::Enumerated(origin) => origin.generator.generation,
        }
    }

    /// The source file behind the item. Enumerated items share their
    /// template's file.
    pub fn input_file(&self) -> &InputFile {
        match self {
            Origin::Input(file) => file,
            Origin::Enumerated(origin) => &origin.template,
        }
    }

    pub fn content_path(&self) -> &ContentPath {
        self.input_file().content_path()
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Origin::Input(_) => None,
            Origin::Enumerated(origin) => Some(&origin.payload),
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self, Origin::Input(_))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Input(file) => file.fmt(f),
            Origin::Enumerated(origin) => origin.fmt(f),
        }
    }
}

/// Short human label for a payload: group keys, page paths, and scalars
/// print as themselves; anything else as compact JSON.
fn payload_label(payload: &Value) -> String {
    const MAX: usize = 40;
    let label = match payload {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("key").or_else(|| map.get("path")) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => payload.to_string(),
        },
        other => other.to_string(),
    };
    if label.chars().count() > MAX {
        let truncated: String = label.chars().take(MAX).collect();
        format!("{truncated}…")
    } else {
        label
    }
}
