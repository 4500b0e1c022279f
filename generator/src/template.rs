//! Minimal placeholder substitution used for manifests and output paths.
//!
//! A template is literal text with `{{ name }}` placeholders. Names are
//! lowercase ASCII letters, digits and underscores. Rendering fails when a
//! placeholder has no value in the context, so a typo never yields a
//! half-filled manifest.

use std::collections::BTreeMap;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template {template:?}: unclosed placeholder at byte {offset}")]
    Unclosed { template: String, offset: usize },

    #[error("template {template:?}: invalid placeholder name {name:?} at byte {offset}")]
    InvalidName {
        template: String,
        name: String,
        offset: usize,
    },

    #[error("template {template:?}: no value for placeholder {name:?}")]
    MissingValue { template: String, name: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    name: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(name: impl Into<String>, source: &str) -> Result<Self, TemplateError> {
        let name = name.into();
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after_open = &rest[start + 2..];
            let Some(end) = after_open.find("}}") else {
                return Err(TemplateError::Unclosed {
                    template: name,
                    offset: offset + start,
                });
            };

            let placeholder = after_open[..end].trim();
            if !is_valid_name(placeholder) {
                return Err(TemplateError::InvalidName {
                    template: name,
                    name: placeholder.to_string(),
                    offset: offset + start,
                });
            }
            segments.push(Segment::Placeholder(placeholder.to_string()));

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Template { name, segments })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(name) = segment
                && !names.contains(&name.as_str())
            {
                names.push(name);
            }
        }
        names
    }

    pub fn render(&self, context: &Context) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value =
                        context
                            .get(name)
                            .ok_or_else(|| TemplateError::MissingValue {
                                template: self.name.clone(),
                                name: name.clone(),
                            })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// Values available to a template while rendering.
#[derive(Clone, Debug, Default)]
pub struct Context {
    values: BTreeMap<&'static str, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(name, value.into());
        self
    }

    pub fn insert(&mut self, name: &'static str, value: impl Into<String>) {
        self.values.insert(name, value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}
