//! Prompt templates with `{Column Name}` placeholders.
//!
//! The wording of a prompt is supplied by the operator; this module only
//! substitutes column values. `{{` and `}}` produce literal braces.

use std::collections::HashMap;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Column(String),
}

/// A parsed prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parses template text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidConfig` for an unclosed `{`, a stray `}` or an
    /// empty placeholder.
    pub fn parse(text: &str) -> Result<Self, AppError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => {
                                return Err(AppError::InvalidConfig(
                                    "nested '{' in prompt template placeholder".into(),
                                ))
                            }
                            _ => name.push(c),
                        }
                    }
                    if !closed {
                        return Err(AppError::InvalidConfig(
                            "unclosed '{' in prompt template".into(),
                        ));
                    }
                    if name.trim().is_empty() {
                        return Err(AppError::InvalidConfig(
                            "empty placeholder in prompt template".into(),
                        ));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Column(name));
                }
                '}' => {
                    return Err(AppError::InvalidConfig(
                        "unmatched '}' in prompt template (use '}}' for a literal brace)".into(),
                    ))
                }
                _ => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Column names referenced by the template, in first-use order.
    pub fn columns(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Column(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Replaces every `{name}` placeholder with fixed text.
    pub fn fill(&self, name: &str, value: &str) -> Self {
        let segments = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Column(n) if n == name => Segment::Literal(value.to_string()),
                other => other.clone(),
            })
            .collect();
        Self { segments }
    }

    /// Binds the template to a header row, failing on unknown columns.
    pub fn bind<'a>(&'a self, headers: &[String]) -> Result<BoundTemplate<'a>, AppError> {
        let positions: HashMap<&str, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.as_str(), i))
            .collect();

        let mut indices = HashMap::new();
        for name in self.columns() {
            let index = positions.get(name).copied().ok_or_else(|| {
                AppError::InvalidConfig(format!(
                    "prompt template references unknown column '{}'",
                    name
                ))
            })?;
            indices.insert(name, index);
        }

        Ok(BoundTemplate {
            template: self,
            indices,
        })
    }
}

/// A template whose placeholders are resolved to column positions.
#[derive(Debug)]
pub struct BoundTemplate<'a> {
    template: &'a PromptTemplate,
    indices: HashMap<&'a str, usize>,
}

impl BoundTemplate<'_> {
    /// Renders the prompt for one row. Missing trailing fields render empty.
    pub fn render(&self, fields: &[String]) -> String {
        let mut out = String::new();
        for segment in &self.template.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Column(name) => {
                    let value = self
                        .indices
                        .get(name.as_str())
                        .and_then(|&i| fields.get(i))
                        .map(String::as_str)
                        .unwrap_or("");
                    out.push_str(value);
                }
            }
        }
        out
    }
}
