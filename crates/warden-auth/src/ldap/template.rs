//! Base DN and filter templates
//!
//! Templates hold `{name}` placeholders, e.g. `(sAMAccountName={login})`.
//! Values only enter a template through [`FilterParams`], which escapes them
//! on the way in.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

use super::escape::escape_filter_bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Param(String),
}

/// A parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    /// Parse `source`, accepting only the placeholder names in `allowed`.
    /// `{{` and `}}` stand for literal braces.
    pub fn parse(source: &str, allowed: &[&str]) -> Result<Self> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

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
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(Error::configuration(format!(
                            "unterminated placeholder in template '{}'",
                            source
                        )));
                    }
                    if !allowed.contains(&name.as_str()) {
                        return Err(Error::configuration(format!(
                            "unknown placeholder '{{{}}}' in template '{}' (expected one of: {})",
                            name,
                            source,
                            allowed.join(", ")
                        )));
                    }
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(Part::Param(name));
                }
                '}' => {
                    return Err(Error::configuration(format!(
                        "unmatched '}}' in template '{}'",
                        source
                    )));
                }
                _ => literal.push(c),
            }
        }

        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    /// Substitute escaped parameter values.
    pub fn render(&self, params: &FilterParams) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Param(name) => {
                    let value = params.get(name).ok_or_else(|| {
                        Error::configuration(format!(
                            "no value for placeholder '{{{}}}' in template '{}'",
                            name, self.source
                        ))
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            Part::Param(name) => Some(name.as_str()),
            Part::Literal(_) => None,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Escaped values for template placeholders
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterParams {
    values: HashMap<&'static str, String>,
}

impl FilterParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a placeholder value. The value is escaped for filter syntax;
    /// there is no way to store an unescaped value.
    pub fn with(mut self, name: &'static str, value: impl AsRef<[u8]>) -> Self {
        self.values.insert(name, escape_filter_bytes(value.as_ref()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|s| s.as_str())
    }
}
