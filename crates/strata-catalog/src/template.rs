//! Bootstrap templates
//!
//! A template is a sequence of literal text and typed placeholders.
//! Source syntax is `${resource.attribute}`; `$${` writes a literal `${`.
//!
//! Resolution is split in two steps so the scheduler can feed values in as
//! dependencies are realized:
//! - [`Template::substitute`] replaces every placeholder whose value is known
//!   with a literal segment and leaves the rest untouched
//! - [`Template::finalize`] turns a fully-resolved template into the payload
//!   string, reporting any placeholder that is still open
//!
//! Both are pure, so rendering a resolved template again yields the same bytes.

use crate::error::TemplateError;
use crate::id::AttributeRef;
use std::collections::HashMap;
use std::fmt;

/// Source of resolved attribute values
pub trait AttributeLookup {
    /// Resolved value for `reference`, if realized
    fn lookup(&self, reference: &AttributeRef) -> Option<&str>;
}

impl AttributeLookup for HashMap<AttributeRef, String> {
    fn lookup(&self, reference: &AttributeRef) -> Option<&str> {
        self.get(reference).map(String::as_str)
    }
}

/// One piece of a template
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Text copied to the payload as-is
    Literal(String),
    /// Value of another resource's attribute
    Placeholder(AttributeRef),
}

/// Parsed bootstrap template
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse template source text
    ///
    /// # Errors
    /// `TemplateError` for an unterminated `${` or a malformed reference.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut template = Self::default();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(pos) = rest.find('$') {
            literal.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if let Some(after) = tail.strip_prefix("$${") {
                literal.push_str("${");
                rest = after;
            } else if let Some(after) = tail.strip_prefix("${") {
                let end = after.find('}').ok_or_else(|| {
                    TemplateError::new(tail.lines().next().unwrap_or(tail), "unterminated placeholder")
                })?;
                let reference = AttributeRef::parse(&after[..end])?;
                template.push_literal(std::mem::take(&mut literal));
                template.segments.push(Segment::Placeholder(reference));
                rest = &after[end + 1..];
            } else {
                literal.push('$');
                rest = &tail[1..];
            }
        }

        literal.push_str(rest);
        template.push_literal(literal);
        Ok(template)
    }

    /// Segments in order
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Every placeholder, in order of appearance (duplicates included)
    pub fn placeholders(&self) -> impl Iterator<Item = &AttributeRef> + '_ {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(r) => Some(r),
            Segment::Literal(_) => None,
        })
    }

    /// True when no placeholder is left
    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.placeholders().next().is_none()
    }

    /// Replace every resolvable placeholder with its literal value
    #[must_use]
    pub fn substitute(&self, values: &impl AttributeLookup) -> Self {
        let mut out = Self::default();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_literal(text.clone()),
                Segment::Placeholder(r) => match values.lookup(r) {
                    Some(value) => out.push_literal(value.to_string()),
                    None => out.segments.push(Segment::Placeholder(r.clone())),
                },
            }
        }
        out
    }

    /// Produce the payload of a fully-resolved template
    ///
    /// # Errors
    /// The first placeholder that is still open.
    pub fn finalize(&self) -> Result<String, AttributeRef> {
        if let Some(open) = self.placeholders().next() {
            return Err(open.clone());
        }
        Ok(self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.as_str(),
                Segment::Placeholder(_) => "",
            })
            .collect())
    }

    fn push_literal(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        if let Some(Segment::Literal(last)) = self.segments.last_mut() {
            last.push_str(&text);
        } else {
            self.segments.push(Segment::Literal(text));
        }
    }
}

impl fmt::Display for Template {
    /// Writes template source, escaping literal `${`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => f.write_str(&text.replace("${", "$${"))?,
                Segment::Placeholder(r) => write!(f, "${{{r}}}")?,
            }
        }
        Ok(())
    }
}
