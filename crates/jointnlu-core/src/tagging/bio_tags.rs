//! # BIO Tags for Slot Filling
//!
//! Slot tags come from the slot vocabulary as strings (`B-loc`, `I-loc`, `O`).
//! This module classifies them and groups tag sequences into entity spans.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A slot tag viewed through the BIO (Begin-Inside-Outside) scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BioTag<'a> {
    Begin(&'a str),
    Inside(&'a str),
    /// `O`, padding, or anything without a `B-`/`I-` prefix.
    Outside,
}

impl<'a> BioTag<'a> {
    pub fn parse(tag: &'a str) -> Self {
        if let Some(ty) = tag.strip_prefix("B-") {
            BioTag::Begin(ty)
        } else if let Some(ty) = tag.strip_prefix("I-") {
            BioTag::Inside(ty)
        } else {
            BioTag::Outside
        }
    }

    pub fn is_begin(&self) -> bool {
        matches!(self, BioTag::Begin(_))
    }

    pub fn is_inside(&self) -> bool {
        matches!(self, BioTag::Inside(_))
    }

    /// Get the entity type for this tag.
    pub fn entity_type(&self) -> Option<&'a str> {
        match *self {
            BioTag::Begin(ty) | BioTag::Inside(ty) => Some(ty),
            BioTag::Outside => None,
        }
    }

    /// Check if transitioning from `from` tag to `to` tag is valid.
    ///
    /// An `I-x` may only follow `B-x` or `I-x`.
    pub fn is_valid_transition(from: BioTag<'_>, to: BioTag<'_>) -> bool {
        match to {
            BioTag::Inside(ty) => from.entity_type() == Some(ty),
            _ => true,
        }
    }
}

impl fmt::Display for BioTag<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BioTag::Begin(ty) => write!(f, "B-{ty}"),
            BioTag::Inside(ty) => write!(f, "I-{ty}"),
            BioTag::Outside => write!(f, "O"),
        }
    }
}

/// An extracted entity; `start` and `end` are inclusive content-token indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Entity {
    /// Fill `text` by joining the covered tokens.
    pub fn with_text<S: AsRef<str>>(mut self, tokens: &[S]) -> Self {
        let end = (self.end + 1).min(tokens.len());
        if self.start < end {
            self.text = Some(tokens[self.start..end].iter().map(AsRef::as_ref).collect());
        }
        self
    }
}

#[derive(Debug, Default)]
struct OpenChunk<'a> {
    ty: &'a str,
    start: usize,
    end: usize,
}

impl OpenChunk<'_> {
    fn close(self) -> Entity {
        Entity {
            entity_type: self.ty.to_string(),
            start: self.start,
            end: self.end,
            text: None,
        }
    }
}

/// Group a BIO tag sequence into entity spans.
///
/// A chunk opens on `B-x` and is extended by later `I-x` tags. An `I-y` of
/// another type neither extends nor closes it; `O` (or an `I-*` with no open
/// chunk) closes it. Chunks still open at the last position are emitted.
pub fn extract_entities<S: AsRef<str>>(tags: &[S]) -> Vec<Entity> {
    let mut entities = Vec::new();
    let mut chunk: Option<OpenChunk<'_>> = None;
    let last = tags.len().saturating_sub(1);

    for (idx, tag) in tags.iter().enumerate() {
        match BioTag::parse(tag.as_ref()) {
            BioTag::Begin(ty) => {
                if let Some(open) = chunk.take() {
                    entities.push(open.close());
                }
                chunk = Some(OpenChunk {
                    ty,
                    start: idx,
                    end: idx,
                });
            }
            BioTag::Inside(ty) if chunk.is_some() => {
                if let Some(open) = chunk.as_mut() {
                    if open.ty == ty {
                        open.end = idx;
                    }
                }
            }
            _ => {
                if let Some(open) = chunk.take() {
                    entities.push(open.close());
                }
            }
        }

        if idx == last {
            if let Some(open) = chunk.take() {
                entities.push(open.close());
            }
        }
    }

    entities
}

/// Allowed-transition matrix `[from][to]` over a slot vocabulary.
pub fn transition_constraints<S: AsRef<str>>(slot_tags: &[S]) -> Vec<Vec<bool>> {
    let tags: Vec<BioTag<'_>> = slot_tags.iter().map(|t| BioTag::parse(t.as_ref())).collect();
    tags.iter()
        .map(|&from| {
            tags.iter()
                .map(|&to| BioTag::is_valid_transition(from, to))
                .collect()
        })
        .collect()
}

/// Tags a sequence may open with: everything but `I-x`.
pub fn start_constraints<S: AsRef<str>>(slot_tags: &[S]) -> Vec<bool> {
    slot_tags
        .iter()
        .map(|t| !BioTag::parse(t.as_ref()).is_inside())
        .collect()
}
