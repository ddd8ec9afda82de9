//! Execution contexts and the origin stack
//!
//! The scenario always acts on exactly one document: the one belonging to the
//! context on top of the stack. The root context is the application under
//! test; entering an origin block pushes a context for the foreign document,
//! either the enclosing document after it navigated to the foreign origin or
//! an embedded frame of the enclosing document.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::error::{E2eError, E2eResult};

/// Scheme, host and port of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    pub fn of(url: &Url) -> E2eResult<Self> {
        let origin = url.origin();
        if !origin.is_tuple() {
            return Err(E2eError::Config(format!("URL {url} has no tuple origin")));
        }
        Ok(Origin(origin.ascii_serialization()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The root URL of this origin, used to resolve paths.
    pub fn to_url(&self) -> E2eResult<Url> {
        Ok(Url::parse(&self.0)?)
    }

    pub fn matches(&self, url: &Url) -> bool {
        url.origin().ascii_serialization() == self.0
    }
}

impl FromStr for Origin {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s)
            .map_err(|e| E2eError::SpecParse(format!("invalid origin '{s}': {e}")))?;
        Origin::of(&url)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Origin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Origin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// How a context's document is reached from the one below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Root,
    /// The enclosing context's own document navigated to the origin, e.g. a
    /// redirect to a hosted checkout page.
    Navigated,
    /// An embedded frame of the enclosing document, by frame index.
    Frame { index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub id: u64,
    pub origin: Origin,
    pub kind: ContextKind,
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ContextKind::Root => write!(f, "root context {}", self.origin),
            ContextKind::Navigated => write!(f, "navigated context {}", self.origin),
            ContextKind::Frame { index } => write!(f, "frame #{index} context {}", self.origin),
        }
    }
}

/// Stack of active contexts. Never empty: the root cannot be popped.
#[derive(Debug)]
pub struct ContextStack {
    contexts: Vec<ExecutionContext>,
    next_id: u64,
}

impl ContextStack {
    pub fn new(root: Origin) -> Self {
        Self {
            contexts: vec![ExecutionContext {
                id: 0,
                origin: root,
                kind: ContextKind::Root,
            }],
            next_id: 1,
        }
    }

    pub fn active(&self) -> &ExecutionContext {
        // the root is never popped
        &self.contexts[self.contexts.len() - 1]
    }

    pub fn root(&self) -> &ExecutionContext {
        &self.contexts[0]
    }

    pub fn depth(&self) -> usize {
        self.contexts.len() - 1
    }

    pub fn push(&mut self, origin: Origin, kind: ContextKind) -> &ExecutionContext {
        let id = self.next_id;
        self.next_id += 1;
        self.contexts.push(ExecutionContext { id, origin, kind });
        self.active()
    }

    /// Pop the context with `id`, which must be on top.
    pub fn pop(&mut self, id: u64) -> E2eResult<ExecutionContext> {
        let top = self.active();
        if top.kind == ContextKind::Root {
            return Err(E2eError::ContextOrder {
                expected: "an open origin scope".into(),
                got: format!("context {id}"),
            });
        }
        if top.id != id {
            let expected = top.to_string();
            let got = self
                .contexts
                .iter()
                .find(|c| c.id == id)
                .map(ToString::to_string)
                .unwrap_or_else(|| format!("closed context {id}"));
            return Err(E2eError::ContextOrder { expected, got });
        }
        self.contexts
            .pop()
            .ok_or_else(|| E2eError::InvalidContext("context stack is empty".into()))
    }

    /// Frame indexes to replay from the top-level document down to the
    /// active context. A `Navigated` context reuses its parent's document
    /// slot, so it adds nothing to the path.
    pub fn frame_path(&self) -> Vec<usize> {
        self.contexts
            .iter()
            .filter_map(|ctx| match ctx.kind {
                ContextKind::Frame { index } => Some(index),
                ContextKind::Root | ContextKind::Navigated => None,
            })
            .collect()
    }
}
