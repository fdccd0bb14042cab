#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Admission framework primitives.
//!
//! Models the request attributes, the plugin interface, and the named plugin registry that an
//! admission host drives. Nothing here knows about a particular object model: plugins are generic
//! over the object type `T` they admit.

mod attributes;
mod chain;
mod error;
mod handler;
mod plugins;

pub use self::{
    attributes::{Attributes, AttributesRecord},
    chain::Chain,
    error::AdmissionError,
    handler::Handler,
    plugins::{Factory, Plugins},
};
use std::fmt;

/// The operation a request performs on its target object.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

/// Identifies a resource type independently of its version.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

/// An admission plugin.
///
/// Plugins hold no per-request state: `admit` may be called concurrently for unrelated requests.
pub trait Interface<T>: Send + Sync {
    /// Indicates whether the plugin wants to see requests for the given operation.
    fn handles(&self, operation: Operation) -> bool;

    /// Admits a request, possibly mutating its object in place.
    fn admit(&self, attrs: &mut dyn Attributes<T>) -> Result<(), AdmissionError>;

    /// Checks that the plugin received everything it needs to run.
    fn validate_initialization(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Indicates whether the plugin may be sent requests.
    fn is_ready(&self) -> bool {
        true
    }
}

// === impl Operation ===

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => "CREATE".fmt(f),
            Self::Update => "UPDATE".fmt(f),
            Self::Delete => "DELETE".fmt(f),
            Self::Connect => "CONNECT".fmt(f),
        }
    }
}

// === impl GroupKind ===

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }

    /// A kind in the core (unnamed) API group.
    pub fn core(kind: impl Into<String>) -> Self {
        Self::new("", kind)
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            self.kind.fmt(f)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}
