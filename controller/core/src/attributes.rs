use crate::{GroupKind, Operation};

/// Describes a single admission request.
///
/// Everything but the object is read-only; plugins mutate the object in place.
pub trait Attributes<T> {
    fn kind(&self) -> &GroupKind;

    fn operation(&self) -> Operation;

    /// The name of the target object. May be empty when the name is not yet known.
    fn name(&self) -> &str;

    /// The namespace of the target object, if it is namespaced.
    fn namespace(&self) -> Option<&str>;

    fn object(&self) -> Option<&T>;

    fn object_mut(&mut self) -> Option<&mut T>;
}

/// An owned set of request attributes.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributesRecord<T> {
    pub kind: GroupKind,
    pub operation: Operation,
    pub name: String,
    pub namespace: Option<String>,
    pub object: Option<T>,
}

// === impl AttributesRecord ===

impl<T> AttributesRecord<T> {
    pub fn new(kind: GroupKind, operation: Operation, object: Option<T>) -> Self {
        Self {
            kind,
            operation,
            name: String::new(),
            namespace: None,
            object,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn into_object(self) -> Option<T> {
        self.object
    }
}

impl<T> Attributes<T> for AttributesRecord<T> {
    fn kind(&self) -> &GroupKind {
        &self.kind
    }

    fn operation(&self) -> Operation {
        self.operation
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn object(&self) -> Option<&T> {
        self.object.as_ref()
    }

    fn object_mut(&mut self) -> Option<&mut T> {
        self.object.as_mut()
    }
}
