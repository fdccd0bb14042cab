#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod watch;

pub use self::watch::{Event, Watch};
pub use k8s_openapi::{
    api::core::v1::Namespace,
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
pub use kube::{
    api::{DynamicObject, TypeMeta},
    core::admission,
};
use kube::api::{Api, ListParams};
use kube_runtime::watcher;
use std::{fmt, sync::Arc};

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NsName(Arc<str>);

/// Resource watches.
pub struct ResourceWatches {
    pub namespaces: Watch<Namespace>,
}

// === impl ResourceWatches ===

impl From<kube::Client> for ResourceWatches {
    fn from(client: kube::Client) -> Self {
        Self {
            namespaces: watcher(Api::all(client), ListParams::default()).into(),
        }
    }
}

// === impl NsName ===

impl NsName {
    /// Returns the name of a namespace object, if it has one.
    pub fn from_ns(ns: &Namespace) -> Option<Self> {
        Self::from_meta(&ns.metadata)
    }

    pub fn from_meta(meta: &ObjectMeta) -> Option<Self> {
        match meta.name.as_deref() {
            None | Some("") => None,
            Some(name) => Some(Self(name.into())),
        }
    }
}

impl AsRef<str> for NsName {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl std::borrow::Borrow<str> for NsName {
    fn borrow(&self) -> &str {
        self.0.as_ref()
    }
}

impl fmt::Display for NsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
