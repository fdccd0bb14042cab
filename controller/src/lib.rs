#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Namespace Isolation Controller
//!
//! Serves a mutating admission webhook that ensures every namespace is annotated with a
//! default-deny ingress network policy and labeled with its own name. Namespaces are watched so
//! that a local mirror of cluster state can be used to confirm each mutation before a request is
//! admitted.

pub mod admin;
pub mod isolation;
pub mod mirror;
mod serve;
pub mod webhook;

pub use self::{
    admin::Admin,
    isolation::Isolation,
    mirror::{NamespaceMirror, Store},
    webhook::Admission,
};
use ns_isolation_controller_core::Plugins;
use ns_isolation_controller_k8s_api as k8s;
use std::{fmt, sync::Arc};

/// Dependencies shared with plugin factories.
#[derive(Clone, Default)]
pub struct PluginContext {
    pub namespaces: Option<Arc<dyn NamespaceMirror>>,
}

/// Registers every plugin this controller provides.
pub fn register_plugins(
    plugins: &mut Plugins<k8s::DynamicObject, PluginContext>,
) -> anyhow::Result<()> {
    plugins.register(isolation::PLUGIN_NAME, isolation::factory)
}

// === impl PluginContext ===

impl PluginContext {
    pub fn new(namespaces: Arc<dyn NamespaceMirror>) -> Self {
        Self {
            namespaces: Some(namespaces),
        }
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("namespaces", &self.namespaces.is_some())
            .finish()
    }
}
