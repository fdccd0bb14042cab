//! Default-deny ingress isolation for namespaces.
//!
//! Every namespace that is created or updated is stamped with the network policy annotation that
//! isolates it from ingress traffic, and labeled with its own name so that policies can select
//! it. The mutated namespace is written through the local namespace mirror and read back before
//! the request is admitted: if the mirror does not reflect the isolation annotation, the request
//! is rejected rather than admitting a namespace that may not be isolated.

use crate::{k8s, mirror::NamespaceMirror, PluginContext};
use anyhow::{anyhow, bail, Context, Result};
use ns_isolation_controller_core::{
    AdmissionError, Attributes, GroupKind, Handler, Interface, Operation,
};
use serde::de::DeserializeOwned;
use std::{collections::BTreeMap, fmt, io, sync::Arc};
use tracing::{debug, instrument};


/// The name under which the plugin is registered.
pub const PLUGIN_NAME: &str = "NamespaceNetworkIsolation";

pub const INGRESS_ANNOTATION_KEY: &str = "net.beta.kubernetes.io/network-policy";

/// Isolates all pods in the namespace from ingress traffic unless a policy allows it.
pub const INGRESS_ANNOTATION_VALUE: &str = r#"{"ingress": {"isolation": "DefaultDeny"}}"#;

pub const NAME_LABEL_KEY: &str = "Name";

/// Admits namespaces only once they are isolated.
pub struct Isolation {
    handler: Handler,
    namespaces: Option<Arc<dyn NamespaceMirror>>,
}

/// Builds the plugin from the shared context. The plugin takes no configuration.
pub fn factory(
    ctx: &PluginContext,
    _config: Option<&mut dyn io::Read>,
) -> Result<Box<dyn Interface<k8s::DynamicObject>>> {
    Ok(Box::new(Isolation::new(ctx.namespaces.clone())))
}

// === impl Isolation ===

impl Isolation {
    pub fn new(namespaces: Option<Arc<dyn NamespaceMirror>>) -> Self {
        let mut handler = Handler::new(vec![Operation::Create, Operation::Update]);
        if let Some(namespaces) = namespaces.clone() {
            handler.set_ready_fn(move || namespaces.has_synced());
        }
        Self {
            handler,
            namespaces,
        }
    }
}

impl Interface<k8s::DynamicObject> for Isolation {
    fn handles(&self, operation: Operation) -> bool {
        self.handler.handles(operation)
    }

    fn admit(
        &self,
        attrs: &mut dyn Attributes<k8s::DynamicObject>,
    ) -> Result<(), AdmissionError> {
        if !is_namespace(attrs.kind())
            || !matches!(attrs.operation(), Operation::Create | Operation::Update)
        {
            return Ok(());
        }

        let namespaces = self
            .namespaces
            .as_deref()
            .ok_or_else(|| AdmissionError::internal(anyhow!("missing namespace mirror")))?;
        let obj = attrs.object_mut().ok_or_else(|| {
            AdmissionError::internal(anyhow!("namespace request does not include an object"))
        })?;
        isolate(namespaces, obj).map_err(AdmissionError::internal)
    }

    fn validate_initialization(&self) -> Result<()> {
        if self.namespaces.is_none() {
            bail!("missing namespace mirror");
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.handler.is_ready()
    }
}

impl fmt::Debug for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Isolation")
            .field("handler", &self.handler)
            .field("namespaces", &self.namespaces.is_some())
            .finish()
    }
}

fn is_namespace(kind: &GroupKind) -> bool {
    kind.group.is_empty() && kind.kind == "Namespace"
}

/// Mutates the namespace, commits it to the mirror, and confirms the mirror reflects it.
#[instrument(skip_all, fields(name = ?obj.metadata.name))]
fn isolate(namespaces: &dyn NamespaceMirror, obj: &mut k8s::DynamicObject) -> Result<()> {
    let name = match obj.metadata.name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => bail!("namespace must have a name"),
    };

    if add_ingress_annotation(&mut obj.metadata) {
        debug!("Added ingress isolation annotation");
    }
    if add_name_label(&mut obj.metadata, &name) {
        debug!("Added name label");
    }

    let ns = to_namespace(obj).context("failed to decode namespace")?;
    namespaces
        .update(ns)
        .with_context(|| format!("failed to cache namespace {}", name))?;

    let cached = namespaces
        .get(&name)
        .with_context(|| format!("failed to read namespace {}", name))?
        .ok_or_else(|| anyhow!("namespace {} is not cached", name))?;
    verify(&cached.metadata)
}

/// Sets the ingress isolation annotation unless it already holds the expected value.
///
/// Returns true if the annotations changed.
fn add_ingress_annotation(meta: &mut k8s::ObjectMeta) -> bool {
    let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
    let current = annotations.get(INGRESS_ANNOTATION_KEY).map(String::as_str);
    if current == Some(INGRESS_ANNOTATION_VALUE) {
        return false;
    }
    annotations.insert(
        INGRESS_ANNOTATION_KEY.to_string(),
        INGRESS_ANNOTATION_VALUE.to_string(),
    );
    true
}

/// Labels the namespace with its name unless the label is already present, whatever its value.
///
/// Returns true if the labels changed.
fn add_name_label(meta: &mut k8s::ObjectMeta, name: &str) -> bool {
    let labels = meta.labels.get_or_insert_with(BTreeMap::new);
    if labels.contains_key(NAME_LABEL_KEY) {
        return false;
    }
    labels.insert(NAME_LABEL_KEY.to_string(), name.to_string());
    true
}

fn verify(meta: &k8s::ObjectMeta) -> Result<()> {
    let annotations = meta
        .annotations
        .as_ref()
        .ok_or_else(|| anyhow!("failed to add ingress isolation annotation"))?;
    match annotations.get(INGRESS_ANNOTATION_KEY) {
        Some(v) if v == INGRESS_ANNOTATION_VALUE => Ok(()),
        _ => Err(anyhow!("failed to update ingress isolation annotation properly")),
    }
}

fn to_namespace(obj: &k8s::DynamicObject) -> Result<k8s::Namespace> {
    Ok(k8s::Namespace {
        metadata: obj.metadata.clone(),
        spec: field(obj, "spec")?,
        status: field(obj, "status")?,
    })
}

fn field<T: DeserializeOwned>(obj: &k8s::DynamicObject, name: &str) -> Result<Option<T>> {
    match obj.data.get(name) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .with_context(|| format!("invalid {}", name)),
    }
}
