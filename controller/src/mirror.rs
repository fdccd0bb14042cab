//! The local namespace mirror.
//!
//! A watch on all namespaces keeps an in-memory copy of every namespace up to date. Admission
//! plugins read and write the copy through [`NamespaceMirror`]; the indexing task owns the
//! [`Writer`] and replaces entries as the cluster reports changes.

use crate::k8s::{self, NsName};
use anyhow::{anyhow, Context, Error, Result};
use dashmap::DashMap;
use std::{collections::HashSet, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// A cached, continuously-synchronized view of namespaces.
pub trait NamespaceMirror: Send + Sync {
    /// Reads the cached namespace with the given name.
    fn get(&self, name: &str) -> Result<Option<k8s::Namespace>>;

    /// Writes a namespace into the cache, replacing any existing entry with the same name.
    fn update(&self, ns: k8s::Namespace) -> Result<()>;

    /// Indicates whether the cache has completed its initial load.
    fn has_synced(&self) -> bool;
}

type ByName = Arc<DashMap<NsName, k8s::Namespace>>;

/// A handle to the mirror, shared with admission plugins.
#[derive(Clone, Debug)]
pub struct Store {
    namespaces: ByName,
    synced: watch::Receiver<bool>,
}

/// Updates the mirror from the namespace watch.
#[derive(Debug)]
pub struct Writer {
    namespaces: ByName,
    synced: watch::Sender<bool>,
}

pub fn pair() -> (Writer, Store) {
    let namespaces = ByName::default();
    let (tx, rx) = watch::channel(false);
    let w = Writer {
        namespaces: namespaces.clone(),
        synced: tx,
    };
    let s = Store {
        namespaces,
        synced: rx,
    };
    (w, s)
}

/// Drives the namespace watch, updating the mirror with each event.
///
/// The mirror is marked synced once the watch delivers its first full listing.
pub async fn index(mut namespaces: k8s::Watch<k8s::Namespace>, mut writer: Writer) -> Error {
    loop {
        let res = match namespaces.recv().await {
            k8s::Event::Applied(ns) => writer.apply(ns).context("applying a namespace"),
            k8s::Event::Deleted(ns) => writer.delete(ns).context("deleting a namespace"),
            k8s::Event::Restarted(nss) => writer.reset(nss).context("resetting namespaces"),
        };
        if let Err(error) = res {
            warn!(?error);
        }
    }
}

// === impl Store ===

impl Store {
    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    /// Waits for the initial sync to complete.
    pub async fn synced(&mut self) -> Result<()> {
        while !*self.synced.borrow() {
            self.synced
                .changed()
                .await
                .map_err(|_| anyhow!("namespace index terminated before syncing"))?;
        }
        Ok(())
    }
}

impl NamespaceMirror for Store {
    fn get(&self, name: &str) -> Result<Option<k8s::Namespace>> {
        Ok(self.namespaces.get(name).map(|ns| ns.value().clone()))
    }

    fn update(&self, ns: k8s::Namespace) -> Result<()> {
        let name = NsName::from_ns(&ns).ok_or_else(|| anyhow!("namespace must have a name"))?;
        trace!(%name, "Updating cached namespace");
        self.namespaces.insert(name, ns);
        Ok(())
    }

    fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }
}

// === impl Writer ===

impl Writer {
    pub(crate) fn apply(&mut self, ns: k8s::Namespace) -> Result<()> {
        let name = NsName::from_ns(&ns).ok_or_else(|| anyhow!("namespace must have a name"))?;
        debug!(%name, "Applied");
        self.namespaces.insert(name, ns);
        Ok(())
    }

    pub(crate) fn delete(&mut self, ns: k8s::Namespace) -> Result<()> {
        let name = NsName::from_ns(&ns).ok_or_else(|| anyhow!("namespace must have a name"))?;
        if self.namespaces.remove(&name).is_some() {
            debug!(%name, "Deleted");
            Ok(())
        } else {
            Err(anyhow!("namespace {} already deleted", name))
        }
    }

    /// Replaces the mirror's contents with a complete listing and marks it synced.
    pub(crate) fn reset(&mut self, nss: Vec<k8s::Namespace>) -> Result<()> {
        let mut prior = self
            .namespaces
            .iter()
            .map(|e| e.key().clone())
            .collect::<HashSet<_>>();

        let mut result = Ok(());
        for ns in nss.into_iter() {
            match NsName::from_ns(&ns) {
                Some(name) => {
                    prior.remove(&name);
                    self.namespaces.insert(name, ns);
                }
                None => result = Err(anyhow!("namespace must have a name")),
            }
        }

        for name in prior.into_iter() {
            debug!(%name, "Removing defunct namespace");
            self.namespaces.remove(&name);
        }

        if !*self.synced.borrow() {
            info!(namespaces = self.namespaces.len(), "Synced");
        }
        // Receivers may all be gone during shutdown; the flag only matters while they exist.
        let _ = self.synced.send(true);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::ObjectMeta;
    use futures::{prelude::*, stream};

    fn mk_ns(
        name: &str,
        labels: impl IntoIterator<Item = (&'static str, &'static str)>,
    ) -> k8s::Namespace {
        k8s::Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn reset_replaces_contents_and_syncs() {
        let (mut writer, store) = pair();
        assert!(!store.has_synced());

        writer.apply(mk_ns("stale", None)).unwrap();
        writer.apply(mk_ns("kept", None)).unwrap();
        writer
            .reset(vec![mk_ns("kept", Some(("app", "v2"))), mk_ns("new", None)])
            .unwrap();

        assert!(store.has_synced());
        assert_eq!(store.len(), 2);
        assert!(store.get("stale").unwrap().is_none());
        assert!(store.get("new").unwrap().is_some());
        let kept = store.get("kept").unwrap().unwrap();
        assert_eq!(
            kept.metadata.labels.unwrap().get("app").map(String::as_str),
            Some("v2")
        );
    }

    #[test]
    fn delete_missing_namespace_fails() {
        let (mut writer, store) = pair();
        writer.apply(mk_ns("ns-0", None)).unwrap();
        writer.delete(mk_ns("ns-0", None)).unwrap();
        assert!(store.is_empty());
        assert!(writer.delete(mk_ns("ns-0", None)).is_err());
    }

    #[test]
    fn update_overwrites_cached_entry() {
        let (mut writer, store) = pair();
        writer.apply(mk_ns("ns-0", Some(("a", "1")))).unwrap();

        store.update(mk_ns("ns-0", Some(("a", "2")))).unwrap();
        let ns = store.get("ns-0").unwrap().unwrap();
        assert_eq!(
            ns.metadata.labels.unwrap().get("a").map(String::as_str),
            Some("2")
        );

        let unnamed = k8s::Namespace::default();
        assert!(store.update(unnamed).is_err());
    }

    #[tokio::test]
    async fn index_syncs_from_watch() {
        let (writer, mut store) = pair();
        let events: Vec<k8s::watch::Result<k8s::Event<k8s::Namespace>>> = vec![
            Ok(k8s::Event::Restarted(vec![mk_ns("ns-0", None)])),
            Ok(k8s::Event::Applied(mk_ns("ns-1", None))),
        ];
        let watch = stream::iter(events).chain(stream::pending());
        let task = tokio::spawn(index(watch.into(), writer));

        store.synced().await.unwrap();
        assert!(store.has_synced());
        assert!(store.get("ns-0").unwrap().is_some());

        // The applied event follows the listing; yield until the index has caught up.
        while store.get("ns-1").unwrap().is_none() {
            tokio::task::yield_now().await;
        }

        task.abort();
    }
}
