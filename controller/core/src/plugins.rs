use crate::{Chain, Interface};
use anyhow::{anyhow, bail, Context, Result};
use std::{collections::BTreeMap, fmt, io};
use tracing::{debug, info};

/// Builds a plugin from the shared plugin context and the plugin's (optional) configuration.
pub type Factory<T, C> =
    Box<dyn Fn(&C, Option<&mut dyn io::Read>) -> Result<Box<dyn Interface<T>>> + Send + Sync>;

/// A registry of named plugin factories.
///
/// The registry is populated explicitly at startup; there is no process-wide registry.
pub struct Plugins<T, C> {
    factories: BTreeMap<String, Factory<T, C>>,
}

// === impl Plugins ===

impl<T, C> Plugins<T, C> {
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&C, Option<&mut dyn io::Read>) -> Result<Box<dyn Interface<T>>>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            bail!("admission plugin {} was registered twice", name);
        }
        debug!(%name, "Registered admission plugin");
        self.factories.insert(name, Box::new(factory));
        Ok(())
    }

    /// Lists registered plugin names in sorted order.
    pub fn registered(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiates the named plugins, in order, into a chain.
    ///
    /// Each factory receives its own reader over `config`. Every plugin must pass
    /// `validate_initialization` before the chain is returned.
    pub fn new_from_plugins(
        &self,
        names: &[String],
        config: Option<&[u8]>,
        ctx: &C,
    ) -> Result<Chain<T>> {
        let mut plugins = Vec::with_capacity(names.len());
        for name in names {
            let factory = self.factories.get(name).ok_or_else(|| {
                anyhow!(
                    "unknown admission plugin {}; registered plugins: {}",
                    name,
                    self.registered().collect::<Vec<_>>().join(",")
                )
            })?;

            let mut reader = config;
            let plugin = factory(ctx, reader.as_mut().map(|r| r as &mut dyn io::Read))
                .with_context(|| format!("failed to initialize admission plugin {}", name))?;
            plugin
                .validate_initialization()
                .with_context(|| format!("failed to validate admission plugin {}", name))?;

            info!(%name, "Loaded admission plugin");
            plugins.push((name.clone(), plugin));
        }
        Ok(Chain::new(plugins))
    }
}

impl<T, C> Default for Plugins<T, C> {
    fn default() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }
}

impl<T, C> fmt::Debug for Plugins<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.registered()).finish()
    }
}
