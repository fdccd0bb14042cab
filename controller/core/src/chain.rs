use crate::{AdmissionError, Attributes, Interface, Operation};
use std::fmt;
use tracing::{debug, info};

/// An ordered list of instantiated plugins, itself admitting as a single plugin.
pub struct Chain<T> {
    plugins: Vec<(String, Box<dyn Interface<T>>)>,
}

// === impl Chain ===

impl<T> Chain<T> {
    pub fn new(plugins: Vec<(String, Box<dyn Interface<T>>)>) -> Self {
        Self { plugins }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(|(name, _)| name.as_str())
    }
}

impl<T> Interface<T> for Chain<T> {
    fn handles(&self, operation: Operation) -> bool {
        self.plugins.iter().any(|(_, p)| p.handles(operation))
    }

    /// Admits through each plugin that handles the operation, stopping at the first rejection.
    fn admit(&self, attrs: &mut dyn Attributes<T>) -> Result<(), AdmissionError> {
        let operation = attrs.operation();
        for (name, plugin) in self.plugins.iter() {
            if !plugin.handles(operation) {
                continue;
            }
            debug!(plugin = %name, kind = %attrs.kind(), %operation, "Admitting");
            if let Err(error) = plugin.admit(attrs) {
                info!(
                    plugin = %name,
                    kind = %attrs.kind(),
                    name = %attrs.name(),
                    %error,
                    "Rejected",
                );
                return Err(error);
            }
        }
        Ok(())
    }

    fn validate_initialization(&self) -> anyhow::Result<()> {
        for (name, plugin) in self.plugins.iter() {
            plugin
                .validate_initialization()
                .map_err(|error| error.context(format!("plugin {} is not initialized", name)))?;
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.plugins.iter().all(|(_, p)| p.is_ready())
    }
}

impl<T> fmt::Debug for Chain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
