use crate::Operation;
use std::{collections::HashSet, fmt, sync::Arc};

type ReadyFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Tracks the operations a plugin handles and whether it is ready for traffic.
///
/// Plugins embed a `Handler` and delegate `handles` and `is_ready` to it.
#[derive(Clone)]
pub struct Handler {
    operations: HashSet<Operation>,
    ready: Option<ReadyFn>,
}

// === impl Handler ===

impl Handler {
    pub fn new(operations: impl IntoIterator<Item = Operation>) -> Self {
        Self {
            operations: operations.into_iter().collect(),
            ready: None,
        }
    }

    pub fn handles(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }

    /// Gates readiness on the given function. Without one, the handler is always ready.
    pub fn set_ready_fn(&mut self, ready: impl Fn() -> bool + Send + Sync + 'static) {
        self.ready = Some(Arc::new(ready));
    }

    pub fn is_ready(&self) -> bool {
        self.ready.as_ref().map(|ready| ready()).unwrap_or(true)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("operations", &self.operations)
            .field("ready", &self.is_ready())
            .finish()
    }
}
