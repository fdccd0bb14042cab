use futures::prelude::*;
use std::pin::Pin;
use tokio::time;
use tracing::{info, warn};

pub use kube_runtime::watcher::{Event, Result};

/// Wraps an event stream that never terminates.
pub struct Watch<T> {
    events: Pin<Box<dyn Stream<Item = Result<Event<T>>> + Send + 'static>>,
    failures: u32,
}

const MAX_BACKOFF: time::Duration = time::Duration::from_secs(30);

// === impl Watch ===

impl<T, W> From<W> for Watch<T>
where
    W: Stream<Item = Result<Event<T>>> + Send + 'static,
{
    fn from(watch: W) -> Self {
        Watch {
            events: watch.boxed(),
            failures: 0,
        }
    }
}

impl<T> Watch<T> {
    /// Receive the next event in the stream.
    ///
    /// If the stream fails, log the error and back off (doubling from 1s, capped at 30s) before
    /// polling for a reset event.
    pub async fn recv(&mut self) -> Event<T> {
        loop {
            match self
                .events
                .next()
                .await
                .expect("watch stream must not terminate")
            {
                Ok(ev) => {
                    self.failures = 0;
                    return ev;
                }
                Err(error) => {
                    self.failures = self.failures.saturating_add(1);
                    let backoff = backoff(self.failures);
                    if self.failures > 1 {
                        warn!(%error, failures = self.failures, ?backoff, "Disconnected");
                    } else {
                        info!(%error, ?backoff, "Disconnected");
                    }
                    time::sleep(backoff).await;
                }
            }
        }
    }
}

fn backoff(failures: u32) -> time::Duration {
    let exp = failures.saturating_sub(1).min(5);
    time::Duration::from_secs(1 << exp).min(MAX_BACKOFF)
}
