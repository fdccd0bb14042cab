use anyhow::Result;
use futures::prelude::*;
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response,
};
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Serves HTTP/1 requests on `addr` until the drain is signaled, then finishes in-flight requests.
pub(crate) async fn serve<F, Fut>(
    name: &'static str,
    addr: SocketAddr,
    drain: drain::Watch,
    handle: F,
) -> Result<()>
where
    F: Fn(Request<Body>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<Body>>> + Send + 'static,
{
    let server = hyper::Server::try_bind(&addr)?.serve(make_service_fn(move |_| {
        let handle = handle.clone();
        future::ok::<_, hyper::Error>(service_fn(handle))
    }));
    info!(server = %name, addr = %server.local_addr(), "Listening");

    let (close_tx, close_rx) = oneshot::channel::<()>();
    tokio::pin! {
        let srv = server.with_graceful_shutdown(async move {
            let _ = close_rx.await;
        });
    }

    tokio::select! {
        res = (&mut srv) => res?,
        handle = drain.signaled() => {
            debug!(server = %name, "Draining");
            let _ = close_tx.send(());
            handle.release_after(srv).await?;
        }
    }
    Ok(())
}
