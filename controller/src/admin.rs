use crate::serve;
use anyhow::Result;
use hyper::{header, Body, Request, Response, StatusCode};
use std::{fmt, net::SocketAddr, sync::Arc};

/// Serves liveness and readiness probes.
#[derive(Clone)]
pub struct Admin {
    ready: Arc<dyn Fn() -> bool + Send + Sync>,
}

// === impl Admin ===

impl Admin {
    pub fn new(ready: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            ready: Arc::new(ready),
        }
    }

    pub async fn serve(self, addr: SocketAddr, drain: drain::Watch) -> Result<()> {
        serve::serve("admin", addr, drain, move |req| {
            let rsp = self.handle(&req);
            async move { rsp }
        })
        .await
    }

    fn handle(&self, req: &Request<Body>) -> Result<Response<Body>> {
        let (status, body) = match req.uri().path() {
            "/live" => (StatusCode::OK, "live\n"),
            "/ready" if (self.ready)() => (StatusCode::OK, "ready\n"),
            "/ready" => (StatusCode::SERVICE_UNAVAILABLE, "not ready\n"),
            _ => (StatusCode::NOT_FOUND, "not found\n"),
        };
        Ok(Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(body.into())?)
    }
}

impl fmt::Debug for Admin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admin")
            .field("ready", &(self.ready)())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn get(admin: &Admin, path: &str) -> StatusCode {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        admin.handle(&req).unwrap().status()
    }

    #[test]
    fn probes() {
        let ready = Arc::new(AtomicBool::new(false));
        let admin = {
            let ready = ready.clone();
            Admin::new(move || ready.load(Ordering::Acquire))
        };

        assert_eq!(get(&admin, "/live"), StatusCode::OK);
        assert_eq!(get(&admin, "/ready"), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(get(&admin, "/metrics"), StatusCode::NOT_FOUND);

        ready.store(true, Ordering::Release);
        assert_eq!(get(&admin, "/ready"), StatusCode::OK);
        assert_eq!(get(&admin, "/live"), StatusCode::OK);
    }
}
