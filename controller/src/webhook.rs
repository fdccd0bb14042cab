//! Hosts the admission chain behind a mutating admission webhook.

use crate::k8s::admission::{self, AdmissionRequest, AdmissionResponse, AdmissionReview};
use crate::{k8s, serve};
use anyhow::{Context, Result};
use hyper::{header, Body, Method, Request, Response, StatusCode};
use ns_isolation_controller_core::{
    AdmissionError, AttributesRecord, Chain, GroupKind, Interface, Operation,
};
use std::{convert::TryInto, net::SocketAddr, sync::Arc};
use tracing::{debug, info, instrument, warn};

/// Admits `AdmissionReview`s through a chain of plugins.
#[derive(Clone, Debug)]
pub struct Admission {
    chain: Arc<Chain<k8s::DynamicObject>>,
}

// === impl Admission ===

impl Admission {
    pub fn new(chain: Chain<k8s::DynamicObject>) -> Self {
        Self {
            chain: Arc::new(chain),
        }
    }

    /// Indicates whether every plugin in the chain is ready to admit requests.
    pub fn is_ready(&self) -> bool {
        self.chain.is_ready()
    }

    pub async fn serve(self, addr: SocketAddr, drain: drain::Watch) -> Result<()> {
        serve::serve("webhook", addr, drain, move |req| {
            let admission = self.clone();
            async move { admission.handle(req).await }
        })
        .await
    }

    /// Answers a review, allowing (and possibly patching) or denying its request.
    pub fn review(
        &self,
        review: AdmissionReview<k8s::DynamicObject>,
    ) -> AdmissionReview<k8s::DynamicObject> {
        let req: AdmissionRequest<k8s::DynamicObject> = match review.try_into() {
            Ok(req) => req,
            Err(error) => {
                warn!(%error, "Invalid admission review");
                return AdmissionResponse::invalid(error.to_string()).into_review();
            }
        };
        self.admit(&req).into_review()
    }

    #[instrument(
        skip(self, req),
        fields(uid = %req.uid, kind = %req.kind.kind, name = %req.name)
    )]
    fn admit(&self, req: &AdmissionRequest<k8s::DynamicObject>) -> AdmissionResponse {
        let mut attrs = attributes(req);
        if let Err(error) = self.chain.admit(&mut attrs) {
            info!(%error, "Denied");
            return deny(req, error);
        }

        let patch = match patch(req.object.as_ref(), attrs.object.as_ref()) {
            Ok(Some(patch)) => patch,
            Ok(None) => {
                debug!("Allowed");
                return AdmissionResponse::from(req);
            }
            Err(error) => {
                warn!(%error, "Failed to compute patch");
                return deny(req, AdmissionError::internal(error));
            }
        };

        debug!(?patch, "Patched");
        match AdmissionResponse::from(req).with_patch(patch) {
            Ok(rsp) => rsp,
            Err(error) => {
                warn!(%error, "Failed to encode patch");
                deny(req, AdmissionError::internal(error))
            }
        }
    }

    async fn handle(&self, req: Request<Body>) -> Result<Response<Body>> {
        if req.method() != Method::POST {
            return text(StatusCode::METHOD_NOT_ALLOWED, "admission reviews must be POSTed\n");
        }
        if !self.is_ready() {
            return text(
                StatusCode::SERVICE_UNAVAILABLE,
                "admission plugins are not ready\n",
            );
        }

        let body = hyper::body::to_bytes(req.into_body())
            .await
            .context("failed to read admission review")?;
        let review = match serde_json::from_slice::<AdmissionReview<k8s::DynamicObject>>(&body) {
            Ok(review) => review,
            Err(error) => {
                warn!(%error, "Failed to decode admission review");
                return text(
                    StatusCode::BAD_REQUEST,
                    format!("invalid admission review: {}\n", error),
                );
            }
        };

        let bytes = serde_json::to_vec(&self.review(review))
            .context("failed to encode admission review")?;
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(bytes.into())?)
    }
}

fn attributes(
    req: &AdmissionRequest<k8s::DynamicObject>,
) -> AttributesRecord<k8s::DynamicObject> {
    let operation = match req.operation {
        admission::Operation::Create => Operation::Create,
        admission::Operation::Update => Operation::Update,
        admission::Operation::Delete => Operation::Delete,
        admission::Operation::Connect => Operation::Connect,
    };
    let kind = GroupKind::new(req.kind.group.clone(), req.kind.kind.clone());
    let attrs =
        AttributesRecord::new(kind, operation, req.object.clone()).with_name(req.name.clone());
    match req.namespace.as_ref() {
        Some(ns) => attrs.with_namespace(ns.clone()),
        None => attrs,
    }
}

/// Denies the request, reporting the error's status code to the API client.
fn deny(req: &AdmissionRequest<k8s::DynamicObject>, error: AdmissionError) -> AdmissionResponse {
    let mut rsp = AdmissionResponse::from(req).deny(&error);
    rsp.result.code = Some(error.code().into());
    rsp.result.reason = Some("InternalError".into());
    rsp
}

/// Computes the patch from the submitted object to the admitted one, if they differ.
fn patch(
    submitted: Option<&k8s::DynamicObject>,
    admitted: Option<&k8s::DynamicObject>,
) -> Result<Option<json_patch::Patch>> {
    let (submitted, admitted) = match (submitted, admitted) {
        (Some(s), Some(a)) => (s, a),
        _ => return Ok(None),
    };
    let submitted = serde_json::to_value(submitted).context("failed to encode submitted object")?;
    let admitted = serde_json::to_value(admitted).context("failed to encode admitted object")?;
    let patch = json_patch::diff(&submitted, &admitted);
    if patch.0.is_empty() {
        return Ok(None);
    }
    Ok(Some(patch))
}

fn text(status: StatusCode, msg: impl Into<Body>) -> Result<Response<Body>> {
    Ok(Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(msg.into())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{isolation, mirror, PluginContext};
    use ns_isolation_controller_core::Plugins;
    use serde_json::json;

    fn mk_admission() -> (mirror::Writer, Admission) {
        let (writer, store) = mirror::pair();
        let mut plugins = Plugins::default();
        crate::register_plugins(&mut plugins).unwrap();
        let chain = plugins
            .new_from_plugins(
                &[isolation::PLUGIN_NAME.to_string()],
                None,
                &PluginContext::new(Arc::new(store)),
            )
            .unwrap();
        (writer, Admission::new(chain))
    }

    fn mk_review(operation: &str, kind: &str, object: serde_json::Value) -> serde_json::Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": { "group": "", "version": "v1", "kind": kind },
                "resource": { "group": "", "version": "v1", "resource": "namespaces" },
                "requestKind": { "group": "", "version": "v1", "kind": kind },
                "requestResource": { "group": "", "version": "v1", "resource": "namespaces" },
                "name": "team-a",
                "operation": operation,
                "userInfo": { "username": "admin", "groups": ["system:masters"] },
                "object": object,
                "oldObject": null,
                "dryRun": false,
                "options": null,
            }
        })
    }

    fn mk_namespace(labels: serde_json::Value) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": "team-a", "labels": labels },
            "spec": { "finalizers": ["kubernetes"] },
        })
    }

    fn review(admission: &Admission, review: serde_json::Value) -> serde_json::Value {
        let review = serde_json::from_value(review).unwrap();
        serde_json::to_value(admission.review(review)).unwrap()
    }

    #[test]
    fn patches_new_namespace() {
        let (_writer, admission) = mk_admission();
        let object = mk_namespace(json!({ "env": "prod" }));
        let rsp = review(&admission, mk_review("CREATE", "Namespace", object));

        let rsp = &rsp["response"];
        assert_eq!(rsp["uid"], "705ab4f5-6393-11e8-b7cc-42010a800002");
        assert_eq!(rsp["allowed"], true);
        assert_eq!(rsp["patchType"], "JSONPatch");
        assert!(!rsp["patch"].is_null());
    }

    #[test]
    fn patch_isolates_submitted_object() {
        let submitted: k8s::DynamicObject =
            serde_json::from_value(mk_namespace(json!({ "env": "prod" }))).unwrap();
        let mut admitted = submitted.clone();
        admitted
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert("Name".to_string(), "team-a".to_string());

        let p = patch(Some(&submitted), Some(&admitted)).unwrap().unwrap();
        let mut doc = serde_json::to_value(&submitted).unwrap();
        json_patch::patch(&mut doc, &p).unwrap();
        assert_eq!(doc, serde_json::to_value(&admitted).unwrap());

        assert!(patch(Some(&submitted), Some(&submitted)).unwrap().is_none());
        assert!(patch(None, None).unwrap().is_none());
    }

    #[test]
    fn compliant_namespace_is_not_patched() {
        let (_writer, admission) = mk_admission();
        let mut object = mk_namespace(json!({ "Name": "team-a" }));
        object["metadata"]["annotations"] = json!({});
        object["metadata"]["annotations"][isolation::INGRESS_ANNOTATION_KEY] =
            json!(isolation::INGRESS_ANNOTATION_VALUE);
        let rsp = review(&admission, mk_review("UPDATE", "Namespace", object));
        assert_eq!(rsp["response"]["allowed"], true);
        assert!(rsp["response"]["patch"].is_null());
    }

    #[test]
    fn other_kinds_pass_through() {
        let (_writer, admission) = mk_admission();
        let object = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "team-a", "namespace": "default" },
        });
        let rsp = review(&admission, mk_review("CREATE", "ConfigMap", object));
        assert_eq!(rsp["response"]["allowed"], true);
        assert!(rsp["response"]["patch"].is_null());
    }

    #[test]
    fn unnamed_namespace_is_denied() {
        let (_writer, admission) = mk_admission();
        let object = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "generateName": "team-" },
        });
        let rsp = review(&admission, mk_review("CREATE", "Namespace", object));
        assert_eq!(rsp["response"]["allowed"], false);
        assert_eq!(
            rsp["response"]["status"]["message"],
            "Internal error occurred: namespace must have a name"
        );
        assert_eq!(rsp["response"]["status"]["code"], 500);
        assert_eq!(rsp["response"]["status"]["reason"], "InternalError");
    }

    #[test]
    fn review_without_request_is_invalid() {
        let (_writer, admission) = mk_admission();
        let rsp = review(
            &admission,
            json!({ "apiVersion": "admission.k8s.io/v1", "kind": "AdmissionReview" }),
        );
        assert_eq!(rsp["response"]["allowed"], false);
    }

    #[tokio::test]
    async fn http_gates_on_readiness() {
        let (mut writer, admission) = mk_admission();
        let body = mk_review("CREATE", "Namespace", mk_namespace(json!(null)));
        let mk_req = || {
            Request::builder()
                .method(Method::POST)
                .uri("/mutate")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        let rsp = admission.handle(mk_req()).await.unwrap();
        assert_eq!(rsp.status(), StatusCode::SERVICE_UNAVAILABLE);

        writer.reset(vec![]).unwrap();
        assert!(admission.is_ready());
        let rsp = admission.handle(mk_req()).await.unwrap();
        assert_eq!(rsp.status(), StatusCode::OK);
        let bytes = hyper::body::to_bytes(rsp.into_body()).await.unwrap();
        let review: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(review["response"]["allowed"], true);
    }

    #[tokio::test]
    async fn http_rejects_bad_requests() {
        let (mut writer, admission) = mk_admission();
        writer.reset(vec![]).unwrap();

        let get = Request::builder()
            .method(Method::GET)
            .uri("/mutate")
            .body(Body::empty())
            .unwrap();
        let rsp = admission.handle(get).await.unwrap();
        assert_eq!(rsp.status(), StatusCode::METHOD_NOT_ALLOWED);

        let garbage = Request::builder()
            .method(Method::POST)
            .uri("/mutate")
            .body(Body::from("{not json"))
            .unwrap();
        let rsp = admission.handle(garbage).await.unwrap();
        assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);
    }
}
