use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, error, info, Span};

use super::patch::build_patch;
use super::policy::{self, MutationDecision};
use super::{INJECTED_STATUS, STATUS_ANNOTATION_KEY};
use crate::admission::errors::Result;
use crate::admission::{
    AdmissionCodec, AdmissionRequest, AdmissionResponse, AdmissionReviewResponse,
};
use crate::config::SidecarConfig;

/// Turns admission reviews into admission responses.
///
/// Holds only read-only data, a single instance is shared by all the
/// requests being served.
#[derive(Debug, Clone)]
pub struct Mutator {
    sidecar_config: SidecarConfig,
    ignored_namespaces: BTreeSet<String>,
    status_annotations: BTreeMap<String, String>,
}

impl Mutator {
    pub fn new(sidecar_config: SidecarConfig, ignored_namespaces: BTreeSet<String>) -> Self {
        Mutator {
            sidecar_config,
            ignored_namespaces,
            status_annotations: BTreeMap::from([(
                STATUS_ANNOTATION_KEY.to_owned(),
                INJECTED_STATUS.to_owned(),
            )]),
        }
    }

    pub fn sidecar_config(&self) -> &SidecarConfig {
        &self.sidecar_config
    }

    /// Handle a raw AdmissionReview, as received from the API server
    pub fn review(&self, codec: &AdmissionCodec, body: &[u8]) -> AdmissionReviewResponse {
        let review = match codec.decode_review(body) {
            Ok(review) => review,
            Err(e) => {
                error!(error = %e, "cannot decode admission review");
                let response = codec.decode_failure(&e);
                populate_span_with_mutation_results(&response.response);
                return response;
            }
        };

        populate_span_with_admission_request_data(&review.request);

        let response = self.mutate(codec, &review.request);

        populate_span_with_mutation_results(&response);

        codec.wrap_response(review.api_version.as_deref(), response)
    }

    /// Compute the response of an already decoded request. The uid of the
    /// response is always the one of the request.
    pub fn mutate(&self, codec: &AdmissionCodec, request: &AdmissionRequest) -> AdmissionResponse {
        match self.try_mutate(codec, request) {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, request_uid = request.uid.as_str(), "cannot mutate object");
                AdmissionResponse::failure(request.uid.clone(), e.to_string(), e.code())
            }
        }
    }

    fn try_mutate(
        &self,
        codec: &AdmissionCodec,
        request: &AdmissionRequest,
    ) -> Result<AdmissionResponse> {
        let pod = codec.decode_pod(request)?;

        // the namespace of the object is not set yet on creation
        let namespace = request
            .namespace
            .as_deref()
            .or(pod.metadata.namespace.as_deref())
            .unwrap_or_default();
        let name = pod
            .metadata
            .name
            .as_deref()
            .or(request.name.as_deref())
            .or(pod.metadata.generate_name.as_deref())
            .unwrap_or_default();

        info!(
            kind = request.kind.kind.as_str(),
            namespace,
            name,
            request_uid = request.uid.as_str(),
            operation = request.operation.as_str(),
            user = request.user_info.username.as_deref().unwrap_or_default(),
            "admission review"
        );

        let annotations = pod.metadata.annotations.as_ref();
        if let MutationDecision::Skip(reason) =
            policy::evaluate(namespace, annotations, &self.ignored_namespaces)
        {
            info!(reason = %reason, namespace, name, "skip mutation");
            return Ok(AdmissionResponse::allow(request.uid.clone()));
        }

        let spec = pod.spec.as_ref();
        let containers = spec.map(|s| s.containers.as_slice()).unwrap_or_default();
        let volumes = spec.and_then(|s| s.volumes.as_deref()).unwrap_or_default();

        let patch = build_patch(
            containers,
            volumes,
            annotations,
            &self.sidecar_config,
            &self.status_annotations,
        );
        if patch.is_empty() {
            return Ok(AdmissionResponse::allow(request.uid.clone()));
        }

        debug!(?patch, "patch");

        let encoded = codec.encode_patch(&patch)?;
        info!(
            namespace,
            name,
            operations = patch.len(),
            "sidecars injected"
        );

        Ok(AdmissionResponse::allow_with_patch(
            request.uid.clone(),
            encoded,
        ))
    }
}

fn populate_span_with_admission_request_data(adm_req: &AdmissionRequest) {
    Span::current().record("kind", adm_req.kind.kind.as_str());
    Span::current().record("name", adm_req.name.clone().unwrap_or_default().as_str());
    Span::current().record(
        "namespace",
        adm_req.namespace.clone().unwrap_or_default().as_str(),
    );
    Span::current().record("operation", adm_req.operation.as_str());
    Span::current().record("request_uid", adm_req.uid.as_str());
}

fn populate_span_with_mutation_results(response: &AdmissionResponse) {
    Span::current().record("allowed", response.allowed);
    Span::current().record("mutated", response.patch.is_some());
    if let Some(message) = response.failure_message() {
        Span::current().record("response_message", message);
    }
}
