use base64::{engine::general_purpose, Engine as _};
use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;

use super::errors::{ReviewError, Result};
use super::review::{ADMISSION_V1, ADMISSION_V1BETA1};
use super::{AdmissionRequest, AdmissionResponse, AdmissionReviewRequest, AdmissionReviewResponse};

/// Serialization context of the admission webhook.
///
/// Built once at startup and handed by reference to whoever needs to
/// translate between the wire format and the typed objects.
#[derive(Clone, Debug)]
pub struct AdmissionCodec {
    supported_api_versions: Vec<&'static str>,
    default_api_version: &'static str,
}

impl Default for AdmissionCodec {
    fn default() -> Self {
        AdmissionCodec {
            supported_api_versions: vec![ADMISSION_V1, ADMISSION_V1BETA1],
            default_api_version: ADMISSION_V1,
        }
    }
}

impl AdmissionCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode_review(&self, body: &[u8]) -> Result<AdmissionReviewRequest> {
        serde_json::from_slice(body).map_err(ReviewError::DecodeEnvelope)
    }

    /// Decode the object embedded into the request as a Pod
    pub fn decode_pod(&self, request: &AdmissionRequest) -> Result<Pod> {
        let raw = request
            .object
            .as_ref()
            .filter(|raw| !raw.0.is_null())
            .ok_or_else(|| ReviewError::MissingObject {
                uid: request.uid.clone(),
            })?;

        serde_json::from_value(raw.0.clone()).map_err(|source| ReviewError::DecodeObject {
            uid: request.uid.clone(),
            source,
        })
    }

    /// Serialize the patch and encode it the way the `patch` field of an
    /// AdmissionResponse expects it: base64 of the JSON document.
    pub fn encode_patch<P: Serialize + ?Sized>(&self, patch: &P) -> Result<String> {
        let raw = serde_json::to_vec(patch).map_err(ReviewError::EncodePatch)?;
        Ok(general_purpose::STANDARD.encode(raw))
    }

    /// The API server expects the response to use the same version of the
    /// AdmissionReview it sent.
    pub fn response_api_version(&self, request_api_version: Option<&str>) -> &'static str {
        request_api_version
            .and_then(|version| {
                self.supported_api_versions
                    .iter()
                    .find(|supported| **supported == version)
                    .copied()
            })
            .unwrap_or(self.default_api_version)
    }

    pub fn wrap_response(
        &self,
        request_api_version: Option<&str>,
        response: AdmissionResponse,
    ) -> AdmissionReviewResponse {
        AdmissionReviewResponse::new(self.response_api_version(request_api_version), response)
    }

    /// Response for an envelope that could not be decoded at all: there's no
    /// uid to echo back.
    pub fn decode_failure(&self, error: &ReviewError) -> AdmissionReviewResponse {
        AdmissionReviewResponse::new(
            self.default_api_version,
            AdmissionResponse::failure(String::new(), error.to_string(), error.code()),
        )
    }
}
