use axum::{
    body::Bytes,
    extract,
    http::{header, HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use tracing::debug;

use crate::admission::AdmissionReviewResponse;
use crate::api::{api_error::ApiError, state::ApiServerState};

#[tracing::instrument(
    name = "mutation",
    fields(
        request_uid=tracing::field::Empty,
        host=crate::config::HOSTNAME.as_str(),
        name=tracing::field::Empty,
        namespace=tracing::field::Empty,
        operation=tracing::field::Empty,
        kind=tracing::field::Empty,
        allowed=tracing::field::Empty,
        mutated=tracing::field::Empty,
        response_message=tracing::field::Empty,
    ),
    skip_all)]
/// Inject the sidecars into the object carried by the AdmissionReview.
///
/// Malformed reviews are still answered with a `200`: the failure is
/// reported inside of the AdmissionResponse.
pub(crate) async fn mutate_handler(
    extract::State(state): extract::State<Arc<ApiServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AdmissionReviewResponse>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("empty body"));
    }
    check_content_type(&headers)?;

    debug!(admission_review = %String::from_utf8_lossy(&body));

    let review = state.mutator.review(&state.codec, &body);

    Ok(Json(review))
}

pub(crate) async fn readiness_handler() -> StatusCode {
    StatusCode::OK
}

fn check_content_type(headers: &HeaderMap) -> Result<(), ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    match content_type.parse::<mime::Mime>() {
        Ok(mime) if mime.essence_str() == mime::APPLICATION_JSON.essence_str() => Ok(()),
        _ => Err(ApiError::unsupported_media_type(format!(
            "invalid Content-Type {content_type:?}, expect `application/json`"
        ))),
    }
}
