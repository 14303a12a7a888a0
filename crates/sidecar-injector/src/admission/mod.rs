//! Wire types of the Kubernetes admission webhook protocol.

mod codec;
pub mod errors;
mod request;
mod response;
pub mod review;

pub use codec::AdmissionCodec;
pub use request::{AdmissionRequest, GroupVersionKind, GroupVersionResource};
pub use response::{AdmissionResponse, AdmissionResponseStatus, PatchType};
pub use review::{AdmissionReviewRequest, AdmissionReviewResponse};
