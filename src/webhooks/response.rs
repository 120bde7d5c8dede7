//! Rendering of admission decisions into `AdmissionReview` responses.
//!
//! | Outcome        | `allowed` | `status.code` | `status.reason` |
//! |----------------|-----------|---------------|-----------------|
//! | Allow          | true      | 200           |                 |
//! | Deny           | false     | 403           | `Failure`       |
//! | Internal error | false     | 500           | `InternalError` |
//! | Bad request    | false     | 400           | `BadRequest`    |

use kube::Resource;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::{DynamicObject, Status};

use crate::verification::AdmissionDecision;

/// Status code carried by an allowed response
pub const ALLOW_CODE: u16 = 200;
/// Status code carried by a policy deny
pub const DENY_CODE: u16 = 403;
/// Status code for requests that could not be evaluated
pub const INTERNAL_ERROR_CODE: u16 = 500;
/// Status code for malformed requests
pub const BAD_REQUEST_CODE: u16 = 400;

/// Status reason on a policy deny
pub const DENY_REASON: &str = "Failure";

/// Render a policy decision for `request`
pub fn render_decision<T: Resource>(
    request: &AdmissionRequest<T>,
    decision: &AdmissionDecision,
) -> AdmissionReview<DynamicObject> {
    match decision {
        AdmissionDecision::Allow { message, .. } => allow(request, message),
        AdmissionDecision::Deny { message, .. } => {
            let mut response = AdmissionResponse::from(request).deny(message);
            response.result = Status::failure(message, DENY_REASON).with_code(DENY_CODE);
            response.into_review()
        }
    }
}

/// Allowed response with `message`
pub fn allow<T: Resource>(request: &AdmissionRequest<T>, message: &str) -> AdmissionReview<DynamicObject> {
    let mut response = AdmissionResponse::from(request);
    let mut status = Status::success().with_code(ALLOW_CODE);
    status.message = message.to_string();
    response.result = status;
    response.into_review()
}

/// Response for a request that could not be evaluated
pub fn internal_error<T: Resource>(
    request: &AdmissionRequest<T>,
    message: &str,
) -> AdmissionReview<DynamicObject> {
    let mut response = AdmissionResponse::from(request).deny(message);
    response.result = Status::failure(message, "InternalError").with_code(INTERNAL_ERROR_CODE);
    response.into_review()
}

/// Response for an envelope that is not a usable admission request
pub fn bad_request(message: &str) -> AdmissionReview<DynamicObject> {
    let mut response = AdmissionResponse::invalid(message);
    response.result = Status::failure(message, "BadRequest").with_code(BAD_REQUEST_CODE);
    response.into_review()
}

/// Same as [`bad_request`] but keeps the request's uid for correlation
pub fn bad_request_for<T: Resource>(
    request: &AdmissionRequest<T>,
    message: &str,
) -> AdmissionReview<DynamicObject> {
    let mut response = AdmissionResponse::from(request).deny(message);
    response.result = Status::failure(message, "BadRequest").with_code(BAD_REQUEST_CODE);
    response.into_review()
}
