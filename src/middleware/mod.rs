//! HTTP middleware: error formatting, request IDs and request logging

pub mod error;
pub mod logging;

pub use error::{
    get_request_id_from_headers, json_error_response, success_response, success_response_with_meta,
    ErrorResponse,
};
pub use logging::{request_logging_middleware, UuidRequestId};
