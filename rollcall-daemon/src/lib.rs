//! Rollcall daemon runtime: HTTP event stream + control socket + keep-alive
//! and cache-sweep tasks.

mod error;
pub mod http;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod seed;

pub use error::DaemonError;
pub use protocol::{
    request_flush, request_publish, request_status, request_stop, send_request, DaemonRequest,
    DaemonResponse,
};
pub use runtime::{run, start_blocking};
