#![forbid(unsafe_code)]

//! HTTP collaborator for load runs: the [`HttpTransport`] seam plus a hyper-based default client.

mod client;
mod error;
mod estimate;
mod transport;
mod types;
mod util;

pub use client::HttpClient;
pub use error::{Error, HttpTransportErrorKind, Result};
pub use estimate::estimate_http_request_bytes;
pub use transport::HttpTransport;
pub use http::Method;
pub use types::{HttpRequest, HttpResponse, Timings};
