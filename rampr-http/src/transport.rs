use async_trait::async_trait;

use crate::{HttpRequest, HttpResponse, Result};

/// Anything that can execute one HTTP exchange for a VU.
///
/// The harness only depends on this trait; tests substitute in-process stubs.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn request(&self, req: HttpRequest) -> Result<HttpResponse>;
}
