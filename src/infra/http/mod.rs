pub mod error;
pub mod headers;
mod middleware;
mod public;

pub use headers::{HeaderPolicy, PolicyError, RequestProfile, apply_response_headers};
pub use public::{HttpState, build_router};
