pub mod cors;
pub mod rate_limit;

pub use cors::build_cors_layer;
pub use rate_limit::{rate_limit_middleware, RateLimiter};
