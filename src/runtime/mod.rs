//! HTTP surface: routes, request/response models, and server loop.

pub mod api;
pub mod error;
pub mod server;

pub use api::{router, QueryAccepted, QuerySubmission};
pub use error::ApiError;
pub use server::serve;
