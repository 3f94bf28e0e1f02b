pub mod context;
mod handler;
pub mod token;

pub use context::BoxBody;
pub use handler::{build_upstream_client, handle_request};
