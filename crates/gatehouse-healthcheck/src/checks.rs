//! Standard probes.

pub mod http;
pub mod store;
pub mod system;

pub use http::HttpHealthCheck;
pub use store::StoreHealthCheck;
pub use system::SystemHealthCheck;
