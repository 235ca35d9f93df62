//! Remote source plumbing: transports and payload mapping.

mod http;
pub mod mapping;
mod offline;

pub use http::HttpTransport;
pub use offline::UnreachableTransport;
