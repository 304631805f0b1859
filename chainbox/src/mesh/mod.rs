pub mod transport;

#[cfg(feature = "server")]
pub mod server;

pub use transport::MeshTransport;
