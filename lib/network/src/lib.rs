//! Serves sampled data over HTTP and decides whether the network is up.

pub mod connectivity;
pub mod server;

pub use connectivity::InterfaceConnectivity;
pub use server::HttpTransport;
