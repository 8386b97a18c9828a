pub mod http;
pub mod transport;
