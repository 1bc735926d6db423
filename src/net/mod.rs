pub mod framing;
pub mod match_server;
pub mod protocol;
pub mod tls;
pub mod transport;
