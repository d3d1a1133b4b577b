pub mod framing;
pub mod server;
