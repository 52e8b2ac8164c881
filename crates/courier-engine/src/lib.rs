pub mod client;
pub mod error;
pub mod qr;
pub mod router;
pub mod supervisor;
pub mod testing;

pub use client::Client;
pub use error::ClientError;
pub use router::Router;
pub use supervisor::{LinkState, Supervisor, SupervisorConfig};
