pub mod cache;
pub mod discovery;
pub mod keys;
pub mod mock;
pub mod ws;

pub use cache::BoundedCache;
pub use keys::CachedKeyStore;
pub use ws::WsConnector;
