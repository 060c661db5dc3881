pub mod compactor;
pub mod config;
pub mod engine;
pub mod error;
pub mod limits;
pub mod model;
pub mod observability;
pub mod seed;
pub mod store;
pub mod wal;
pub mod wire;

pub use engine::{Engine, EngineConfig};
pub use error::{Error, Result};
pub use store::{ReservationStore, WalStore};
