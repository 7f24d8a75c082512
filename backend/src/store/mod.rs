// src/store/mod.rs

pub mod local;
pub mod memory;
pub mod postgres;
pub mod remote;

pub use local::{FileLocalStore, LocalStore, MemoryLocalStore};
pub use memory::MemoryRemoteStore;
pub use postgres::PgRemoteStore;
pub use remote::RemoteStore;
