//! Core infrastructure for gatehouse.
//!
//! This crate provides shared functionality used across all gatehouse modules:
//! - The shared key-value store abstraction backing all distributed state
//! - An in-process store for development and a Redis store for production
//! - Event system for observability
//! - Canonical key patterns for every subsystem

pub mod events;
pub mod keys;
pub mod store;

pub use events::{ControlEvent, EventListener, EventListeners, FnListener};
pub use store::memory::MemoryStore;
pub use store::redis::RedisStore;
pub use store::{KvStore, KvStoreExt, MemoryInfo, SharedStore, StoreError};
