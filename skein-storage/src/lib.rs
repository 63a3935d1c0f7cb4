//! Datastore abstraction for skein hosts.
//!
//! Provides a [`Datastore`](traits::Datastore) trait over slash-separated string
//! keys with in-memory and SQLite backends. Routing keeps its value and provider
//! records here.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;
