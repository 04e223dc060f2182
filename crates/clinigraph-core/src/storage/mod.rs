//! # Storage Module
//!
//! Durable backends for the directories and the triple store.

pub mod redb_store;

pub use redb_store::RedbStore;
