//! PairSync Core - Domain model and port definitions
//!
//! This crate contains the hexagonal architecture core of the PairSync
//! change-detection engine:
//! - **Domain entities** - `DocPair`, `HalfState`, `PairState`, `ProcessorLease`,
//!   `RemoteCursor`
//! - **Port definitions** - Traits for adapters: `ILocalFileSystem`, `IRemoteApi`,
//!   `IPairStateStore`
//!
//! # Architecture
//!
//! The domain module holds pure business logic with no I/O. Ports define the
//! trait interfaces that adapter crates (`pairsync-store`, `pairsync-watcher`)
//! implement or consume. The two watchers in `pairsync-watcher` drive all
//! state transitions through these ports; nothing in this crate performs
//! filesystem or network access.

pub mod config;
pub mod domain;
pub mod ports;
