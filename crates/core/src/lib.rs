//! Core types for Prevail
//!
//! This crate defines the vocabulary shared by the durability layer and the
//! live engine:
//! - Version / SequenceNumber: positions in the transaction history
//! - Timestamp: execution time handed to transactions
//! - Transaction: deterministic mutation of prevalent state
//! - LogEntry / Subscriber: replay and live delivery of logged transactions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod timestamp;
pub mod transaction;

pub use timestamp::Timestamp;
pub use transaction::{LogEntry, Subscriber, Transaction};

/// Number of transactions applied to produce a state.
///
/// Version 0 is the initial state supplied by the caller. A snapshot at
/// version `v` contains the effects of transactions `1..=v`.
pub type Version = u64;

/// Position of an entry in the transaction log.
///
/// The entry that produces version `v` has sequence number `v`.
pub type SequenceNumber = u64;
