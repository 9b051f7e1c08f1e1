//! Aminals Journal -- audit trail of every materialized entity write.
//!
//! The indexer commits one change set per chain event. This crate records the
//! before/after image of each committed record together with the handler and
//! the event that caused it, so a consumer can answer "what did this event
//! change" or "how did this proposal's totals evolve".
//!
//! # Modules
//!
//! - [`journal`]: Change journal with bounded retention and query helpers by
//!   entity, entity type, handler, event and block range.

#![deny(unsafe_code)]

pub mod journal;
