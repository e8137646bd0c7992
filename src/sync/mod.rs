//! Reconciles the local snapshot with the Dropbox backup.
//!
//! Policy: when a remote backup exists it replaces local state. The remote
//! copy is only ever written when Dropbox positively reports that it does
//! not exist yet.

mod service;

pub use service::{SyncOutcome, SyncService};
