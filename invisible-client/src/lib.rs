//! invisible-client
//!
//! Async session layer over `invisible-core`. It connects a
//! [`WalletSession`](invisible_core::WalletSession) to the exchange's
//! settlement service and state store, persists key material in a local sled
//! cache, and runs the concurrent recovery scans that rediscover owned
//! addresses.
//!
//! The collaborators are traits ([`SettlementService`], [`StateStore`]) so
//! transports can be swapped and tests can run against in-memory doubles.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod recovery;
pub mod remote;
pub mod telemetry;

pub use cache::{CachedUserState, LocalCache};
pub use client::{Receipt, WalletClient};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use recovery::{restore_keys, scan_window, ScanResult};
pub use remote::{
    AmendRequest, CancelRequest, SettlementService, StateStore, Submission, SubmissionResponse,
};
pub use telemetry::init_tracing;
