//! # trellis-sync: keeps the layout tree converged with the layout store
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ApiRequest    ┌─────────────┐   HTTP/JSON   ┌──────────────┐
//! │ SyncEngine  │ ──────────────► │ Transport   │ ────────────► │ layout store │
//! │ (per page)  │ ◄────────────── │ (trait)     │ ◄──────────── │ (remote)     │
//! └──────┬──────┘   ApiResponse   └─────────────┘               └──────────────┘
//!        │ replace()                     ▲
//!        ▼                               │ in-process
//! ┌─────────────┐                 ┌──────┴───────┐
//! │ TreeModel   │                 │ Reference    │
//! │ (snapshot)  │                 │ Server       │
//! └─────────────┘                 └──────────────┘
//! ```
//!
//! Every mutation is followed by a full reload: the store, not the client,
//! owns ids and ranks.
//!
//! ## Modules
//!
//! - [`scope`]: which layout namespace the session addresses, and its endpoints
//! - [`protocol`]: request/response bodies of the layout store
//! - [`transport`]: the `Transport` seam and its reqwest implementation
//! - [`engine`]: the sync engine
//! - [`server`]: in-process reference implementation of the store
//! - [`config`]: engine configuration

pub mod config;
pub mod engine;
pub mod protocol;
pub mod scope;
pub mod server;
pub mod transport;

// Re-exports for convenience
pub use config::EngineConfig;
pub use engine::{Operation, SyncEngine, SyncError, SyncEvent};
pub use protocol::{PublishReceipt, RankEntry};
pub use scope::{Endpoint, Scope};
pub use server::{Failure, ReferenceServer};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport, TransportError};
