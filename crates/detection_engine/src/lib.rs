//! # Detection Engine
//!
//! Turns license-plate detections from entry and exit cameras into parking
//! session transitions, guest authorizations and registration invites.
//!
//! The [`DetectionProcessor`] is the entry point. It consults the session and
//! guest ledgers and the registration flow, all of which sit on the store
//! traits in [`store`].

/// Engine configuration
pub mod config;
/// Pending / confirmed / expired guests
pub mod guest_ledger;
/// Per-key serialization
pub mod locks;
/// In-memory store backend
pub mod memory_store;
/// Registration invite delivery
pub mod notifier;
/// Queue between committed transitions and email delivery
pub mod outbox;
/// Plate canonicalization
pub mod plate;
/// The detection decision engine
pub mod processor;
/// Registration tokens and completion
pub mod registration_flow;
/// Parking session lifecycle
pub mod session_ledger;
/// Store contracts
pub mod store;
/// Domain types and errors
pub mod types;

pub use config::{EngineConfig, RedeliveryPolicy};
pub use guest_ledger::GuestLedger;
pub use locks::KeyedLocks;
pub use memory_store::InMemoryParkingStore;
pub use notifier::{RecordingNotifier, RegistrationNotifier};
pub use outbox::{NotificationOutbox, OutboundNotification, OutboxDispatcher};
pub use processor::DetectionProcessor;
pub use registration_flow::{RegistrationFlow, TokenIssue};
pub use session_ledger::{EntryResult, SessionLedger};
pub use store::ParkingStores;
pub use types::*;
