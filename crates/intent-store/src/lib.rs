//! Intent Store
//!
//! Durable record of every [`IntentData`](intent_model::IntentData) with
//! optimistic-concurrency writes.
//!
//! # Core Concepts
//!
//! - [`IntentStore`]: `get` / compare-and-swap `write` / change stream
//! - Pending requests: submissions wait in a separate map until the owning
//!   replica promotes them over a stable record
//! - [`StoreEvent`]: change notification delivered to every subscribed replica
//! - [`IntentListener`]: per-store subscriber list, fed by a dedicated fan-out task
//!
//! # Example
//!
//! ```rust,ignore
//! use intent_store::{InMemoryIntentStore, IntentStore};
//!
//! let store = InMemoryIntentStore::new(1024);
//! let mut changes = store.subscribe();
//! let ok = store.write(&key, None, IntentData::submitted(intent)).await?;
//! assert!(ok);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod event;
mod listener;
mod memory;
mod store;

pub use error::StoreError;
pub use event::StoreEvent;
pub use listener::{EventFanout, IntentEvent, IntentListener};
pub use memory::{InMemoryIntentStore, StoreSnapshot};
pub use store::IntentStore;

/// Default capacity of the change-notification channel
pub const DEFAULT_CHANGE_BUFFER: usize = 4096;
