//! # presence-hub-core
//!
//! Presence registry and entity capabilities negotiation.
//!
//! - **Registry** - which resources of which accounts are online
//! - **PendingRequestTable** - outstanding `disco#info` queries by correlation id
//! - **CapabilitiesStore** - content-addressed feature sets keyed by `(node, ver)`
//! - **PresenceHub** - registration, negotiation and response handling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ presence ┌─────────────┐  fetch/insert  ┌───────────────────┐
//! │   Session   │─────────▶│ PresenceHub │───────────────▶│ CapabilitiesStore │
//! └─────────────┘          └─────────────┘                └───────────────────┘
//!        ▲                   │    │    ▲
//!        │  disco#info get   │    │    │ disco#info result
//!        └───────────────────┘    │    └──────────── DomainRouter
//!                          ┌──────┴──────┐
//!                          │  Registry   │
//!                          │  Pending    │
//!                          └─────────────┘
//! ```

pub mod capabilities;
pub mod hub;
pub mod pending;
pub mod registry;
pub mod sender;

pub use capabilities::{Capabilities, CapabilitiesStore, CapsKey, MemoryCapabilitiesStore, StoreError};
pub use hub::{HubConfig, HubError, HubStats, PresenceHub, ResponseOutcome};
pub use pending::{PendingRequest, PendingRequestTable};
pub use registry::{PresenceEntry, Registry};
pub use sender::{DomainRouter, StanzaSender};
