//! Outbound stanza seams.
//!
//! The hub never owns a transport. It is handed a [`DomainRouter`] at
//! construction and pushes discovery queries through it without waiting
//! for delivery.

use presence_protocol::Stanza;

/// Fire-and-forget delivery of outbound stanzas.
pub trait StanzaSender: Send + Sync {
    /// Deliver `stanza` to its `to` address. Must not block.
    fn send(&self, stanza: Stanza);
}

/// A stanza sender bound to the domain it serves.
pub trait DomainRouter: StanzaSender {
    /// The served domain, used as the `from` of hub-originated stanzas.
    fn domain(&self) -> &str;
}
