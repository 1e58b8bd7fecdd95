//! Bound sessions and stanza delivery.

use crate::metrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use presence_hub_core::{DomainRouter, StanzaSender};
use presence_protocol::{Jid, Stanza};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Outbound stanza queue of one session.
pub type SessionSender = mpsc::UnboundedSender<Stanza>;

/// Routes stanzas to sessions bound by full JID.
pub struct SessionRouter {
    domain: String,
    sessions: DashMap<Jid, SessionSender>,
}

impl SessionRouter {
    /// Create a router for `domain`.
    #[must_use]
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            sessions: DashMap::new(),
        }
    }

    /// Bind a session to `jid`.
    ///
    /// Returns `false` if another session already holds the JID.
    pub fn bind(&self, jid: Jid, sender: SessionSender) -> bool {
        match self.sessions.entry(jid) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                debug!(jid = %vacant.key(), "Session bound");
                vacant.insert(sender);
                true
            }
        }
    }

    /// Release the session bound to `jid`.
    pub fn unbind(&self, jid: &Jid) {
        if self.sessions.remove(jid).is_some() {
            debug!(jid = %jid, "Session unbound");
        }
    }

    /// Number of bound sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl StanzaSender for SessionRouter {
    fn send(&self, stanza: Stanza) {
        let Some(to) = stanza.to().cloned() else {
            trace!("Dropping stanza without recipient");
            return;
        };

        let kind = metrics::stanza_kind(&stanza);
        let delivered = self
            .sessions
            .get(&to)
            .is_some_and(|session| session.send(stanza).is_ok());

        if delivered {
            metrics::record_stanza(kind, "outbound");
        } else {
            debug!(to = %to, "No session for recipient, stanza dropped");
        }
    }
}

impl DomainRouter for SessionRouter {
    fn domain(&self) -> &str {
        &self.domain
    }
}
