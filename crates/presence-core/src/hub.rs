//! The presence hub.
//!
//! Ties the [`Registry`], the [`PendingRequestTable`] and a
//! [`CapabilitiesStore`] together: presences are registered as they arrive,
//! advertised capabilities are looked up in the store, and unknown ones are
//! resolved with a `disco#info` query whose response is fed back through
//! [`PresenceHub::process_response`].

use crate::capabilities::{Capabilities, CapabilitiesStore, CapsKey};
use crate::pending::{PendingRequestTable, DEFAULT_REQUEST_TTL};
use crate::registry::{PresenceEntry, Registry};
use crate::sender::DomainRouter;
use presence_protocol::caps::{disco_info_features, disco_info_query};
use presence_protocol::{Iq, Jid, JidError, Presence};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The router's domain is not a valid domain JID.
    #[error("Invalid hub domain: {0}")]
    InvalidDomain(#[from] JidError),

    /// A presence was sent from an address without node or resource.
    #[error("Presence sender is not a full JID: {0}")]
    NotFullJid(Jid),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// How long a discovery request waits for its response.
    pub request_ttl: Duration,
    /// Attach newly resolved capabilities to already registered entries.
    pub fan_out_resolved: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            request_ttl: DEFAULT_REQUEST_TTL,
            fan_out_resolved: false,
        }
    }
}

/// What [`PresenceHub::process_response`] did with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// No pending request has this id.
    Unknown,
    /// The responder returned an error.
    Failed,
    /// The response carried no `disco#info` query.
    Malformed,
    /// The capabilities were resolved.
    Resolved,
}

impl ResponseOutcome {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseOutcome::Unknown => "unknown",
            ResponseOutcome::Failed => "failed",
            ResponseOutcome::Malformed => "malformed",
            ResponseOutcome::Resolved => "resolved",
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Registered resources.
    pub resources: usize,
    /// Bare JIDs with at least one registered resource.
    pub addresses: usize,
    /// Outstanding discovery requests.
    pub pending_requests: usize,
}

/// Presence registry with entity capabilities negotiation.
pub struct PresenceHub {
    domain: Jid,
    router: Arc<dyn DomainRouter>,
    store: Arc<dyn CapabilitiesStore>,
    registry: Registry,
    pending: PendingRequestTable,
    config: HubConfig,
}

impl PresenceHub {
    /// Create a hub with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the router's domain is not a valid domain.
    pub fn new(
        router: Arc<dyn DomainRouter>,
        store: Arc<dyn CapabilitiesStore>,
    ) -> Result<Self, HubError> {
        Self::with_config(router, store, HubConfig::default())
    }

    /// Create a hub with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the router's domain is not a valid domain.
    pub fn with_config(
        router: Arc<dyn DomainRouter>,
        store: Arc<dyn CapabilitiesStore>,
        config: HubConfig,
    ) -> Result<Self, HubError> {
        let domain = Jid::new(None, router.domain(), None)?;
        info!(domain = %domain, "Creating presence hub with config: {:?}", config);

        Ok(Self {
            domain,
            router,
            store,
            registry: Registry::new(),
            pending: PendingRequestTable::new(config.request_ttl),
            config,
        })
    }

    /// The served domain.
    #[must_use]
    pub fn domain(&self) -> &Jid {
        &self.domain
    }

    /// Register a presence.
    ///
    /// Known capabilities are attached immediately; unknown ones trigger a
    /// discovery query and resolve later. Returns the available entries of
    /// the sender's bare JID.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence sender is not a full JID.
    pub async fn register_presence(
        &self,
        presence: Presence,
    ) -> Result<Vec<PresenceEntry>, HubError> {
        let address = presence.from.clone();
        if !address.is_full() {
            return Err(HubError::NotFullJid(address));
        }

        let mut entry = PresenceEntry::new(presence);
        let mut discover = None;

        if let Some(adv) = entry.advertisement().filter(|_| entry.is_available()) {
            let key = CapsKey::new(adv.node, adv.ver);
            match self.cached(&key).await {
                Some(caps) => entry = entry.with_capabilities(caps),
                None => discover = Some(key),
            }
        }

        self.registry.register(entry);

        if let Some(key) = discover {
            self.request_capabilities(key, &address);
        }

        Ok(self.registry.match_address(&address.to_bare()))
    }

    /// Remove the entry of the presence sender.
    ///
    /// Returns `true` if an entry was removed. Outstanding discovery for the
    /// resource is left to complete.
    pub fn unregister_presence(&self, presence: &Presence) -> bool {
        self.registry.unregister(&presence.from)
    }

    /// Available entries under `address` (bare: all resources, full: one).
    #[must_use]
    pub fn available_presences_matching(&self, address: &Jid) -> Vec<PresenceEntry> {
        self.registry.match_address(address)
    }

    /// Fill unresolved entries under `address` from the store, then return
    /// the available entries.
    pub async fn refresh_capabilities(&self, address: &Jid) -> Vec<PresenceEntry> {
        for (resource, key) in self.registry.unresolved(address) {
            if let Some(caps) = self.cached(&key).await {
                self.registry.set_capabilities(&resource, caps);
            }
        }
        self.registry.match_address(address)
    }

    /// Handle an IQ response addressed to the hub.
    ///
    /// Only a result or error from the JID that was queried completes a
    /// pending request; anything else is [`ResponseOutcome::Unknown`] and
    /// leaves the request pending.
    pub async fn process_response(&self, iq: &Iq) -> ResponseOutcome {
        if !iq.is_response() {
            trace!(id = %iq.id, iq_type = ?iq.iq_type, "Ignoring IQ request");
            return ResponseOutcome::Unknown;
        }
        let Some(request) = self.pending.complete(&iq.id, iq.from.as_ref()) else {
            trace!(id = %iq.id, "Ignoring response with unknown id");
            return ResponseOutcome::Unknown;
        };

        if iq.is_error() {
            debug!(id = %iq.id, key = %request.key, "Capabilities discovery failed");
            return ResponseOutcome::Failed;
        }
        let Some(features) = disco_info_features(iq) else {
            debug!(id = %iq.id, key = %request.key, "Discovery response without disco#info query");
            return ResponseOutcome::Malformed;
        };

        // Node and ver come from our own request, never from the responder.
        let key = request.key;
        let caps = Capabilities::new(key.node.clone(), key.ver.clone(), features);
        debug!(key = %key, features = caps.features.len(), "Capabilities resolved");

        if let Err(e) = self.store.insert(caps.clone()).await {
            warn!(key = %key, error = %e, "Failed to store capabilities");
        }

        if self.config.fan_out_resolved {
            let updated = self.registry.attach_capabilities(&key, &Arc::new(caps));
            debug!(key = %key, updated, "Capabilities pushed to registered resources");
        }

        ResponseOutcome::Resolved
    }

    /// Drop expired discovery requests.
    ///
    /// Returns the number of requests removed.
    pub fn sweep_expired(&self) -> usize {
        self.pending.sweep()
    }

    /// Sweep expired requests every `period` until the hub is dropped.
    ///
    /// `on_swept` receives the count of every sweep that removed something.
    pub fn spawn_sweeper<F>(self: &Arc<Self>, period: Duration, on_swept: F) -> JoinHandle<()>
    where
        F: Fn(usize) + Send + 'static,
    {
        let hub: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                let swept = hub.sweep_expired();
                if swept > 0 {
                    debug!(swept, "Swept expired discovery requests");
                    on_swept(swept);
                }
            }
        })
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            resources: self.registry.len(),
            addresses: self.registry.bare_count(),
            pending_requests: self.pending.len(),
        }
    }

    async fn cached(&self, key: &CapsKey) -> Option<Arc<Capabilities>> {
        match self.store.fetch(key).await {
            Ok(caps) => caps,
            Err(e) => {
                warn!(key = %key, error = %e, "Capabilities fetch failed, treating as miss");
                None
            }
        }
    }

    fn request_capabilities(&self, key: CapsKey, to: &Jid) {
        let Some(id) = self.pending.begin(key.clone(), to) else {
            return;
        };

        let iq = disco_info_query(id.clone(), self.domain.clone(), to.clone(), &key.node, &key.ver);
        debug!(id = %id, key = %key, to = %to, "Requesting capabilities");
        self.router.send(iq.into());
    }
}
