//! Registry of online resources.
//!
//! Entries are bucketed by bare JID, so operations on unrelated accounts
//! only contend on their own shard of the map. Within a bucket entries keep
//! arrival order; re-registering a resource replaces its entry in place.

use crate::capabilities::{Capabilities, CapsKey};
use dashmap::DashMap;
use presence_protocol::{CapsAdvertisement, Jid, Presence};
use std::sync::Arc;
use tracing::{debug, trace};

/// One online resource.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    /// Full JID of the resource.
    pub address: Jid,
    /// Last presence received from the resource.
    pub presence: Presence,
    /// Resolved capabilities, if known.
    pub capabilities: Option<Arc<Capabilities>>,
}

impl PresenceEntry {
    /// Create an entry keyed by the presence sender.
    #[must_use]
    pub fn new(presence: Presence) -> Self {
        Self {
            address: presence.from.clone(),
            presence,
            capabilities: None,
        }
    }

    /// Attach resolved capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, caps: Arc<Capabilities>) -> Self {
        self.capabilities = Some(caps);
        self
    }

    /// Whether the resource is available.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.presence.is_available()
    }

    /// The capabilities advertisement carried by the presence.
    #[must_use]
    pub fn advertisement(&self) -> Option<CapsAdvertisement> {
        self.presence.capabilities()
    }

    /// Whether the entry advertises `key` but has not resolved it yet.
    fn awaits(&self, key: &CapsKey) -> bool {
        self.capabilities.is_none()
            && self
                .advertisement()
                .is_some_and(|adv| adv.node == key.node && adv.ver == key.ver)
    }
}

/// Concurrent registry of presence entries.
#[derive(Debug, Default)]
pub struct Registry {
    /// Entries indexed by bare JID.
    buckets: DashMap<Jid, Vec<PresenceEntry>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `entry.address`.
    ///
    /// Returns the entry previously stored for that address.
    pub fn register(&self, entry: PresenceEntry) -> Option<PresenceEntry> {
        let address = entry.address.clone();
        let mut bucket = self.buckets.entry(address.to_bare()).or_default();

        let previous = match bucket.iter().position(|e| e.address == address) {
            Some(slot) => Some(std::mem::replace(&mut bucket[slot], entry)),
            None => {
                bucket.push(entry);
                None
            }
        };

        debug!(
            address = %address,
            replaced = previous.is_some(),
            resources = bucket.len(),
            "Presence registered"
        );
        previous
    }

    /// Remove the entry for `address`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn unregister(&self, address: &Jid) -> bool {
        let bare = address.to_bare();
        let Some(mut bucket) = self.buckets.get_mut(&bare) else {
            return false;
        };

        let before = bucket.len();
        bucket.retain(|e| &e.address != address);
        let removed = bucket.len() != before;
        let empty = bucket.is_empty();
        drop(bucket); // Release the shard lock

        if empty {
            self.buckets.remove_if(&bare, |_, entries| entries.is_empty());
        }
        if removed {
            debug!(address = %address, "Presence unregistered");
        }
        removed
    }

    /// Available entries under `address`.
    ///
    /// A bare JID matches every resource of the account; a full JID
    /// matches only that resource.
    #[must_use]
    pub fn match_address(&self, address: &Jid) -> Vec<PresenceEntry> {
        let Some(bucket) = self.buckets.get(&address.to_bare()) else {
            return Vec::new();
        };

        bucket
            .iter()
            .filter(|e| e.is_available())
            .filter(|e| address.is_bare() || &e.address == address)
            .cloned()
            .collect()
    }

    /// Full JIDs under `address` that advertise capabilities they have not resolved.
    #[must_use]
    pub fn unresolved(&self, address: &Jid) -> Vec<(Jid, CapsKey)> {
        self.buckets
            .get(&address.to_bare())
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|e| e.capabilities.is_none())
                    .filter_map(|e| {
                        e.advertisement()
                            .map(|adv| (e.address.clone(), CapsKey::new(adv.node, adv.ver)))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Attach `caps` to the entry for `address` if it still advertises
    /// `caps.key()` and has nothing resolved.
    ///
    /// Returns `true` if the entry was updated.
    pub fn set_capabilities(&self, address: &Jid, caps: Arc<Capabilities>) -> bool {
        let key = caps.key();
        let Some(mut bucket) = self.buckets.get_mut(&address.to_bare()) else {
            return false;
        };

        match bucket
            .iter_mut()
            .find(|e| &e.address == address && e.awaits(&key))
        {
            Some(entry) => {
                entry.capabilities = Some(caps);
                true
            }
            None => false,
        }
    }

    /// Attach `caps` to every entry awaiting `key`.
    ///
    /// Returns the number of entries updated.
    pub fn attach_capabilities(&self, key: &CapsKey, caps: &Arc<Capabilities>) -> usize {
        let mut updated = 0;
        for mut bucket in self.buckets.iter_mut() {
            for entry in bucket.iter_mut().filter(|e| e.awaits(key)) {
                entry.capabilities = Some(Arc::clone(caps));
                updated += 1;
            }
        }
        trace!(key = %key, updated, "Capabilities attached");
        updated
    }

    /// Number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    /// Whether no resource is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of bare JIDs with at least one registered resource.
    #[must_use]
    pub fn bare_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence_protocol::PresenceType;

    const NODE: &str = "http://code.google.com/p/exodus";
    const VER: &str = "QgayPKawpkPSDYmwT/WM94uAlu0=";

    fn jid(s: &str) -> Jid {
        Jid::parse(s).unwrap()
    }

    fn entry(address: &str, presence_type: PresenceType) -> PresenceEntry {
        let j = jid(address);
        PresenceEntry::new(Presence::new(j.clone(), j, presence_type))
    }

    fn advertising(address: &str) -> PresenceEntry {
        let j = jid(address);
        let caps = CapsAdvertisement::new("sha-1", NODE, VER).caps_element();
        PresenceEntry::new(Presence::available(j.clone(), j).with_element(caps))
    }

    fn exodus() -> Arc<Capabilities> {
        Arc::new(Capabilities::new(NODE, VER, vec!["cool+feature".into()]))
    }

    #[test]
    fn test_register_groups_by_bare_jid() {
        let registry = Registry::new();
        registry.register(entry("ortuman@jackal.im/balcony", PresenceType::Available));
        registry.register(entry("noelia@jackal.im/balcony", PresenceType::Available));
        registry.register(entry("noelia@jackal.im/yard", PresenceType::Available));

        assert_eq!(registry.match_address(&jid("noelia@jackal.im")).len(), 2);
        assert_eq!(registry.match_address(&jid("ortuman@jackal.im")).len(), 1);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.bare_count(), 2);
    }

    #[test]
    fn test_register_replaces_in_place() {
        let registry = Registry::new();
        registry.register(entry("noelia@jackal.im/balcony", PresenceType::Available));
        registry.register(entry("noelia@jackal.im/yard", PresenceType::Available));

        let previous = registry.register(entry("noelia@jackal.im/balcony", PresenceType::Available));
        assert!(previous.is_some());
        assert_eq!(registry.len(), 2);

        let order: Vec<_> = registry
            .match_address(&jid("noelia@jackal.im"))
            .into_iter()
            .map(|e| e.address.to_string())
            .collect();
        assert_eq!(order, vec!["noelia@jackal.im/balcony", "noelia@jackal.im/yard"]);
    }

    #[test]
    fn test_match_filters_unavailable() {
        let registry = Registry::new();
        registry.register(entry("noelia@jackal.im/balcony", PresenceType::Available));
        registry.register(entry("noelia@jackal.im/yard", PresenceType::Unavailable));

        let matches = registry.match_address(&jid("noelia@jackal.im"));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].address, jid("noelia@jackal.im/balcony"));
    }

    #[test]
    fn test_match_full_jid() {
        let registry = Registry::new();
        registry.register(entry("noelia@jackal.im/balcony", PresenceType::Available));
        registry.register(entry("noelia@jackal.im/yard", PresenceType::Available));

        let matches = registry.match_address(&jid("noelia@jackal.im/yard"));
        assert_eq!(matches.len(), 1);
        assert!(registry.match_address(&jid("noelia@jackal.im/attic")).is_empty());
    }

    #[test]
    fn test_unregister() {
        let registry = Registry::new();
        registry.register(entry("noelia@jackal.im/balcony", PresenceType::Available));

        assert!(registry.unregister(&jid("noelia@jackal.im/balcony")));
        assert!(!registry.unregister(&jid("noelia@jackal.im/balcony")));
        assert!(registry.is_empty());
        assert!(registry.match_address(&jid("noelia@jackal.im")).is_empty());
    }

    #[test]
    fn test_attach_capabilities_only_to_awaiting_entries() {
        let registry = Registry::new();
        registry.register(advertising("noelia@jackal.im/balcony"));
        registry.register(advertising("ortuman@jackal.im/balcony"));
        registry.register(entry("noelia@jackal.im/yard", PresenceType::Available));

        let caps = exodus();
        assert_eq!(registry.attach_capabilities(&caps.key(), &caps), 2);
        // Already resolved entries are left alone.
        assert_eq!(registry.attach_capabilities(&caps.key(), &caps), 0);

        let noelia = registry.match_address(&jid("noelia@jackal.im"));
        assert!(noelia[0].capabilities.is_some());
        assert!(noelia[1].capabilities.is_none());
    }

    #[test]
    fn test_unresolved_and_set_capabilities() {
        let registry = Registry::new();
        registry.register(advertising("noelia@jackal.im/balcony"));
        registry.register(entry("noelia@jackal.im/yard", PresenceType::Available));

        let pending = registry.unresolved(&jid("noelia@jackal.im"));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, jid("noelia@jackal.im/balcony"));

        assert!(registry.set_capabilities(&jid("noelia@jackal.im/balcony"), exodus()));
        assert!(!registry.set_capabilities(&jid("noelia@jackal.im/yard"), exodus()));
        assert!(registry.unresolved(&jid("noelia@jackal.im")).is_empty());
    }
}
