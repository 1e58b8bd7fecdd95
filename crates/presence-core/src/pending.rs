//! Outstanding capability discovery requests.
//!
//! Every `disco#info` query the hub sends is recorded here under its
//! correlation id until the response arrives or the request expires.
//! At most one live request exists per capability key.

use crate::capabilities::CapsKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use presence_protocol::Jid;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Default time a request may wait for its response.
pub const DEFAULT_REQUEST_TTL: Duration = Duration::from_secs(30);

/// Generate an unpredictable request id.
#[must_use]
pub fn generate_request_id() -> String {
    format!("disco_{}", Uuid::new_v4().simple())
}

/// A discovery request awaiting its response.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Correlation id of the query.
    pub id: String,
    /// Capability key being resolved.
    pub key: CapsKey,
    /// Full JID the query was sent to; only it may answer.
    pub to: Jid,
    /// When the request stops being answerable.
    pub expires_at: Instant,
}

impl PendingRequest {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug)]
struct InFlight {
    id: String,
    expires_at: Instant,
}

/// Concurrent table of pending discovery requests.
#[derive(Debug)]
pub struct PendingRequestTable {
    /// Requests indexed by correlation id.
    requests: DashMap<String, PendingRequest>,
    /// Live request id per capability key.
    in_flight: DashMap<CapsKey, InFlight>,
    ttl: Duration,
}

impl PendingRequestTable {
    /// Create a table whose requests expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            requests: DashMap::new(),
            in_flight: DashMap::new(),
            ttl,
        }
    }

    /// Request time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start a request for `key` addressed to `to`.
    ///
    /// Returns the new correlation id, or `None` if a live request for
    /// `key` is already outstanding. An expired request for `key` is
    /// replaced.
    pub fn begin(&self, key: CapsKey, to: &Jid) -> Option<String> {
        let now = Instant::now();
        let id = generate_request_id();
        let request = PendingRequest {
            id: id.clone(),
            key: key.clone(),
            to: to.clone(),
            expires_at: now + self.ttl,
        };
        let in_flight = InFlight {
            id: id.clone(),
            expires_at: request.expires_at,
        };

        // Lock order is in_flight -> requests; nothing takes them the other way.
        match self.in_flight.entry(key) {
            Entry::Occupied(occupied) if occupied.get().expires_at > now => {
                trace!(key = %occupied.key(), id = %occupied.get().id, "Discovery already in flight");
                return None;
            }
            Entry::Occupied(mut occupied) => {
                let stale = occupied.insert(in_flight);
                self.requests.remove(&stale.id);
                debug!(key = %occupied.key(), stale = %stale.id, "Replacing expired discovery request");
                self.requests.insert(id.clone(), request);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(in_flight);
                self.requests.insert(id.clone(), request);
            }
        }

        Some(id)
    }

    /// Consume the request with correlation id `id` answered by `responder`.
    ///
    /// Returns `None` if no such request exists, it has expired, or
    /// `responder` is not the queried JID. A request answered by someone
    /// else stays pending; an expired one is dropped.
    pub fn complete(&self, id: &str, responder: Option<&Jid>) -> Option<PendingRequest> {
        let Some((_, request)) = self
            .requests
            .remove_if(id, |_, request| responder == Some(&request.to))
        else {
            if self.requests.contains_key(id) {
                warn!(id = %id, responder = ?responder, "Discovery response from unexpected responder");
            }
            return None;
        };
        self.in_flight
            .remove_if(&request.key, |_, f| f.id == request.id);

        if request.is_expired(Instant::now()) {
            debug!(id = %id, key = %request.key, "Response for expired discovery request");
            return None;
        }
        Some(request)
    }

    /// Drop every expired request.
    ///
    /// Returns the number of requests removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();

        self.requests.retain(|_, request| {
            if request.is_expired(now) {
                expired.push((request.id.clone(), request.key.clone()));
                false
            } else {
                true
            }
        });

        for (id, key) in &expired {
            self.in_flight.remove_if(key, |_, f| &f.id == id);
            debug!(id = %id, key = %key, "Discovery request expired");
        }

        expired.len()
    }

    /// Whether `id` is pending.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.requests.contains_key(id)
    }

    /// Number of pending requests, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether no request is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl Default for PendingRequestTable {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TTL)
    }
}
