//! Presence and IQ stanzas.

use crate::caps::{CapsAdvertisement, NS_CAPS};
use crate::element::Element;
use crate::jid::Jid;
use serde::{Deserialize, Serialize};

/// Presence availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceType {
    /// No `type` attribute on the wire.
    #[default]
    Available,
    Unavailable,
}

/// Availability sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Show {
    Away,
    Chat,
    Dnd,
    Xa,
}

/// A presence stanza.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// Sender address.
    pub from: Jid,
    /// Recipient address.
    pub to: Jid,
    /// Optional stanza id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Availability.
    #[serde(default, rename = "type")]
    pub presence_type: PresenceType,
    /// Availability sub-state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show: Option<Show>,
    /// Free-form status text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Resource priority.
    #[serde(default)]
    pub priority: i8,
    /// Extension elements (e.g. the capabilities advertisement).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<Element>,
}

impl Presence {
    /// Create a presence stanza of the given type.
    #[must_use]
    pub fn new(from: Jid, to: Jid, presence_type: PresenceType) -> Self {
        Self {
            from,
            to,
            id: None,
            presence_type,
            show: None,
            status: None,
            priority: 0,
            payload: Vec::new(),
        }
    }

    /// Create an available presence.
    #[must_use]
    pub fn available(from: Jid, to: Jid) -> Self {
        Self::new(from, to, PresenceType::Available)
    }

    /// Create an unavailable presence.
    #[must_use]
    pub fn unavailable(from: Jid, to: Jid) -> Self {
        Self::new(from, to, PresenceType::Unavailable)
    }

    /// Set the show value.
    #[must_use]
    pub fn with_show(mut self, show: Show) -> Self {
        self.show = Some(show);
        self
    }

    /// Set the status text.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i8) -> Self {
        self.priority = priority;
        self
    }

    /// Append an extension element.
    #[must_use]
    pub fn with_element(mut self, element: Element) -> Self {
        self.payload.push(element);
        self
    }

    /// Whether the presence announces availability.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.presence_type == PresenceType::Available
    }

    /// The entity capabilities advertisement, if one is present and complete.
    ///
    /// Returns `None` when the `c` element is missing or any of its `hash`,
    /// `node` or `ver` attributes is absent or empty.
    #[must_use]
    pub fn capabilities(&self) -> Option<CapsAdvertisement> {
        let c = self
            .payload
            .iter()
            .find(|e| e.name == "c" && e.is_namespace(NS_CAPS))?;

        let attr = |name: &str| c.attr(name).filter(|v| !v.is_empty()).map(str::to_string);

        Some(CapsAdvertisement {
            hash: attr("hash")?,
            node: attr("node")?,
            ver: attr("ver")?,
        })
    }
}

/// IQ type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IqType {
    Get,
    Set,
    Result,
    Error,
}

/// An info/query stanza.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iq {
    /// Correlation id.
    pub id: String,
    /// Request or response type.
    #[serde(rename = "type")]
    pub iq_type: IqType,
    /// Sender address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Jid>,
    /// Recipient address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Jid>,
    /// Child elements (query or error).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<Element>,
}

impl Iq {
    /// Create an IQ with no addressing.
    #[must_use]
    pub fn new(id: impl Into<String>, iq_type: IqType) -> Self {
        Self {
            id: id.into(),
            iq_type,
            from: None,
            to: None,
            payload: Vec::new(),
        }
    }

    /// Set the sender.
    #[must_use]
    pub fn with_from(mut self, from: Jid) -> Self {
        self.from = Some(from);
        self
    }

    /// Set the recipient.
    #[must_use]
    pub fn with_to(mut self, to: Jid) -> Self {
        self.to = Some(to);
        self
    }

    /// Append a child element.
    #[must_use]
    pub fn with_element(mut self, element: Element) -> Self {
        self.payload.push(element);
        self
    }

    /// Whether this IQ answers a request.
    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(self.iq_type, IqType::Result | IqType::Error)
    }

    /// Whether this IQ reports a failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.iq_type == IqType::Error
    }

    /// First payload element with the given name and namespace.
    #[must_use]
    pub fn element(&self, name: &str, namespace: &str) -> Option<&Element> {
        self.payload
            .iter()
            .find(|e| e.name == name && e.is_namespace(namespace))
    }
}

/// Any routable stanza.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Stanza {
    Presence(Presence),
    Iq(Iq),
}

impl Stanza {
    /// Sender address.
    #[must_use]
    pub fn from(&self) -> Option<&Jid> {
        match self {
            Stanza::Presence(p) => Some(&p.from),
            Stanza::Iq(iq) => iq.from.as_ref(),
        }
    }

    /// Recipient address.
    #[must_use]
    pub fn to(&self) -> Option<&Jid> {
        match self {
            Stanza::Presence(p) => Some(&p.to),
            Stanza::Iq(iq) => iq.to.as_ref(),
        }
    }

    /// Stanza id.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Stanza::Presence(p) => p.id.as_deref(),
            Stanza::Iq(iq) => Some(&iq.id),
        }
    }
}

impl From<Presence> for Stanza {
    fn from(p: Presence) -> Self {
        Stanza::Presence(p)
    }
}

impl From<Iq> for Stanza {
    fn from(iq: Iq) -> Self {
        Stanza::Iq(iq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jid(s: &str) -> Jid {
        Jid::parse(s).unwrap()
    }

    fn caps(hash: &str, node: &str, ver: &str) -> Element {
        Element::new("c")
            .with_namespace(NS_CAPS)
            .with_attr("hash", hash)
            .with_attr("node", node)
            .with_attr("ver", ver)
    }

    #[test]
    fn test_presence_capabilities() {
        let j = jid("noelia@jackal.im/balcony");
        let p = Presence::available(j.clone(), j).with_element(caps(
            "sha-1",
            "http://code.google.com/p/exodus",
            "QgayPKawpkPSDYmwT/WM94uAlu0=",
        ));

        let adv = p.capabilities().unwrap();
        assert_eq!(adv.hash, "sha-1");
        assert_eq!(adv.node, "http://code.google.com/p/exodus");
        assert_eq!(adv.ver, "QgayPKawpkPSDYmwT/WM94uAlu0=");
    }

    #[test]
    fn test_incomplete_capabilities_are_ignored() {
        let j = jid("noelia@jackal.im/balcony");

        let missing_ver = Presence::available(j.clone(), j.clone()).with_element(
            Element::new("c")
                .with_namespace(NS_CAPS)
                .with_attr("hash", "sha-1")
                .with_attr("node", "n"),
        );
        assert!(missing_ver.capabilities().is_none());

        let empty_hash = Presence::available(j.clone(), j.clone()).with_element(caps("", "n", "v"));
        assert!(empty_hash.capabilities().is_none());

        let wrong_ns = Presence::available(j.clone(), j).with_element(
            Element::new("c")
                .with_attr("hash", "sha-1")
                .with_attr("node", "n")
                .with_attr("ver", "v"),
        );
        assert!(wrong_ns.capabilities().is_none());
    }

    #[test]
    fn test_iq_response_kinds() {
        assert!(Iq::new("1", IqType::Result).is_response());
        assert!(Iq::new("1", IqType::Error).is_error());
        assert!(!Iq::new("1", IqType::Get).is_response());
    }

    #[test]
    fn test_stanza_accessors() {
        let from = jid("ortuman@jackal.im/balcony");
        let stanza: Stanza = Iq::new("abc", IqType::Get)
            .with_from(from.clone())
            .with_to(jid("jackal.im"))
            .into();

        assert_eq!(stanza.from(), Some(&from));
        assert_eq!(stanza.to().map(Jid::domain), Some("jackal.im"));
        assert_eq!(stanza.id(), Some("abc"));
    }
}
