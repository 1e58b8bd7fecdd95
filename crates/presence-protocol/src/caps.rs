//! Entity capabilities (XEP-0115) and service discovery info (XEP-0030).
//!
//! A presence stanza may carry `<c xmlns='http://jabber.org/protocol/caps'
//! hash='..' node='..' ver='..'/>`. The feature list behind `node#ver` is
//! resolved with a `disco#info` query sent to the advertising resource.

use crate::element::Element;
use crate::jid::Jid;
use crate::stanza::{Iq, IqType};
use serde::{Deserialize, Serialize};

/// Entity capabilities namespace.
pub const NS_CAPS: &str = "http://jabber.org/protocol/caps";

/// Service discovery info namespace.
pub const NS_DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";

/// A capabilities advertisement taken from a presence stanza.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapsAdvertisement {
    /// Hash algorithm (e.g. `sha-1`).
    pub hash: String,
    /// Application node URI.
    pub node: String,
    /// Verification string.
    pub ver: String,
}

impl CapsAdvertisement {
    /// Create an advertisement.
    #[must_use]
    pub fn new(hash: impl Into<String>, node: impl Into<String>, ver: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            node: node.into(),
            ver: ver.into(),
        }
    }

    /// The `node#ver` string used in discovery queries.
    #[must_use]
    pub fn query_node(&self) -> String {
        query_node(&self.node, &self.ver)
    }

    /// Build the `c` element for a presence stanza.
    #[must_use]
    pub fn caps_element(&self) -> Element {
        Element::new("c")
            .with_namespace(NS_CAPS)
            .with_attr("hash", &self.hash)
            .with_attr("node", &self.node)
            .with_attr("ver", &self.ver)
    }
}

/// Join a node and verification string as `node#ver`.
#[must_use]
pub fn query_node(node: &str, ver: &str) -> String {
    format!("{node}#{ver}")
}

/// Build a `disco#info` IQ-get for `node#ver`.
#[must_use]
pub fn disco_info_query(id: impl Into<String>, from: Jid, to: Jid, node: &str, ver: &str) -> Iq {
    Iq::new(id, IqType::Get)
        .with_from(from)
        .with_to(to)
        .with_element(
            Element::new("query")
                .with_namespace(NS_DISCO_INFO)
                .with_attr("node", query_node(node, ver)),
        )
}

/// Build a `disco#info` IQ-result listing `features`.
#[must_use]
pub fn disco_info_result<I, S>(id: impl Into<String>, from: Jid, to: Jid, node: &str, features: I) -> Iq
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let query = features.into_iter().fold(
        Element::new("query")
            .with_namespace(NS_DISCO_INFO)
            .with_attr("node", node),
        |q, var| q.with_child(Element::new("feature").with_attr("var", var)),
    );

    Iq::new(id, IqType::Result)
        .with_from(from)
        .with_to(to)
        .with_element(query)
}

/// Collect the features of a `disco#info` response.
///
/// Returns `None` if the IQ has no `disco#info` query. Features are
/// returned in document order; `feature` children without a `var` are
/// skipped.
#[must_use]
pub fn disco_info_features(iq: &Iq) -> Option<Vec<String>> {
    let query = iq.element("query", NS_DISCO_INFO)?;
    Some(
        query
            .children_named("feature")
            .filter_map(|f| f.attr("var"))
            .map(str::to_string)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: &str = "http://code.google.com/p/exodus";
    const VER: &str = "QgayPKawpkPSDYmwT/WM94uAlu0=";

    fn jid(s: &str) -> Jid {
        Jid::parse(s).unwrap()
    }

    #[test]
    fn test_disco_info_query_shape() {
        let iq = disco_info_query("q1", jid("jackal.im"), jid("ortuman@jackal.im/balcony"), NODE, VER);

        assert_eq!(iq.iq_type, IqType::Get);
        assert_eq!(iq.from.as_ref().map(Jid::to_string).as_deref(), Some("jackal.im"));

        let query = iq.element("query", NS_DISCO_INFO).unwrap();
        assert_eq!(query.attr("node"), Some(format!("{NODE}#{VER}").as_str()));
        assert!(query.children.is_empty());
    }

    #[test]
    fn test_features_in_document_order() {
        let iq = disco_info_result(
            "q1",
            jid("ortuman@jackal.im/balcony"),
            jid("jackal.im"),
            &query_node(NODE, VER),
            ["urn:xmpp:ping", "cool+feature", "http://jabber.org/protocol/caps"],
        );

        assert_eq!(
            disco_info_features(&iq).unwrap(),
            vec!["urn:xmpp:ping", "cool+feature", "http://jabber.org/protocol/caps"]
        );
    }

    #[test]
    fn test_features_skip_missing_var() {
        let iq = Iq::new("q1", IqType::Result).with_element(
            Element::new("query")
                .with_namespace(NS_DISCO_INFO)
                .with_child(Element::new("identity").with_attr("category", "client"))
                .with_child(Element::new("feature"))
                .with_child(Element::new("feature").with_attr("var", "cool+feature")),
        );

        assert_eq!(disco_info_features(&iq).unwrap(), vec!["cool+feature"]);
    }

    #[test]
    fn test_missing_query() {
        let iq = Iq::new("q1", IqType::Result)
            .with_element(Element::new("query").with_namespace("jabber:iq:roster"));
        assert!(disco_info_features(&iq).is_none());
    }

    #[test]
    fn test_caps_element() {
        let adv = CapsAdvertisement::new("sha-1", NODE, VER);
        let el = adv.caps_element();
        assert!(el.is_namespace(NS_CAPS));
        assert_eq!(el.attr("ver"), Some(VER));
        assert_eq!(adv.query_node(), format!("{NODE}#{VER}"));
    }
}
