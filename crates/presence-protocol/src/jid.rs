//! Addresses (JIDs) for presence-hub.
//!
//! A JID has the form `[node@]domain[/resource]`. The bare form (node and
//! domain) identifies an account; the full form adds the resource that
//! identifies a single connected session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum length of each JID part in bytes.
pub const MAX_PART_LENGTH: usize = 1023;

/// JID parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JidError {
    /// The domain part is missing or empty.
    #[error("JID has no domain")]
    MissingDomain,

    /// A present node or resource part is empty.
    #[error("JID contains an empty {0} part")]
    EmptyPart(&'static str),

    /// A part exceeds [`MAX_PART_LENGTH`].
    #[error("JID {0} part exceeds {MAX_PART_LENGTH} bytes")]
    PartTooLong(&'static str),
}

/// An XMPP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    node: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    /// Create a JID from its parts.
    ///
    /// # Errors
    ///
    /// Returns an error if a part is empty or too long.
    pub fn new(
        node: Option<&str>,
        domain: &str,
        resource: Option<&str>,
    ) -> Result<Self, JidError> {
        if domain.is_empty() {
            return Err(JidError::MissingDomain);
        }
        check_part("domain", domain)?;
        if let Some(node) = node {
            check_part("node", node)?;
        }
        if let Some(resource) = resource {
            check_part("resource", resource)?;
        }

        Ok(Self {
            node: node.map(str::to_string),
            domain: domain.to_ascii_lowercase(),
            resource: resource.map(str::to_string),
        })
    }

    /// Parse a JID from its string form.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid JID.
    pub fn parse(s: &str) -> Result<Self, JidError> {
        let (rest, resource) = match s.split_once('/') {
            Some((rest, resource)) => (rest, Some(resource)),
            None => (s, None),
        };
        let (node, domain) = match rest.split_once('@') {
            Some((node, domain)) => (Some(node), domain),
            None => (None, rest),
        };
        Self::new(node, domain, resource)
    }

    /// The node (local) part.
    #[must_use]
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    /// The domain part.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The resource part.
    #[must_use]
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// The same address without its resource.
    #[must_use]
    pub fn to_bare(&self) -> Jid {
        Self {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// Whether this JID has no resource.
    #[must_use]
    pub fn is_bare(&self) -> bool {
        self.resource.is_none()
    }

    /// Whether this JID names a user session (node and resource present).
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.node.is_some() && self.resource.is_some()
    }

    /// Whether this JID is a bare domain.
    #[must_use]
    pub fn is_server(&self) -> bool {
        self.node.is_none() && self.resource.is_none()
    }

    /// Whether both JIDs share node and domain, ignoring resources.
    #[must_use]
    pub fn matches_bare(&self, other: &Jid) -> bool {
        self.node == other.node && self.domain == other.domain
    }
}

fn check_part(name: &'static str, part: &str) -> Result<(), JidError> {
    if part.is_empty() {
        return Err(JidError::EmptyPart(name));
    }
    if part.len() > MAX_PART_LENGTH {
        return Err(JidError::PartTooLong(name));
    }
    Ok(())
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(node) = &self.node {
            write!(f, "{node}@")?;
        }
        f.write_str(&self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{resource}")?;
        }
        Ok(())
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Jid {
    type Error = JidError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> String {
        jid.to_string()
    }
}
