//! # presence-protocol
//!
//! Stanza model and wire helpers for the presence hub.
//!
//! - **Jid** - `[node@]domain[/resource]` addresses
//! - **Element** - generic XML element tree for stanza payloads
//! - **Stanza** - presence and IQ stanzas
//! - **Caps** - XEP-0115 advertisements and XEP-0030 `disco#info` queries
//! - **Frame** / **codec** - MessagePack session framing
//!
//! ## Example
//!
//! ```rust
//! use presence_protocol::{caps, Jid};
//!
//! let hub = Jid::parse("jackal.im").unwrap();
//! let client = Jid::parse("ortuman@jackal.im/balcony").unwrap();
//! let iq = caps::disco_info_query("q1", hub, client, "http://code.google.com/p/exodus", "QgayPKawpkPSDYmwT/WM94uAlu0=");
//!
//! assert_eq!(
//!     iq.payload[0].to_string(),
//!     "<query xmlns=\"http://jabber.org/protocol/disco#info\" node=\"http://code.google.com/p/exodus#QgayPKawpkPSDYmwT/WM94uAlu0=\"/>"
//! );
//! ```

pub mod caps;
pub mod codec;
pub mod element;
pub mod frames;
pub mod jid;
pub mod stanza;
pub mod version;

pub use caps::{CapsAdvertisement, NS_CAPS, NS_DISCO_INFO};
pub use codec::{decode, encode, FrameReader, ProtocolError};
pub use element::Element;
pub use frames::{error_code, Frame, FrameType};
pub use jid::{Jid, JidError};
pub use stanza::{Iq, IqType, Presence, PresenceType, Show, Stanza};
pub use version::{Version, PROTOCOL_VERSION};
