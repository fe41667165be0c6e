//! # Munkey Discovery
//!
//! Peer activity on the local network:
//!
//! - `mdns`: service broadcast and browse over mDNS-SD
//! - `probe`: the `GET /link` identity probe
//! - `apl`: the Active Peer List, `(host, port)` → last probed identity
//! - `activity`: transitive peer discovery with cycle protection, and the
//!   browse-event consumer that attaches replication on discovery
//! - `monitor`: interface polling that drives re-announcement on IP change
//!
//! Service: `_http._tcp.local.` with subtype `munkey-http`. TXT records
//! carry a protocol validation flag and the node uuid; found services
//! missing the flag or echoing the local uuid are ignored.

pub mod activity;
pub mod apl;
pub mod mdns;
pub mod monitor;
pub mod probe;

pub use activity::PeerActivity;
pub use apl::ActivePeerList;
pub use mdns::MdnsService;
pub use monitor::{NetworkEvent, NetworkMonitor};
pub use probe::{HttpsLinkProbe, LinkProbe};

/// Base mDNS service type
pub const SERVICE_TYPE: &str = "_http._tcp.local.";

/// Subtyped service string used for both register and browse
pub const SERVICE_SUBTYPE: &str = "_munkey-http._sub._http._tcp.local.";

/// TXT key flagging a Munkey-speaking service
pub const TXT_VALIDATE_KEY: &str = "__mkey_proto_validate__";

/// Required value of the validation flag
pub const TXT_VALIDATE_VALUE: &str = "TRUE";

/// TXT key carrying the broadcasting node's uuid (lowercase)
pub const TXT_UUID_KEY: &str = "__mkey_proto_uuid__";
