//! Routing signals carried by error replies
//!
//! The dispatcher switches on [`RedirectSignal`] instead of inspecting error
//! strings inline; anything that is not a routing signal is an ordinary
//! application error and is handed back to the caller untouched.

use crate::config::NodeAddress;
use crate::utils::RespValue;

/// Routing signal parsed from a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectSignal {
    /// Not a routing signal (success or application error)
    None,
    /// Slot permanently owned by `target`
    Moved { slot: u16, target: NodeAddress },
    /// One key of a migrating slot lives on `target`; retry there after ASKING
    Ask { slot: u16, target: NodeAddress },
    /// Multi-key operation hit a slot mid-migration
    TryAgain,
    /// Cluster cannot serve the slot right now
    ClusterDown,
}

impl RedirectSignal {
    /// Classify a reply
    pub fn classify(reply: &RespValue) -> Self {
        match reply.error_message() {
            Some(msg) => Self::parse(msg),
            None => RedirectSignal::None,
        }
    }

    /// Parse an error message such as `MOVED 3999 127.0.0.1:7001`
    pub fn parse(error_msg: &str) -> Self {
        let mut parts = error_msg.split_whitespace();
        let kind = parts.next();
        match kind {
            Some("MOVED") | Some("ASK") => {}
            Some("TRYAGAIN") => return RedirectSignal::TryAgain,
            Some("CLUSTERDOWN") => return RedirectSignal::ClusterDown,
            _ => return RedirectSignal::None,
        }

        let is_ask = kind == Some("ASK");
        let slot = parts.next().and_then(|s| s.parse::<u16>().ok());
        let target = parts.next().and_then(|a| a.parse::<NodeAddress>().ok());

        match (slot, target) {
            (Some(slot), Some(target)) if is_ask => RedirectSignal::Ask { slot, target },
            (Some(slot), Some(target)) => RedirectSignal::Moved { slot, target },
            // malformed redirect: treat as an application error
            _ => RedirectSignal::None,
        }
    }

    pub fn is_redirect(&self) -> bool {
        !matches!(self, RedirectSignal::None)
    }
}
