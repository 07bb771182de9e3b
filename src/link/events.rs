//! Link events
//!
//! Platform back-ends translate whatever they observe (command results,
//! `iw event` lines, operstate changes) into [`LinkEvent`]s. The state
//! machine is the only consumer.

use std::net::IpAddr;

use crate::wireless::MacAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    InterfaceUp,
    InterfaceDown,
    /// Station associated with the access point
    Associated,
    /// Association attempt rejected or failed
    AssociationFailed { reason: u16 },
    /// Outcome of the numbered attempt started by `LinkControl::connect`
    AttemptResult { attempt: u32, associated: bool, reason: u16 },
    Disconnected { reason: u16 },
    /// Network address acquired on the station interface
    AddressBound { addr: IpAddr },
    /// A station joined our access point
    PeerJoined(MacAddr),
    PeerLeft(MacAddr),
}

/// Parse one line of `iw event` output.
///
/// Lines look like `wlan0 (phy #0): new station 11:22:33:44:55:66`.
/// Lines for other interfaces and unknown events yield `None`.
pub fn parse_iw_event(line: &str, interface: &str) -> Option<LinkEvent> {
    let (dev, rest) = line.split_once(':')?;
    let dev = dev.split_whitespace().next()?;
    if dev != interface {
        return None;
    }
    let rest = rest.trim();

    if let Some(mac) = rest.strip_prefix("new station ") {
        return mac.trim().parse().ok().map(LinkEvent::PeerJoined);
    }
    if let Some(mac) = rest.strip_prefix("del station ") {
        return mac.trim().parse().ok().map(LinkEvent::PeerLeft);
    }
    if rest.starts_with("connected to ") {
        return Some(LinkEvent::Associated);
    }
    if rest.starts_with("disconnected") {
        return Some(LinkEvent::Disconnected {
            reason: field_code(rest, "reason:").unwrap_or(0),
        });
    }
    if rest.starts_with("failed to connect") {
        return Some(LinkEvent::AssociationFailed {
            reason: field_code(rest, "status:").unwrap_or(1),
        });
    }
    None
}

// `... reason: 3: Deauthenticated because ...` -> 3
fn field_code(text: &str, key: &str) -> Option<u16> {
    let (_, after) = text.split_once(key)?;
    after
        .trim_start()
        .split(|c: char| !c.is_ascii_digit())
        .next()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_events() {
        let mac: MacAddr = "11:22:33:44:55:66".parse().unwrap();
        assert_eq!(
            parse_iw_event("wlan0 (phy #0): new station 11:22:33:44:55:66", "wlan0"),
            Some(LinkEvent::PeerJoined(mac))
        );
        assert_eq!(
            parse_iw_event("wlan0 (phy #0): del station 11:22:33:44:55:66", "wlan0"),
            Some(LinkEvent::PeerLeft(mac))
        );
        assert_eq!(parse_iw_event("wlan1 (phy #1): new station 11:22:33:44:55:66", "wlan0"), None);
    }

    #[test]
    fn test_connection_events() {
        assert_eq!(
            parse_iw_event("wlan0 (phy #0): connected to a0:69:60:e3:52:15", "wlan0"),
            Some(LinkEvent::Associated)
        );
        assert_eq!(
            parse_iw_event(
                "wlan0 (phy #0): disconnected (by AP) reason: 3: Deauthenticated because sending STA is leaving",
                "wlan0"
            ),
            Some(LinkEvent::Disconnected { reason: 3 })
        );
        assert_eq!(
            parse_iw_event(
                "wlan0 (phy #0): failed to connect to a0:69:60:e3:52:15, status: 17: AP unable",
                "wlan0"
            ),
            Some(LinkEvent::AssociationFailed { reason: 17 })
        );
        assert_eq!(parse_iw_event("wlan0 (phy #0): scan started", "wlan0"), None);
        assert_eq!(parse_iw_event("garbage", "wlan0"), None);
    }
}
