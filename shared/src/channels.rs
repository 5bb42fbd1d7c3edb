//! Pub/sub channel naming
//!
//! Channel names are `_`-joined segments:
//! ```text
//! ["rets_"] "board" "_" ("all" | <bid> ["." <drid>]) ["_" <36-char cid>] ["_*"]
//! ```
//! The `rets_` prefix marks return channels, the identifier segment addresses
//! one drone, a whole board or the entire fleet, and the correlation id (cid)
//! scopes a channel to a single outstanding call. Parsing a channel name
//! recovers exactly the identifier and cid that produced it.

use std::fmt;
use std::fmt::Write as _;

use uuid::Uuid;

/// Fixed topic word present in every channel name.
pub const TOPIC: &str = "board";

/// Prefix marking return channels.
pub const RETS_PREFIX: &str = "rets";

/// Identifier segment addressing the whole fleet.
pub const ALL_SEGMENT: &str = "all";

/// UUID-v4 textual form is always 36 characters.
const CID_LEN: usize = 36;

/// A board identifier with an optional drone identifier.
///
/// One board hosts up to four drones; a drone identifier is meaningless
/// without its board identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DroneId {
    pub bid: u32,
    pub drid: Option<u8>,
}

impl DroneId {
    /// Identifier for a whole board.
    pub fn board(bid: u32) -> Self {
        Self { bid, drid: None }
    }

    /// Identifier for one drone on a board.
    pub fn drone(bid: u32, drid: u8) -> Self {
        Self {
            bid,
            drid: Some(drid),
        }
    }

    /// Parse a `"bid"` or `"bid.drid"` identifier string.
    ///
    /// The board identifier must be a positive integer and the drone
    /// identifier, if present, must be in 1..=4. Malformed identifiers
    /// parse to `None` rather than erroring.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let bid = parse_segment::<u32>(parts.next()?)?;
        if bid == 0 {
            return None;
        }
        let drid = match parts.next() {
            Some(seg) => {
                let drid = parse_segment::<u8>(seg)?;
                if !(1..=4).contains(&drid) {
                    return None;
                }
                Some(drid)
            }
            None => None,
        };
        // a third dotted segment is a rejected malformed form
        if parts.next().is_some() {
            return None;
        }
        Some(Self { bid, drid })
    }
}

impl fmt::Display for DroneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.drid {
            Some(drid) => write!(f, "{}.{}", self.bid, drid),
            None => write!(f, "{}", self.bid),
        }
    }
}

/// Parse a numeric segment, rejecting anything but canonical plain digits.
///
/// Leading zeros are rejected so a parsed identifier always formats back
/// to the exact input.
fn parse_segment<T: std::str::FromStr>(seg: &str) -> Option<T> {
    if seg.is_empty() || !seg.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if seg.len() > 1 && seg.starts_with('0') {
        return None;
    }
    seg.parse().ok()
}

/// Identifier and correlation id recovered from a channel name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelParts {
    pub id: Option<DroneId>,
    pub cid: Option<String>,
}

/// Build a publish channel name.
///
/// With no identifier the channel addresses the whole fleet (`board_all`).
/// A correlation id, if given, is appended as the final segment. Return
/// channels carry the `rets_` prefix.
pub fn publish_channel(id: Option<DroneId>, cid: Option<&str>, ret: bool) -> String {
    let mut chan = String::from(TOPIC);

    match id {
        Some(id) => {
            let _ = write!(chan, "_{id}");
        }
        None => {
            let _ = write!(chan, "_{ALL_SEGMENT}");
        }
    }

    if let Some(cid) = cid {
        let _ = write!(chan, "_{cid}");
    }

    if ret {
        chan = format!("{RETS_PREFIX}_{chan}");
    }

    chan
}

/// Build a subscribe pattern for the given identifier scope.
///
/// With `wildcard` the pattern catches every correlation-scoped child of
/// that scope, e.g. `board_1_*` catches commands to any drone on board 1.
pub fn subscribe_channel(id: Option<DroneId>, ret: bool, wildcard: bool) -> String {
    let mut chan = publish_channel(id, None, ret);
    if wildcard {
        chan.push_str("_*");
    }
    chan
}

/// Recover the identifier and correlation id from a channel name.
pub fn parse_channel(chan: &str) -> ChannelParts {
    // strip a trailing wildcard marker if present
    let chan = chan.trim_end_matches('*');

    let mut words: Vec<&str> = chan.split('_').collect();

    if words.first() == Some(&RETS_PREFIX) {
        words.remove(0);
    }

    let cid = match words.last() {
        Some(last) if last.len() == CID_LEN => words.pop().map(str::to_string),
        _ => None,
    };

    // words[0] is the fixed topic word; the identifier segment follows
    let id = words.get(1).and_then(|seg| {
        if *seg == ALL_SEGMENT {
            None
        } else {
            DroneId::parse(seg)
        }
    });

    ChannelParts { id, cid }
}

/// All patterns an agent subscribes to for its identifier.
///
/// Covers commands addressed to the drone individually, to its whole board
/// and to the entire fleet, with duplicates removed.
pub fn subscription_set(id: DroneId) -> Vec<String> {
    let candidates = [
        subscribe_channel(Some(id), false, true),
        subscribe_channel(Some(DroneId::board(id.bid)), false, true),
        subscribe_channel(None, false, true),
    ];

    let mut chans = Vec::new();
    for chan in candidates {
        if !chans.contains(&chan) {
            chans.push(chan);
        }
    }
    chans
}

/// Publish and subscribe channel names for one identifier scope.
///
/// Minted channels carry a fresh correlation id; channels recovered from an
/// inbound name carry whatever id/cid that name encodes, which is how an
/// agent re-derives the return channel for a received command.
#[derive(Debug, Clone)]
pub struct ComChannel {
    pub id: Option<DroneId>,
    pub cid: Option<String>,
    /// Command channel, correlation-scoped.
    pub publish: String,
    /// Return channel, correlation-scoped.
    pub publish_ret: String,
    /// Wildcard command pattern over the identifier scope.
    pub subscribe: String,
    /// Wildcard return pattern over the identifier scope.
    pub subscribe_ret: String,
}

impl ComChannel {
    /// Mint channels for a new call, with a fresh correlation id.
    pub fn new(id: Option<DroneId>) -> Self {
        Self::build(id, Some(Uuid::new_v4().to_string()))
    }

    /// Rebuild channels from an existing channel name.
    pub fn from_channel(chan: &str) -> Self {
        let parts = parse_channel(chan);
        Self::build(parts.id, parts.cid)
    }

    fn build(id: Option<DroneId>, cid: Option<String>) -> Self {
        Self {
            publish: publish_channel(id, cid.as_deref(), false),
            publish_ret: publish_channel(id, cid.as_deref(), true),
            subscribe: subscribe_channel(id, false, true),
            subscribe_ret: subscribe_channel(id, true, true),
            id,
            cid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::pattern_matches;

    const CID: &str = "16fd2706-8baf-433b-82eb-8c7fada847da";

    #[test]
    fn test_identifier_parse() {
        assert_eq!(DroneId::parse("12.3"), Some(DroneId::drone(12, 3)));
        assert_eq!(DroneId::parse("12"), Some(DroneId::board(12)));
        assert_eq!(DroneId::parse("abc"), None);
        assert_eq!(DroneId::parse("12.3.4"), None);
        assert_eq!(DroneId::parse("0"), None);
        assert_eq!(DroneId::parse("1.5"), None);
        assert_eq!(DroneId::parse("1.0"), None);
        assert_eq!(DroneId::parse(""), None);
        assert_eq!(DroneId::parse("+3"), None);
    }

    #[test]
    fn test_identifier_rejects_leading_zeros() {
        // "012" would display back as "12", breaking the round-trip
        assert_eq!(DroneId::parse("012"), None);
        assert_eq!(DroneId::parse("1.01"), None);
        assert_eq!(DroneId::parse("00"), None);
        // a single zero digit is canonical, just out of range
        assert_eq!(DroneId::parse("0"), None);
        assert_eq!(DroneId::parse("10"), Some(DroneId::board(10)));
    }

    #[test]
    fn test_identifier_display_roundtrip() {
        for s in ["1", "3.2", "100", "10.4"] {
            let id = DroneId::parse(s).expect("valid id");
            assert_eq!(id.to_string(), s);
        }
    }

    #[test]
    fn test_channel_roundtrip() {
        let ids = [None, Some(DroneId::board(3)), Some(DroneId::drone(3, 2))];
        let cids = [None, Some(CID)];

        for id in ids {
            for cid in cids {
                for ret in [false, true] {
                    let chan = publish_channel(id, cid, ret);
                    let parts = parse_channel(&chan);
                    assert_eq!(parts.id, id, "channel {chan}");
                    assert_eq!(parts.cid.as_deref(), cid, "channel {chan}");
                }
            }
        }
    }

    #[test]
    fn test_channel_shapes() {
        assert_eq!(publish_channel(None, None, false), "board_all");
        assert_eq!(
            publish_channel(Some(DroneId::drone(1, 1)), None, true),
            "rets_board_1.1"
        );
        assert_eq!(
            publish_channel(None, Some(CID), false),
            format!("board_all_{CID}")
        );
        assert_eq!(subscribe_channel(Some(DroneId::board(2)), false, true), "board_2_*");
        assert_eq!(subscribe_channel(None, true, false), "rets_board_all");
    }

    #[test]
    fn test_parse_channel_wildcard_suffix() {
        let parts = parse_channel("board_1.2_*");
        assert_eq!(parts.id, Some(DroneId::drone(1, 2)));
        assert_eq!(parts.cid, None);
    }

    #[test]
    fn test_subscription_set_covers_scopes() {
        let chans = subscription_set(DroneId::drone(3, 2));
        assert_eq!(chans, vec!["board_3.2_*", "board_3_*", "board_all_*"]);

        // a message for (3,2) matches at least one pattern
        let own = publish_channel(Some(DroneId::drone(3, 2)), Some(CID), false);
        assert!(chans.iter().any(|p| pattern_matches(p, &own)));

        // a message for a different board matches only the global pattern
        let other = publish_channel(Some(DroneId::drone(4, 2)), Some(CID), false);
        let matching: Vec<_> = chans
            .iter()
            .filter(|p| pattern_matches(p, &other))
            .collect();
        assert!(matching.is_empty());

        let broadcast = publish_channel(None, Some(CID), false);
        let matching: Vec<_> = chans
            .iter()
            .filter(|p| pattern_matches(p, &broadcast))
            .collect();
        assert_eq!(matching, vec!["board_all_*"]);
    }

    #[test]
    fn test_board_scope_does_not_catch_sibling_boards() {
        // board_1_* must not match channels for boards 10, 11, ...
        let pattern = subscribe_channel(Some(DroneId::board(1)), false, true);
        let board_10 = publish_channel(Some(DroneId::board(10)), Some(CID), false);
        assert!(!pattern_matches(&pattern, &board_10));
    }

    #[test]
    fn test_com_channel_mint() {
        let chan = ComChannel::new(Some(DroneId::drone(1, 1)));
        let cid = chan.cid.as_deref().expect("minted cid");
        assert_eq!(cid.len(), 36);
        assert_eq!(chan.publish, format!("board_1.1_{cid}"));
        assert_eq!(chan.publish_ret, format!("rets_board_1.1_{cid}"));
        assert_eq!(chan.subscribe, "board_1.1_*");
        assert_eq!(chan.subscribe_ret, "rets_board_1.1_*");
    }

    #[test]
    fn test_com_channel_recover() {
        let minted = ComChannel::new(None);
        let recovered = ComChannel::from_channel(&minted.publish);
        assert_eq!(recovered.id, None);
        assert_eq!(recovered.cid, minted.cid);
        assert_eq!(recovered.publish_ret, minted.publish_ret);
    }
}
