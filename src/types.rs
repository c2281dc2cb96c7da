// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Core identifiers shared across every component.

use std::fmt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorKind};

/// MQTT delivery guarantee. `spec.md` §3 restricts this to 0, 1 or 2.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Effective delivery qos for a (publish, subscription) pair: the min of
    /// the two, per `spec.md` §4.6.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        if self.as_u8() <= other.as_u8() {
            self
        } else {
            other
        }
    }
}

/// Unique client identifier as presented in CONNECT.
pub type ClientId = String;

/// Stable identifier of one cluster node (process).
pub type NodeId = String;

/// Time-ordered, globally unique id for a `BrokerMessage`. `spec.md` §3
/// requires 36 characters and monotonic non-decreasing generation on one
/// node; UUIDv7 embeds a millisecond timestamp in its high bits so
/// lexicographic/numeric ordering of freshly generated values agrees with
/// generation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageUuid(Uuid);

impl MessageUuid {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for MessageUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MessageUuid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|err| Error::new(ErrorKind::ConfigError, format!("invalid message uuid: {err}")))
    }
}

/// Per-session 16-bit packet identifier, reused across the PUBLISH/PUBACK/
/// PUBREC/PUBREL/PUBCOMP handshake.
pub type PacketId = u16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_min_picks_the_lower_value() {
        assert_eq!(QoS::AtMostOnce.min(QoS::ExactlyOnce), QoS::AtMostOnce);
        assert_eq!(QoS::AtLeastOnce.min(QoS::ExactlyOnce), QoS::AtLeastOnce);
        assert_eq!(QoS::ExactlyOnce.min(QoS::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[test]
    fn message_uuid_roundtrips_through_display() {
        let uuid = MessageUuid::generate();
        let text = uuid.to_string();
        assert_eq!(text.len(), 36);
        let parsed: MessageUuid = text.parse().unwrap();
        assert_eq!(parsed, uuid);
    }

    #[test]
    fn successive_generated_uuids_are_non_decreasing() {
        let a = MessageUuid::generate();
        let b = MessageUuid::generate();
        assert!(a <= b);
    }
}
