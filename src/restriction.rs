// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

/// Kind of a [turn restriction](https://wiki.openstreetmap.org/wiki/Turn_restriction).
///
/// `No*` kinds forbid a single from-via-to transition, while `Only*` kinds
/// forbid every transition from the same from-way except the one they name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestrictionKind {
    NoLeftTurn,
    NoRightTurn,
    NoUTurn,
    NoStraightOn,
    OnlyLeftTurn,
    OnlyRightTurn,
    OnlyStraightOn,
}

impl RestrictionKind {
    /// Parses the value of a `restriction` tag. Unsupported values
    /// (e.g. `no_entry` or `only_u_turn`) map to `None`.
    pub fn from_tag(value: &str) -> Option<Self> {
        match value {
            "no_left_turn" => Some(Self::NoLeftTurn),
            "no_right_turn" => Some(Self::NoRightTurn),
            "no_u_turn" => Some(Self::NoUTurn),
            "no_straight_on" => Some(Self::NoStraightOn),
            "only_left_turn" => Some(Self::OnlyLeftTurn),
            "only_right_turn" => Some(Self::OnlyRightTurn),
            "only_straight_on" => Some(Self::OnlyStraightOn),
            _ => None,
        }
    }

    /// Returns the OSM tag value corresponding to this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoLeftTurn => "no_left_turn",
            Self::NoRightTurn => "no_right_turn",
            Self::NoUTurn => "no_u_turn",
            Self::NoStraightOn => "no_straight_on",
            Self::OnlyLeftTurn => "only_left_turn",
            Self::OnlyRightTurn => "only_right_turn",
            Self::OnlyStraightOn => "only_straight_on",
        }
    }

    /// Whether this kind forbids the named transition.
    pub fn is_prohibitory(self) -> bool {
        matches!(
            self,
            Self::NoLeftTurn | Self::NoRightTurn | Self::NoUTurn | Self::NoStraightOn
        )
    }

    /// Whether this kind mandates the named transition.
    pub fn is_mandatory(self) -> bool {
        !self.is_prohibitory()
    }
}

impl std::fmt::Display for RestrictionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A turn restriction between two OSM ways meeting at a node.
///
/// `from_way` and `to_way` are OSM way ids, not graph references;
/// they are matched by value against [Edge::way_id](crate::Edge::way_id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnRestriction {
    pub from_way: i64,
    pub via_node: i64,
    pub to_way: i64,
    pub kind: RestrictionKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_tag() {
        assert_eq!(
            RestrictionKind::from_tag("no_left_turn"),
            Some(RestrictionKind::NoLeftTurn)
        );
        assert_eq!(
            RestrictionKind::from_tag("only_straight_on"),
            Some(RestrictionKind::OnlyStraightOn)
        );
        assert_eq!(RestrictionKind::from_tag("no_entry"), None);
        assert_eq!(RestrictionKind::from_tag("only_u_turn"), None);
        assert_eq!(RestrictionKind::from_tag(""), None);
    }

    #[test]
    fn tag_round_trip() {
        for kind in [
            RestrictionKind::NoLeftTurn,
            RestrictionKind::NoRightTurn,
            RestrictionKind::NoUTurn,
            RestrictionKind::NoStraightOn,
            RestrictionKind::OnlyLeftTurn,
            RestrictionKind::OnlyRightTurn,
            RestrictionKind::OnlyStraightOn,
        ] {
            assert_eq!(RestrictionKind::from_tag(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn prohibitory_vs_mandatory() {
        assert!(RestrictionKind::NoUTurn.is_prohibitory());
        assert!(!RestrictionKind::NoUTurn.is_mandatory());
        assert!(RestrictionKind::OnlyRightTurn.is_mandatory());
        assert!(!RestrictionKind::OnlyRightTurn.is_prohibitory());
    }
}
