//! Competency tiers and the station-to-tier mapping.
//!
//! Tiers form a fixed total order `DEL < GND < TWR < APP < CTR`. A controller
//! holding a tier may staff any station at or below it. Stations whose callsign
//! suffix is not one of the five tokens are unstaffable.

use serde::{Deserialize, Serialize};

use super::domain::StationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QualificationGroup {
    Del,
    Gnd,
    Twr,
    App,
    Ctr,
}

impl QualificationGroup {
    pub const fn ordered() -> [Self; 5] {
        [Self::Del, Self::Gnd, Self::Twr, Self::App, Self::Ctr]
    }

    pub const fn rank(self) -> u8 {
        match self {
            Self::Del => 0,
            Self::Gnd => 1,
            Self::Twr => 2,
            Self::App => 3,
            Self::Ctr => 4,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Del => "DEL",
            Self::Gnd => "GND",
            Self::Twr => "TWR",
            Self::App => "APP",
            Self::Ctr => "CTR",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ordered()
            .into_iter()
            .find(|group| group.label().eq_ignore_ascii_case(token.trim()))
    }
}

/// Tier required by a station, read from the last `_`/`-` separated token.
pub fn extract_group(station: &StationId) -> Option<QualificationGroup> {
    station
        .as_str()
        .rsplit(|c: char| c == '_' || c == '-')
        .next()
        .and_then(QualificationGroup::from_token)
}

/// `true` iff both tiers are known and the holder ranks at or above the requirement.
pub fn can_staff(held: Option<QualificationGroup>, required: Option<QualificationGroup>) -> bool {
    match (held, required) {
        (Some(held), Some(required)) => held.rank() >= required.rank(),
        _ => false,
    }
}

/// Lowest tier any of `stations` requires; unrecognized stations are ignored.
pub fn minimum_group<'a, I>(stations: I) -> Option<QualificationGroup>
where
    I: IntoIterator<Item = &'a StationId>,
{
    stations.into_iter().filter_map(extract_group).min()
}
