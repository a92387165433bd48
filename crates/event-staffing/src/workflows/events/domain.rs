use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::qualification::QualificationGroup;

/// Identifier wrapper for recurring patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(pub u64);

/// Identifier wrapper for concrete dated occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OccurrenceId(pub u64);

/// Controller (volunteer) identifier as issued by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControllerId(pub u64);

/// Business-unit code that owns patterns and permissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeCode(pub String);

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for OccurrenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ScopeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A callsign-style station identifier such as `EDDF_N_APP`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(pub String);

impl StationId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Either a JSON list or a legacy comma separated string, accepted at the storage boundary.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawList {
    Items(Vec<String>),
    Joined(String),
}

impl RawList {
    fn into_tokens(self) -> Vec<String> {
        match self {
            RawList::Items(items) => items,
            RawList::Joined(joined) => joined
                .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Ordered, duplicate free list of stations a pattern staffs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StationList(Vec<StationId>);

impl StationList {
    pub fn new<I, S>(stations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list: Vec<StationId> = Vec::new();
        for raw in stations {
            if raw.as_ref().trim().is_empty() {
                continue;
            }
            let station = StationId::new(raw);
            if !list.contains(&station) {
                list.push(station);
            }
        }
        Self(list)
    }

    /// Parse the comma separated form stored by older exports.
    pub fn parse(joined: &str) -> Self {
        Self::new(RawList::Joined(joined.to_string()).into_tokens())
    }

    pub fn iter(&self) -> impl Iterator<Item = &StationId> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, station: &StationId) -> bool {
        self.0.contains(station)
    }

    pub fn as_slice(&self) -> &[StationId] {
        &self.0
    }
}

impl<'de> Deserialize<'de> for StationList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        RawList::deserialize(deserializer).map(|raw| Self::new(raw.into_tokens()))
    }
}

/// ICAO airport codes attached to a pattern, normalized to upper case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AirportList(Vec<String>);

impl AirportList {
    pub fn new<I, S>(airports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list: Vec<String> = Vec::new();
        for raw in airports {
            let code = raw.as_ref().trim().to_ascii_uppercase();
            if !code.is_empty() && !list.contains(&code) {
                list.push(code);
            }
        }
        Self(list)
    }

    pub fn primary(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl<'de> Deserialize<'de> for AirportList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        RawList::deserialize(deserializer).map(|raw| Self::new(raw.into_tokens()))
    }
}

/// Stored signup override for an occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignupStatus {
    #[default]
    Auto,
    Open,
    Closed,
}

impl SignupStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Auto => "Automatic",
            Self::Open => "Open",
            Self::Closed => "Closed",
        }
    }
}

/// Recurring schedule definition owned by scope administrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub scope: ScopeCode,
    pub name: String,
    /// 0 = Monday through 6 = Sunday.
    pub weekday: u8,
    pub weeks_on: u32,
    #[serde(default)]
    pub weeks_off: u32,
    pub start_date: NaiveDate,
    #[serde(default = "default_start_time")]
    pub start_time: NaiveTime,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub requires_roster: bool,
    #[serde(default)]
    pub staffed_stations: StationList,
    #[serde(default)]
    pub airports: AirportList,
    #[serde(default)]
    pub signup_deadline_hours: u32,
}

/// Upper bound for each of `weeks_on` and `weeks_off`.
pub const MAX_CYCLE_WEEKS: u32 = 52;

/// Upper bound for `signup_deadline_hours` (90 days).
pub const MAX_SIGNUP_DEADLINE_HOURS: u32 = 90 * 24;

fn default_start_time() -> NaiveTime {
    NaiveTime::MIN
}

fn default_enabled() -> bool {
    true
}

impl Pattern {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingName);
        }
        if self.weekday > 6 {
            return Err(ValidationError::InvalidWeekday(self.weekday));
        }
        if self.weeks_on < 1 {
            return Err(ValidationError::WeeksOnBelowOne);
        }
        if self.weeks_on > MAX_CYCLE_WEEKS || self.weeks_off > MAX_CYCLE_WEEKS {
            return Err(ValidationError::CycleOutOfRange {
                weeks_on: self.weeks_on,
                weeks_off: self.weeks_off,
            });
        }
        if self.signup_deadline_hours > MAX_SIGNUP_DEADLINE_HOURS {
            return Err(ValidationError::DeadlineOutOfRange(
                self.signup_deadline_hours,
            ));
        }
        Ok(())
    }

    /// Validated chrono weekday.
    pub fn chrono_weekday(&self) -> Result<Weekday, ValidationError> {
        weekday_from_index(self.weekday)
    }

    pub fn cycle_length(&self) -> u64 {
        u64::from(self.weeks_on) + u64::from(self.weeks_off)
    }

    /// Whether the change from `self` to `next` alters which dates are generated.
    pub fn shape_differs(&self, next: &Pattern) -> bool {
        self.weekday != next.weekday
            || self.weeks_on != next.weeks_on
            || self.weeks_off != next.weeks_off
            || self.start_date != next.start_date
    }

    /// Whether the change alters the computed start instant or deadline.
    pub fn timing_differs(&self, next: &Pattern) -> bool {
        self.start_time != next.start_time
            || self.signup_deadline_hours != next.signup_deadline_hours
    }

    pub fn starts_at(&self, date: NaiveDate) -> DateTime<Utc> {
        date.and_time(self.start_time).and_utc()
    }

    /// `Ok(None)` when the pattern has no deadline configured.
    pub fn signup_deadline(
        &self,
        date: NaiveDate,
    ) -> Result<Option<DateTime<Utc>>, ValidationError> {
        if self.signup_deadline_hours == 0 {
            return Ok(None);
        }
        self.starts_at(date)
            .checked_sub_signed(Duration::hours(i64::from(self.signup_deadline_hours)))
            .map(Some)
            .ok_or(ValidationError::DeadlineOutOfRange(
                self.signup_deadline_hours,
            ))
    }

    pub fn occurrence_on(&self, date: NaiveDate) -> Result<NewOccurrence, ValidationError> {
        Ok(NewOccurrence {
            pattern_id: self.id,
            date,
            starts_at: self.starts_at(date),
            signup_deadline: self.signup_deadline(date)?,
        })
    }
}

pub(crate) fn weekday_from_index(index: u8) -> Result<Weekday, ValidationError> {
    match index {
        0 => Ok(Weekday::Mon),
        1 => Ok(Weekday::Tue),
        2 => Ok(Weekday::Wed),
        3 => Ok(Weekday::Thu),
        4 => Ok(Weekday::Fri),
        5 => Ok(Weekday::Sat),
        6 => Ok(Weekday::Sun),
        other => Err(ValidationError::InvalidWeekday(other)),
    }
}

/// Occurrence data prior to the store assigning an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOccurrence {
    pub pattern_id: PatternId,
    pub date: NaiveDate,
    pub starts_at: DateTime<Utc>,
    pub signup_deadline: Option<DateTime<Utc>>,
}

/// One concrete dated instance of a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: OccurrenceId,
    pub pattern_id: PatternId,
    pub date: NaiveDate,
    pub starts_at: DateTime<Utc>,
    pub signup_deadline: Option<DateTime<Utc>>,
    pub signup_status: SignupStatus,
    pub roster_published: bool,
    pub roster_published_at: Option<DateTime<Utc>>,
}

impl Occurrence {
    pub fn from_new(id: OccurrenceId, new: NewOccurrence) -> Self {
        Self {
            id,
            pattern_id: new.pattern_id,
            date: new.date,
            starts_at: new.starts_at,
            signup_deadline: new.signup_deadline,
            signup_status: SignupStatus::Auto,
            roster_published: false,
            roster_published_at: None,
        }
    }

    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.signup_deadline.is_some_and(|deadline| now >= deadline)
    }

    pub fn date_weekday(&self) -> Weekday {
        self.date.weekday()
    }
}

/// A controller's registration for one occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signup {
    pub occurrence_id: OccurrenceId,
    pub controller_id: ControllerId,
    pub qualification_group: Option<QualificationGroup>,
    #[serde(default)]
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Station assignment on a planned roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterAssignment {
    pub occurrence_id: OccurrenceId,
    pub station: StationId,
    pub controller_id: ControllerId,
}

/// Per-scope switches read by the deadline sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSettings {
    pub code: ScopeCode,
    #[serde(default)]
    pub automated_notifications: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("pattern name must not be empty")]
    MissingName,
    #[error("weekday must be between 0 (Monday) and 6 (Sunday), got {0}")]
    InvalidWeekday(u8),
    #[error("weeks_on must be at least 1")]
    WeeksOnBelowOne,
    #[error(
        "weeks_on and weeks_off must each be at most {}, got {weeks_on} and {weeks_off}",
        MAX_CYCLE_WEEKS
    )]
    CycleOutOfRange { weeks_on: u32, weeks_off: u32 },
    #[error("signup_deadline_hours must be at most {}, got {0}", MAX_SIGNUP_DEADLINE_HOURS)]
    DeadlineOutOfRange(u32),
    #[error("station {0} is not staffed by this pattern")]
    UnknownStation(StationId),
}
