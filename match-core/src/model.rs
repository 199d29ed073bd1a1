use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub type MatchId = u64;

/// Which subset of matches is being viewed and polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterCategory {
    #[default]
    All,
    Live,
    Replay,
}

impl FilterCategory {
    pub const ALL: [FilterCategory; 3] = [Self::All, Self::Live, Self::Replay];

    /// Resource path under the API root that serves this category.
    pub fn resource_path(self) -> &'static str {
        match self {
            Self::All => "matches",
            Self::Live => "matches/live",
            Self::Replay => "matches/replay",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Live => "live",
            Self::Replay => "replay",
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            Self::All => 0,
            Self::Live => 1,
            Self::Replay => 2,
        }
    }
}

impl fmt::Display for FilterCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "live" => Ok(Self::Live),
            "replay" => Ok(Self::Replay),
            other => Err(format!("unknown filter category: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MatchStatus {
    Live,
    Replay,
}

impl MatchStatus {
    pub fn from_live(is_live: bool) -> Self {
        if is_live {
            Self::Live
        } else {
            Self::Replay
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Live => "Live",
            Self::Replay => "Replay",
        }
    }
}

// The backend has shipped both the numeric enum (0 = live, 1 = replay) and
// the string form, so accept either.
impl<'de> Deserialize<'de> for MatchStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Code(u8),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Code(0) => Ok(Self::Live),
            Repr::Code(1) => Ok(Self::Replay),
            Repr::Code(other) => Err(serde::de::Error::custom(format!(
                "unknown match status code {other}"
            ))),
            Repr::Name(name) if name.eq_ignore_ascii_case("live") => Ok(Self::Live),
            Repr::Name(name) if name.eq_ignore_ascii_case("replay") => Ok(Self::Replay),
            Repr::Name(name) => Err(serde::de::Error::custom(format!(
                "unknown match status {name:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub id: MatchId,
    pub title: String,
    #[serde(default)]
    pub competition: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub teams: Option<String>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: MatchStatus,
    #[serde(default)]
    pub is_live: bool,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
}

impl MatchRecord {
    /// Media reference to play: the live stream when live, otherwise the recording.
    pub fn media_url(&self) -> Option<&str> {
        if self.is_live {
            self.stream_url.as_deref().or(self.video_url.as_deref())
        } else {
            self.video_url.as_deref().or(self.stream_url.as_deref())
        }
    }
}

/// Out-of-band status change delivered by the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStatusChange {
    pub match_id: MatchId,
    pub is_live: bool,
}

/// A full fetch result for one filter category. Never merged with a
/// previous snapshot; a new fetch replaces it wholesale.
pub type MatchSnapshot = Arc<Vec<MatchRecord>>;

/// Patch the entries a view is currently holding with a pushed status
/// change. Returns `true` when a record with that id was found.
pub fn apply_status_change(records: &mut [MatchRecord], change: &MatchStatusChange) -> bool {
    let mut touched = false;
    for record in records.iter_mut().filter(|r| r.id == change.match_id) {
        record.is_live = change.is_live;
        record.status = MatchStatus::from_live(change.is_live);
        touched = true;
    }
    touched
}

/// Accepts RFC 3339 timestamps and offset-less ones (read as UTC).
pub(crate) fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(serde::de::Error::custom)
}
