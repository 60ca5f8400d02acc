//! Read routing policy.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::{
    error::{InvalidReadPreferenceSnafu, Result},
    server::ServerDescription,
};

/// Which members are acceptable for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPreferenceMode {
    /// Only the primary.
    #[default]
    Primary,
    /// The primary when available, otherwise a secondary.
    PrimaryPreferred,
    /// Only secondaries.
    Secondary,
    /// A secondary when available, otherwise the primary.
    SecondaryPreferred,
    /// Any data-bearing member within the latency window.
    Nearest,
}

impl fmt::Display for ReadPreferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Primary => "primary",
            Self::PrimaryPreferred => "primaryPreferred",
            Self::Secondary => "secondary",
            Self::SecondaryPreferred => "secondaryPreferred",
            Self::Nearest => "nearest",
        };
        f.write_str(name)
    }
}

/// A set of member tags that must all be present for a member to match.
///
/// The empty tag set matches every member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    /// Creates an empty tag set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns whether the set has no tags.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns whether every tag in this set is carried by `server`.
    #[must_use]
    pub fn matches(&self, server: &ServerDescription) -> bool {
        self.0.iter().all(|(key, value)| server.tags().get(key) == Some(value))
    }
}

impl<K, V> FromIterator<(K, V)> for TagSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Read routing policy: a mode plus an ordered list of tag sets.
///
/// Tag sets are tried in order; the first one that matches at least one
/// eligible member decides the candidates. An empty list places no tag
/// constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ReadPreference {
    mode: ReadPreferenceMode,
    #[serde(default)]
    tag_sets: Vec<TagSet>,
}

impl ReadPreference {
    /// Primary-only reads.
    pub const PRIMARY: Self = Self { mode: ReadPreferenceMode::Primary, tag_sets: Vec::new() };

    /// Creates a read preference with no tag constraint.
    #[must_use]
    pub fn new(mode: ReadPreferenceMode) -> Self {
        Self { mode, tag_sets: Vec::new() }
    }

    /// Primary-only reads.
    #[must_use]
    pub fn primary() -> Self {
        Self::PRIMARY
    }

    /// Primary, falling back to secondaries.
    #[must_use]
    pub fn primary_preferred() -> Self {
        Self::new(ReadPreferenceMode::PrimaryPreferred)
    }

    /// Secondaries only.
    #[must_use]
    pub fn secondary() -> Self {
        Self::new(ReadPreferenceMode::Secondary)
    }

    /// Secondaries, falling back to the primary.
    #[must_use]
    pub fn secondary_preferred() -> Self {
        Self::new(ReadPreferenceMode::SecondaryPreferred)
    }

    /// Lowest-latency eligible member.
    #[must_use]
    pub fn nearest() -> Self {
        Self::new(ReadPreferenceMode::Nearest)
    }

    /// Replaces the tag sets.
    ///
    /// # Errors
    ///
    /// Returns an error if the mode is [`ReadPreferenceMode::Primary`] and
    /// any non-empty tag set is supplied: the primary is chosen by role,
    /// never by tag.
    pub fn with_tag_sets(mut self, tag_sets: impl IntoIterator<Item = TagSet>) -> Result<Self> {
        let tag_sets: Vec<TagSet> = tag_sets.into_iter().collect();
        ensure!(
            self.mode != ReadPreferenceMode::Primary || tag_sets.iter().all(TagSet::is_empty),
            InvalidReadPreferenceSnafu { reason: "tag sets cannot be combined with primary mode" }
        );
        self.tag_sets = tag_sets;
        Ok(self)
    }

    /// Returns the mode.
    #[must_use]
    pub fn mode(&self) -> ReadPreferenceMode {
        self.mode
    }

    /// Returns the tag sets in preference order.
    #[must_use]
    pub fn tag_sets(&self) -> &[TagSet] {
        &self.tag_sets
    }

    /// Returns whether only the primary may serve reads.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.mode == ReadPreferenceMode::Primary
    }
}

impl fmt::Display for ReadPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tag_sets.is_empty() {
            write!(f, "{}", self.mode)
        } else {
            write!(f, "{} ({} tag sets)", self.mode, self.tag_sets.len())
        }
    }
}
