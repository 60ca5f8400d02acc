//! Client settings with builder pattern.
//!
//! Provides type-safe configuration for routing clients:
//! - Seed endpoints
//! - Default read preference
//! - Server selection and connect timeouts
//! - Latency window for nearest-member selection
//!
//! Settings are `Eq + Hash` so they can key the [`ClientFactory`](crate::ClientFactory).

use std::time::Duration;

use replica_routing_types::{Endpoint, ReadPreference};
use snafu::{ResultExt, ensure};

use crate::{
    error::{ConfigSnafu, InvalidValueSnafu, Result},
    selector::DEFAULT_LOCAL_THRESHOLD,
};

/// Default server selection timeout (30 seconds).
const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connect timeout (30 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for one routing client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientSettings {
    /// Members contacted first to discover the topology.
    pub(crate) seeds: Vec<Endpoint>,

    /// Read preference used when a call does not supply one.
    pub(crate) read_preference: ReadPreference,

    /// Upper bound on waiting for an eligible server.
    pub(crate) server_selection_timeout: Duration,

    /// Upper bound on opening a channel.
    pub(crate) connect_timeout: Duration,

    /// Latency window above the fastest eligible member.
    pub(crate) local_threshold: Duration,

    /// Expected replica set name, if any.
    pub(crate) replica_set_name: Option<String>,
}

impl ClientSettings {
    /// Creates a new settings builder.
    #[must_use]
    pub fn builder() -> ClientSettingsBuilder {
        ClientSettingsBuilder::default()
    }

    /// Returns the seed endpoints.
    #[must_use]
    pub fn seeds(&self) -> &[Endpoint] {
        &self.seeds
    }

    /// Returns the default read preference.
    #[must_use]
    pub fn read_preference(&self) -> &ReadPreference {
        &self.read_preference
    }

    /// Returns the server selection timeout.
    #[must_use]
    pub fn server_selection_timeout(&self) -> Duration {
        self.server_selection_timeout
    }

    /// Returns the connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the latency window width.
    #[must_use]
    pub fn local_threshold(&self) -> Duration {
        self.local_threshold
    }

    /// Returns the expected replica set name.
    #[must_use]
    pub fn replica_set_name(&self) -> Option<&str> {
        self.replica_set_name.as_deref()
    }

    /// Returns a copy with a different default read preference.
    #[must_use]
    pub fn with_read_preference(&self, read_preference: ReadPreference) -> Self {
        Self { read_preference, ..self.clone() }
    }
}

/// Builder for [`ClientSettings`].
#[derive(Debug, Default)]
pub struct ClientSettingsBuilder {
    seeds: Vec<String>,
    read_preference: Option<ReadPreference>,
    server_selection_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    local_threshold: Option<Duration>,
    replica_set_name: Option<String>,
}

impl ClientSettingsBuilder {
    /// Sets the seed endpoints, replacing any added so far.
    ///
    /// Each seed is `host` or `host:port`; the port defaults to 27017.
    #[must_use]
    pub fn with_seeds<I, S>(mut self, seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seeds = seeds.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a single seed endpoint.
    #[must_use]
    pub fn with_seed<S: Into<String>>(mut self, seed: S) -> Self {
        self.seeds.push(seed.into());
        self
    }

    /// Sets the default read preference.
    ///
    /// Default: primary.
    #[must_use]
    pub fn with_read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.read_preference = Some(read_preference);
        self
    }

    /// Sets how long a call may wait for an eligible server.
    ///
    /// Default: 30 seconds.
    #[must_use]
    pub fn with_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = Some(timeout);
        self
    }

    /// Sets how long opening a channel may take.
    ///
    /// Default: 30 seconds.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the latency window for read preference selection.
    ///
    /// Default: 15 milliseconds.
    #[must_use]
    pub fn with_local_threshold(mut self, threshold: Duration) -> Self {
        self.local_threshold = Some(threshold);
        self
    }

    /// Sets the expected replica set name.
    #[must_use]
    pub fn with_replica_set_name<S: Into<String>>(mut self, name: S) -> Self {
        self.replica_set_name = Some(name.into());
        self
    }

    /// Builds the settings, validating all values.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No seeds provided
    /// - Any seed fails to parse as an endpoint
    /// - Server selection or connect timeout is zero
    /// - Replica set name is empty
    pub fn build(self) -> Result<ClientSettings> {
        ensure!(!self.seeds.is_empty(), ConfigSnafu { message: "at least one seed is required" });

        let mut seeds = self
            .seeds
            .iter()
            .map(|seed| seed.parse::<Endpoint>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .context(InvalidValueSnafu)?;
        seeds.sort();
        seeds.dedup();

        let server_selection_timeout =
            self.server_selection_timeout.unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT);
        ensure!(
            !server_selection_timeout.is_zero(),
            ConfigSnafu { message: "server_selection_timeout cannot be zero" }
        );

        let connect_timeout = self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        ensure!(
            !connect_timeout.is_zero(),
            ConfigSnafu { message: "connect_timeout cannot be zero" }
        );

        if let Some(name) = &self.replica_set_name {
            ensure!(!name.is_empty(), ConfigSnafu { message: "replica_set_name cannot be empty" });
        }

        Ok(ClientSettings {
            seeds,
            read_preference: self.read_preference.unwrap_or_default(),
            server_selection_timeout,
            connect_timeout,
            local_threshold: self.local_threshold.unwrap_or(DEFAULT_LOCAL_THRESHOLD),
            replica_set_name: self.replica_set_name,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{
        collections::hash_map::DefaultHasher,
        hash::{Hash, Hasher},
    };

    use super::*;
    use crate::error::ErrorKind;

    fn hash_of(settings: &ClientSettings) -> u64 {
        let mut hasher = DefaultHasher::new();
        settings.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_defaults() {
        let settings = ClientSettings::builder().with_seed("db1").build().unwrap();

        assert_eq!(settings.seeds(), &[Endpoint::new("db1", 27017)]);
        assert_eq!(settings.read_preference(), &ReadPreference::primary());
        assert_eq!(settings.server_selection_timeout(), DEFAULT_SERVER_SELECTION_TIMEOUT);
        assert_eq!(settings.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(settings.local_threshold(), DEFAULT_LOCAL_THRESHOLD);
        assert!(settings.replica_set_name().is_none());
    }

    #[test]
    fn test_missing_seeds() {
        let err = ClientSettings::builder().build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("seed"));
    }

    #[test]
    fn test_invalid_seed() {
        let err = ClientSettings::builder().with_seed("db1:notaport").build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let err = ClientSettings::builder()
            .with_seed("db1")
            .with_server_selection_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("server_selection_timeout"));

        let err = ClientSettings::builder()
            .with_seed("db1")
            .with_connect_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("connect_timeout"));
    }

    #[test]
    fn test_empty_replica_set_name_rejected() {
        let result = ClientSettings::builder().with_seed("db1").with_replica_set_name("").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_seed_order_does_not_affect_equality() {
        let a = ClientSettings::builder().with_seeds(["db2:27018", "db1"]).build().unwrap();
        let b = ClientSettings::builder()
            .with_seed("db1:27017")
            .with_seed("db2:27018")
            .with_seed("db1")
            .build()
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_with_read_preference_changes_identity() {
        let settings = ClientSettings::builder().with_seed("db1").build().unwrap();
        let secondary = settings.with_read_preference(ReadPreference::secondary());

        assert_ne!(settings, secondary);
        assert_eq!(secondary.seeds(), settings.seeds());
        assert_eq!(secondary.read_preference(), &ReadPreference::secondary());
    }
}
