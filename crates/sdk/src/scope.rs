//! Request scopes: pinning a sequence of operations to one server.
//!
//! A [`RequestContext`] is an explicit per-caller value. Starting a scope on
//! an unpinned context selects one server, opens a channel to it, and pins
//! the context. Starting another scope on a pinned context re-checks the new
//! selector against the pinned server only and bumps the nesting level.
//! Ending the outermost scope disposes the pinned handle.
//!
//! ```text
//!   Unpinned ──start──► Pinned(1) ──start──► Pinned(2) ── …
//!      ▲                   │  ▲                  │
//!      └───────end─────────┘  └──────end─────────┘
//! ```
//!
//! Contexts are not shared between threads; two callers that each own a
//! context never observe each other's pin.

use std::{
    fmt,
    ops::{Deref, DerefMut},
    slice,
    sync::Arc,
};

use replica_routing_types::{Endpoint, ReadPreference, ServerDescription};
use snafu::ensure;

use crate::{
    binding::{BindingFactory, Intent, RoutingHandle},
    cluster::ConnectionId,
    deadline::Deadline,
    error::{
        ForeignContextSnafu, IncompatibleNestedScopeSnafu, Result, UnbalancedEndScopeSnafu,
    },
    metrics::{RoutingMetrics, ScopeEvent},
    registry::{ServerInstance, ServerInstanceRegistry},
    selector::{EndpointServerSelector, ServerSelector, WritableServerSelector},
};

/// How a scope chooses its server.
#[derive(Debug, Clone, Default)]
pub enum ScopeSelector {
    /// A writable member.
    #[default]
    Primary,
    /// Any member satisfying the read preference.
    ReadPreference(ReadPreference),
    /// One specific, already known member.
    Instance(Arc<ServerInstance>),
}

impl ScopeSelector {
    /// Reduces this choice to a server selector and the read preference the
    /// pin is recorded under.
    pub(crate) fn resolve(
        &self,
        factory: &BindingFactory,
    ) -> (Box<dyn ServerSelector>, ReadPreference) {
        match self {
            Self::Primary => (Box::new(WritableServerSelector), ReadPreference::primary()),
            Self::ReadPreference(read_preference) => {
                (factory.selector_for(read_preference, Intent::Read), read_preference.clone())
            },
            Self::Instance(instance) => {
                let read_preference = if instance.is_writable() {
                    ReadPreference::primary()
                } else {
                    ReadPreference::secondary()
                };
                (Box::new(EndpointServerSelector::new(instance.endpoint().clone())), read_preference)
            },
        }
    }
}

impl From<ReadPreference> for ScopeSelector {
    fn from(read_preference: ReadPreference) -> Self {
        Self::ReadPreference(read_preference)
    }
}

impl From<Arc<ServerInstance>> for ScopeSelector {
    fn from(instance: Arc<ServerInstance>) -> Self {
        Self::Instance(instance)
    }
}

#[derive(Debug)]
struct RequestState {
    owner: u64,
    handle: RoutingHandle,
    description: ServerDescription,
    connection_id: ConnectionId,
    instance: Option<Arc<ServerInstance>>,
    nesting: usize,
}

/// Explicit per-caller record of an active request scope.
///
/// A fresh context is unpinned; operations run through it get ad-hoc
/// handles. While a scope is active every operation run through the context
/// reaches the pinned server over the pinned connection.
#[derive(Debug, Default)]
pub struct RequestContext {
    state: Option<RequestState>,
}

impl RequestContext {
    /// Creates an unpinned context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether a scope is active.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.state.is_some()
    }

    /// Returns how many scopes are open on this context (0 when unpinned).
    #[must_use]
    pub fn nesting_level(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.nesting)
    }

    /// Returns the pinned server's address.
    #[must_use]
    pub fn pinned_endpoint(&self) -> Option<&Endpoint> {
        self.state.as_ref().map(|state| state.description.endpoint())
    }

    /// Returns the pinned server's description captured at pin time.
    #[must_use]
    pub fn pinned_description(&self) -> Option<&ServerDescription> {
        self.state.as_ref().map(|state| &state.description)
    }

    /// Returns the registry instance of the pinned server, if it was known
    /// when the scope started.
    #[must_use]
    pub fn pinned_instance(&self) -> Option<&Arc<ServerInstance>> {
        self.state.as_ref().and_then(|state| state.instance.as_ref())
    }

    /// Returns the pinned connection's id.
    #[must_use]
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.state.as_ref().map(|state| &state.connection_id)
    }

    /// Returns the pinned handle, after checking `client` pinned it.
    pub(crate) fn pinned_handle(&self, client: u64) -> Result<Option<&RoutingHandle>> {
        let Some(state) = &self.state else {
            return Ok(None);
        };
        ensure!(state.owner == client, ForeignContextSnafu { owner: state.owner, client });
        Ok(Some(&state.handle))
    }

    /// Opens a scope: pins the context, or nests inside the existing pin.
    ///
    /// On any failure the context is left exactly as it was.
    pub(crate) fn enter(
        &mut self,
        client: u64,
        selector: &ScopeSelector,
        factory: &BindingFactory,
        registry: &ServerInstanceRegistry,
        metrics: &dyn RoutingMetrics,
        deadline: &Deadline,
    ) -> Result<()> {
        let (server_selector, read_preference) = selector.resolve(factory);

        if let Some(state) = &mut self.state {
            ensure!(state.owner == client, ForeignContextSnafu { owner: state.owner, client });
            let cluster = factory.cluster().description();
            let candidates = slice::from_ref(&state.description);
            if server_selector.select(&cluster, candidates).is_empty() {
                metrics.record_scope_event(ScopeEvent::Rejected);
                return IncompatibleNestedScopeSnafu {
                    pinned: state.description.endpoint().clone(),
                    selector: server_selector.to_string(),
                }
                .fail();
            }
            state.nesting += 1;
            metrics.record_scope_event(ScopeEvent::Nested);
            tracing::trace!(
                endpoint = %state.description.endpoint(),
                nesting = state.nesting,
                "Entered nested request scope"
            );
            return Ok(());
        }

        let (handle, connection_id) =
            factory.create_pinned(server_selector.as_ref(), read_preference, deadline)?;
        let description = handle.description().clone();
        tracing::debug!(
            endpoint = %description.endpoint(),
            connection = %connection_id,
            writable = handle.is_writable(),
            "Pinned request scope"
        );
        self.state = Some(RequestState {
            owner: client,
            instance: registry.get(description.endpoint()),
            handle,
            description,
            connection_id,
            nesting: 1,
        });
        metrics.record_scope_event(ScopeEvent::Pinned);
        Ok(())
    }

    /// Closes the innermost scope, disposing the pinned handle when the
    /// outermost one closes.
    pub(crate) fn leave(&mut self, client: u64, metrics: &dyn RoutingMetrics) -> Result<()> {
        let Some(state) = &mut self.state else {
            return UnbalancedEndScopeSnafu.fail();
        };
        ensure!(state.owner == client, ForeignContextSnafu { owner: state.owner, client });

        state.nesting -= 1;
        if state.nesting > 0 {
            tracing::trace!(nesting = state.nesting, "Left nested request scope");
            return Ok(());
        }

        if let Some(state) = self.state.take() {
            tracing::debug!(
                endpoint = %state.description.endpoint(),
                connection = %state.connection_id,
                "Released request scope"
            );
            drop(state);
            metrics.record_scope_event(ScopeEvent::Released);
        }
        Ok(())
    }
}

/// Ends one scope when dropped.
///
/// Derefs to the [`RequestContext`], so the guard can be passed wherever the
/// context is expected, including to start a nested scope.
pub struct ScopeGuard<'a> {
    context: &'a mut RequestContext,
    client: u64,
    level: usize,
    metrics: Arc<dyn RoutingMetrics>,
    ended: bool,
}

impl<'a> ScopeGuard<'a> {
    pub(crate) fn new(
        context: &'a mut RequestContext,
        client: u64,
        metrics: Arc<dyn RoutingMetrics>,
    ) -> Self {
        let level = context.nesting_level();
        Self { context, client, level, metrics, ended: false }
    }

    /// Ends the scope now, surfacing any error instead of logging it.
    ///
    /// # Errors
    ///
    /// Returns `UnbalancedEndScope` if the scope was already ended through
    /// the client.
    pub fn end(mut self) -> Result<()> {
        self.ended = true;
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        if self.context.nesting_level() < self.level {
            return UnbalancedEndScopeSnafu.fail();
        }
        self.context.leave(self.client, self.metrics.as_ref())
    }
}

impl Deref for ScopeGuard<'_> {
    type Target = RequestContext;

    fn deref(&self) -> &RequestContext {
        self.context
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut RequestContext {
        self.context
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if let Err(error) = self.close() {
            tracing::warn!(
                level = self.level,
                error = %error,
                "Scope guard dropped after its scope was already ended"
            );
        }
    }
}

impl fmt::Debug for ScopeGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("client", &self.client)
            .field("level", &self.level)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
