//! The single path every operation takes to reach a server.
//!
//! ```text
//!  execute_read / execute_write
//!          │
//!          ├── context pinned? ──yes──► fork pinned handle (write: must be writable)
//!          │                                   │
//!          └── no ──► BindingFactory::create_ad_hoc
//!                                              │
//!                                   operation.execute(handle, deadline)
//!                                              │
//!                        drop handle: ad hoc disposed, fork only decrements
//! ```

use std::sync::Arc;

use replica_routing_types::ReadPreference;
use snafu::ensure;

use crate::{
    binding::{BindingFactory, HandleKind, Intent, RoutingHandle},
    deadline::Deadline,
    error::{Result, WriteOnReadOnlyPinSnafu},
    scope::RequestContext,
};

/// An operation that only reads.
pub trait ReadOperation {
    /// Value produced by the operation.
    type Output;

    /// Runs the operation through `handle`, honouring `deadline`.
    ///
    /// # Errors
    ///
    /// Whatever the operation or the cluster reports.
    fn execute(&self, handle: &RoutingHandle, deadline: &Deadline) -> Result<Self::Output>;
}

/// An operation that modifies data.
pub trait WriteOperation {
    /// Value produced by the operation.
    type Output;

    /// Runs the operation through `handle`, honouring `deadline`.
    ///
    /// # Errors
    ///
    /// Whatever the operation or the cluster reports.
    fn execute(&self, handle: &RoutingHandle, deadline: &Deadline) -> Result<Self::Output>;
}

impl<F, T> ReadOperation for F
where
    F: Fn(&RoutingHandle, &Deadline) -> Result<T>,
{
    type Output = T;

    fn execute(&self, handle: &RoutingHandle, deadline: &Deadline) -> Result<T> {
        self(handle, deadline)
    }
}

impl<F, T> WriteOperation for F
where
    F: Fn(&RoutingHandle, &Deadline) -> Result<T>,
{
    type Output = T;

    fn execute(&self, handle: &RoutingHandle, deadline: &Deadline) -> Result<T> {
        self(handle, deadline)
    }
}

/// Decides between the pinned and an ad-hoc handle, runs the operation, and
/// disposes what it minted.
#[derive(Debug, Clone)]
pub struct OperationExecutionBridge {
    client: u64,
    factory: Arc<BindingFactory>,
}

impl OperationExecutionBridge {
    /// Creates a bridge for the client with sequential id `client`.
    #[must_use]
    pub fn new(client: u64, factory: Arc<BindingFactory>) -> Self {
        Self { client, factory }
    }

    /// Returns a handle for one unit of work.
    ///
    /// A pinned context yields a fork of its handle. Writes through a pin
    /// that is not writable fail before any network access. An unpinned
    /// context yields a freshly selected ad-hoc handle.
    ///
    /// # Errors
    ///
    /// Returns `ForeignContext`, `WriteOnReadOnlyPin`, or any selection error.
    pub fn acquire(
        &self,
        context: &RequestContext,
        read_preference: &ReadPreference,
        intent: Intent,
        deadline: &Deadline,
    ) -> Result<RoutingHandle> {
        if let Some(pinned) = context.pinned_handle(self.client)? {
            if intent == Intent::Write {
                ensure!(
                    pinned.is_writable(),
                    WriteOnReadOnlyPinSnafu { pinned: pinned.endpoint().clone() }
                );
            }
            return Ok(pinned.fork());
        }
        self.factory.create_ad_hoc(read_preference, intent, deadline)
    }

    /// Runs a read operation.
    ///
    /// # Errors
    ///
    /// Returns acquisition errors or the operation's own error.
    pub fn execute_read<O: ReadOperation + ?Sized>(
        &self,
        context: &RequestContext,
        operation: &O,
        read_preference: &ReadPreference,
        deadline: &Deadline,
    ) -> Result<O::Output> {
        let handle = self.acquire(context, read_preference, Intent::Read, deadline)?;
        let result = operation.execute(&handle, deadline);
        release(handle);
        result
    }

    /// Runs a write operation.
    ///
    /// # Errors
    ///
    /// Returns acquisition errors or the operation's own error.
    pub fn execute_write<O: WriteOperation + ?Sized>(
        &self,
        context: &RequestContext,
        operation: &O,
        deadline: &Deadline,
    ) -> Result<O::Output> {
        let handle =
            self.acquire(context, &ReadPreference::primary(), Intent::Write, deadline)?;
        let result = operation.execute(&handle, deadline);
        release(handle);
        result
    }
}

fn release(handle: RoutingHandle) {
    if handle.kind() == HandleKind::AdHoc {
        tracing::trace!(endpoint = %handle.endpoint(), "Disposing ad-hoc handle");
    }
    drop(handle);
}
