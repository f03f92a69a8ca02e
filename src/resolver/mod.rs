//! Connection / transaction resolver.
//!
//! Given a call that needs a database handle, the resolver decides whether to
//! reuse a caller-supplied handle, reuse the ambient handle published by an
//! `atomic()` / `non_atomic()` scope, or open and manage a fresh one, and
//! whether that handle must be inside a transaction.
//!
//! The decisions are pure functions in this module. [`Engine`] (blocking) and
//! [`AsyncEngine`] (non-blocking) are thin shells that carry them out, so both
//! follow exactly the same precedence:
//!
//! - handle: explicit > ambient > fresh
//! - transaction: already in one > begin on the handle > fresh handle + begin

pub mod blocking;
mod guard;
pub mod inject;
pub mod nonblocking;
mod scope;

pub use blocking::{Connected, Engine, EngineHandle, Transacted};
pub use inject::Inject;
pub use nonblocking::{AsyncConnected, AsyncEngine, AsyncEngineHandle, AsyncTransacted};
pub use scope::ScopeKind;

use crate::error::{FancyError, FancyResult};

/// Where the handle for a call comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleSource {
    /// Supplied by the caller; never opened or closed by the resolver.
    Explicit,
    /// Published by an enclosing scope; owned by that scope.
    Ambient,
    /// Opened for this call and released when it returns.
    Fresh,
}

impl HandleSource {
    /// Whether the resolver must release the handle at call exit.
    pub fn is_owned(self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// How a call that needs a transaction gets one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPlan {
    /// The handle is already in a transaction; use it as-is.
    Join,
    /// Begin on the existing handle; commit or roll back at call exit.
    BeginOnHandle,
    /// Begin on the freshly opened handle; finish it and release the handle.
    BeginOnFresh,
}

impl TransactionPlan {
    pub fn begins(self) -> bool {
        !matches!(self, Self::Join)
    }
}

/// What an `atomic()` / `non_atomic()` entry does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopePlan {
    /// Reuse the ambient handle; the enclosing scope finishes it.
    Share,
    /// Open a handle and publish it for the duration of the body.
    Open,
}

/// The part of the ambient scope the decisions look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbientState {
    pub kind: ScopeKind,
    pub in_transaction: bool,
}

/// Explicit > ambient > fresh.
pub fn resolve_handle(explicit: bool, ambient: bool) -> HandleSource {
    if explicit {
        HandleSource::Explicit
    } else if ambient {
        HandleSource::Ambient
    } else {
        HandleSource::Fresh
    }
}

/// In a transaction > begin on the handle > fresh handle + begin.
pub fn plan_transaction(source: HandleSource, in_transaction: bool) -> TransactionPlan {
    match source {
        HandleSource::Fresh => TransactionPlan::BeginOnFresh,
        _ if in_transaction => TransactionPlan::Join,
        _ => TransactionPlan::BeginOnHandle,
    }
}

/// Nested `atomic()` shares a transactional ambient handle. An ambient handle
/// without a transaction cannot be promoted silently.
pub fn plan_atomic(ambient: Option<AmbientState>) -> FancyResult<ScopePlan> {
    match ambient {
        None => Ok(ScopePlan::Open),
        Some(state) if state.in_transaction => Ok(ScopePlan::Share),
        Some(AmbientState {
            kind: ScopeKind::NonAtomic,
            ..
        }) => Err(FancyError::AtomicInsideNonAtomic),
        Some(AmbientState {
            kind: ScopeKind::Atomic,
            ..
        }) => Err(FancyError::not_in_transaction("atomic")),
    }
}

/// `non_atomic()` shares whatever scope is active.
pub fn plan_non_atomic(ambient: Option<AmbientState>) -> ScopePlan {
    match ambient {
        Some(_) => ScopePlan::Share,
        None => ScopePlan::Open,
    }
}

/// Checks for operations that only run on the ambient handle (`ax`).
pub fn check_ambient_execute(
    operation: &'static str,
    ambient: Option<AmbientState>,
    require_transaction: bool,
) -> FancyResult<()> {
    match ambient {
        None => Err(FancyError::no_active_scope(operation)),
        Some(state) if require_transaction && !state.in_transaction => {
            Err(FancyError::not_in_transaction(operation))
        }
        Some(_) => Ok(()),
    }
}
