//! Asynchronous, observable, cancellable operations
//!
//! Every capability of a device hands out an [`Operation`]: a deferred action
//! that does nothing until [`Operation::start_with_observer`] is called and
//! then reports its lifecycle as a stream of [`Event`]s:
//!
//! ```text
//! Started, Progress*, (Canceled | Failed | Succeeded)
//! ```
//!
//! The typing of progress, reasons, errors and results is carried by an
//! [`OperationKind`] marker so one generic protocol serves every capability.

mod guard;
mod kinds;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::codec::Codec;
use crate::error::Result;

pub use guard::{GuardedOperation, ObserverGuard, Phase};
pub use kinds::{Clearance, Enrollment, Identification, List, Removal, SizeQuery, Verification};

/// Descriptor binding the four payload types of an operation
pub trait OperationKind: Send + Sync + 'static {
    /// Short name used in object paths and logs
    const NAME: &'static str;

    type Progress: Codec + Clone + fmt::Debug + Send + Sync + 'static;
    type Reason: Codec + Clone + fmt::Debug + Default + Send + Sync + 'static;
    type Error: Codec + Clone + fmt::Debug + From<String> + Send + Sync + 'static;
    type Result: Codec + Clone + fmt::Debug + Send + Sync + 'static;
}

/// One step in the life of an operation
pub enum Event<K: OperationKind> {
    Started,
    Progress(K::Progress),
    Canceled(K::Reason),
    Failed(K::Error),
    Succeeded(K::Result),
}

impl<K: OperationKind> Event<K> {
    /// Whether no further events may follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::Canceled(_) | Event::Failed(_) | Event::Succeeded(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::Started => "started",
            Event::Progress(_) => "progress",
            Event::Canceled(_) => "canceled",
            Event::Failed(_) => "failed",
            Event::Succeeded(_) => "succeeded",
        }
    }
}

// Manual impls: deriving would put the bounds on K instead of its payloads
impl<K: OperationKind> Clone for Event<K> {
    fn clone(&self) -> Self {
        match self {
            Event::Started => Event::Started,
            Event::Progress(p) => Event::Progress(p.clone()),
            Event::Canceled(r) => Event::Canceled(r.clone()),
            Event::Failed(e) => Event::Failed(e.clone()),
            Event::Succeeded(r) => Event::Succeeded(r.clone()),
        }
    }
}

impl<K: OperationKind> fmt::Debug for Event<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Started => f.write_str("Started"),
            Event::Progress(p) => f.debug_tuple("Progress").field(p).finish(),
            Event::Canceled(r) => f.debug_tuple("Canceled").field(r).finish(),
            Event::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
            Event::Succeeded(r) => f.debug_tuple("Succeeded").field(r).finish(),
        }
    }
}

/// Receiver of operation events.
///
/// Called synchronously from whatever context the operation runs on, so
/// implementations must return quickly and must not block.
pub trait Observer<K: OperationKind>: Send + Sync {
    fn on_event(&self, event: Event<K>);
}

pub type ObserverPtr<K> = Arc<dyn Observer<K>>;

/// A deferred, observable, cancellable action
#[async_trait]
pub trait Operation<K: OperationKind>: Send + Sync {
    /// Start the action, reporting to `observer`. Fails with `AlreadyStarted`
    /// on a second call. Transport failures of remote operations surface here,
    /// domain failures always go through the observer.
    async fn start_with_observer(&self, observer: ObserverPtr<K>) -> Result<()>;

    /// Request cancellation. A no-op once the operation has finished.
    async fn cancel(&self) -> Result<()>;
}

pub type OperationPtr<K> = Arc<dyn Operation<K>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(!Event::<Enrollment>::Started.is_terminal());
        assert!(!Event::<SizeQuery>::Progress(crate::data::Void).is_terminal());
        assert!(Event::<SizeQuery>::Succeeded(3).is_terminal());
        assert!(Event::<Removal>::Failed("gone".into()).is_terminal());
        assert!(Event::<Removal>::Canceled(crate::data::Reason::default()).is_terminal());
    }

    #[test]
    fn test_event_debug_and_clone() {
        let event = Event::<SizeQuery>::Succeeded(7);
        assert_eq!(format!("{:?}", event.clone()), "Succeeded(7)");
        assert_eq!(event.name(), "succeeded");
    }
}
