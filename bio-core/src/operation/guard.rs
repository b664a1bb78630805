//! Enforcement of the event protocol
//!
//! [`ObserverGuard`] sits between an operation and its observer and makes the
//! delivered sequence well formed no matter what the underlying action emits:
//! `Started` comes first (it is synthesized if missing), exactly one terminal
//! event is delivered and nothing follows it.
//!
//! [`GuardedOperation`] adds the cancellation rules on top: the first terminal
//! or cancel wins, a cancel on a running operation is reported immediately,
//! and a cancel issued before start makes the start report `Started` and
//! `Canceled` without running the action.

use async_trait::async_trait;
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::sync::Arc;
use tracing::{debug, trace};

use super::{Event, Observer, ObserverPtr, Operation, OperationKind, OperationPtr};
use crate::error::{BiometryError, Result};

/// Lifecycle position of an observed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Armed,
    Started,
    Canceled,
    Failed,
    Succeeded,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Canceled | Phase::Failed | Phase::Succeeded)
    }
}

/// Observer wrapper enforcing Started-first and exactly one terminal event
pub struct ObserverGuard<K: OperationKind> {
    inner: ObserverPtr<K>,
    // Re-entrant: an observer may cancel its own operation from a callback
    phase: ReentrantMutex<Cell<Phase>>,
}

impl<K: OperationKind> ObserverGuard<K> {
    pub fn new(inner: ObserverPtr<K>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            phase: ReentrantMutex::new(Cell::new(Phase::Armed)),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase.lock().get()
    }

    /// Forward `event` if the protocol allows it. Returns whether anything
    /// reached the wrapped observer.
    ///
    /// Delivery happens under the phase lock so a concurrent terminal event
    /// can never overtake an in-flight progress report.
    pub fn deliver(&self, event: Event<K>) -> bool {
        let phase = self.phase.lock();

        match phase.get() {
            current if current.is_terminal() => {
                trace!("{}: dropping {} after {:?}", K::NAME, event.name(), current);
                return false;
            }
            Phase::Armed => {
                phase.set(Phase::Started);
                self.inner.on_event(Event::Started);
                if matches!(event, Event::Started) {
                    return true;
                }
            }
            _ => {
                if matches!(event, Event::Started) {
                    trace!("{}: dropping duplicate started", K::NAME);
                    return false;
                }
            }
        }

        // A nested delivery from inside the callback above may have finished us
        if phase.get().is_terminal() {
            return true;
        }

        match &event {
            Event::Canceled(_) => phase.set(Phase::Canceled),
            Event::Failed(_) => phase.set(Phase::Failed),
            Event::Succeeded(_) => phase.set(Phase::Succeeded),
            _ => {}
        }
        self.inner.on_event(event);
        true
    }
}

impl<K: OperationKind> Observer<K> for ObserverGuard<K> {
    fn on_event(&self, event: Event<K>) {
        self.deliver(event);
    }
}

struct GuardState<K: OperationKind> {
    started: bool,
    cancel_requested: bool,
    guard: Option<Arc<ObserverGuard<K>>>,
}

/// Operation wrapper applying the start and cancellation rules
pub struct GuardedOperation<K: OperationKind> {
    inner: OperationPtr<K>,
    state: Mutex<GuardState<K>>,
}

impl<K: OperationKind> GuardedOperation<K> {
    pub fn new(inner: OperationPtr<K>) -> Self {
        Self {
            inner,
            state: Mutex::new(GuardState {
                started: false,
                cancel_requested: false,
                guard: None,
            }),
        }
    }

    /// Wrap and erase, ready to hand out
    pub fn wrap(inner: OperationPtr<K>) -> OperationPtr<K> {
        Arc::new(Self::new(inner))
    }

    /// Phase as seen by the observer, `Armed` before start
    pub fn phase(&self) -> Phase {
        self.state
            .lock()
            .guard
            .as_ref()
            .map_or(Phase::Armed, |guard| guard.phase())
    }
}

#[async_trait]
impl<K: OperationKind> Operation<K> for GuardedOperation<K> {
    async fn start_with_observer(&self, observer: ObserverPtr<K>) -> Result<()> {
        let guard = ObserverGuard::new(observer);
        let canceled_early = {
            let mut state = self.state.lock();
            if state.started {
                return Err(BiometryError::AlreadyStarted);
            }
            state.started = true;
            state.guard = Some(guard.clone());
            state.cancel_requested
        };

        if canceled_early {
            debug!("{}: canceled before start, not running", K::NAME);
            guard.deliver(Event::Started);
            guard.deliver(Event::Canceled(K::Reason::default()));
            return Ok(());
        }

        self.inner.start_with_observer(guard).await
    }

    async fn cancel(&self) -> Result<()> {
        let guard = {
            let mut state = self.state.lock();
            if !state.started {
                state.cancel_requested = true;
                return Ok(());
            }
            state.guard.clone()
        };

        let Some(guard) = guard else {
            return Ok(());
        };
        if guard.phase().is_terminal() {
            return Ok(());
        }

        // Report first; whatever the action emits from now on is dropped
        if guard.deliver(Event::Canceled(K::Reason::default())) {
            debug!("{}: canceled while running", K::NAME);
            self.inner.cancel().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Percent, Progress, Reason, TemplateId};
    use crate::operation::{Enrollment, SizeQuery};
    use crate::testing::RecordingObserver;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Inner operation that emits a fixed script when started
    struct Scripted<K: OperationKind> {
        script: Vec<Event<K>>,
        observer: Mutex<Option<ObserverPtr<K>>>,
        cancels: AtomicUsize,
    }

    impl<K: OperationKind> Scripted<K> {
        fn new(script: Vec<Event<K>>) -> Arc<Self> {
            Arc::new(Self {
                script,
                observer: Mutex::new(None),
                cancels: AtomicUsize::new(0),
            })
        }

        /// Emit an event late, as hardware finishing after a cancel would
        fn emit(&self, event: Event<K>) {
            let observer = self.observer.lock().clone();
            if let Some(observer) = observer {
                observer.on_event(event);
            }
        }
    }

    #[async_trait]
    impl<K: OperationKind> Operation<K> for Scripted<K> {
        async fn start_with_observer(&self, observer: ObserverPtr<K>) -> Result<()> {
            *self.observer.lock() = Some(observer.clone());
            for event in &self.script {
                observer.on_event(event.clone());
            }
            Ok(())
        }

        async fn cancel(&self) -> Result<()> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn progress(v: f64) -> Event<Enrollment> {
        Event::Progress(Progress::new(Percent::from_raw_value(v).unwrap()))
    }

    #[tokio::test]
    async fn test_started_is_synthesized() {
        let inner = Scripted::new(vec![Event::<SizeQuery>::Succeeded(2)]);
        let op = GuardedOperation::new(inner);
        let recorder = RecordingObserver::<SizeQuery>::new();

        op.start_with_observer(recorder.clone()).await.unwrap();
        assert_eq!(recorder.names(), vec!["started", "succeeded"]);
        assert_eq!(op.phase(), Phase::Succeeded);
    }

    #[tokio::test]
    async fn test_events_after_terminal_are_dropped() {
        let inner = Scripted::new(vec![
            Event::<Enrollment>::Started,
            progress(0.5),
            Event::Succeeded(TemplateId::new(1)),
            progress(1.0),
            Event::Failed("late".into()),
        ]);
        let op = GuardedOperation::new(inner);
        let recorder = RecordingObserver::<Enrollment>::new();

        op.start_with_observer(recorder.clone()).await.unwrap();
        assert_eq!(recorder.names(), vec!["started", "progress", "succeeded"]);
    }

    #[tokio::test]
    async fn test_second_start_fails() {
        let op = GuardedOperation::new(Scripted::new(vec![Event::<SizeQuery>::Succeeded(0)]));
        op.start_with_observer(RecordingObserver::<SizeQuery>::new()).await.unwrap();
        let err = op
            .start_with_observer(RecordingObserver::<SizeQuery>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BiometryError::AlreadyStarted));
    }

    #[tokio::test]
    async fn test_cancel_before_start_never_runs_action() {
        let inner = Scripted::new(vec![Event::<SizeQuery>::Succeeded(9)]);
        let op = GuardedOperation::new(inner.clone());
        let recorder = RecordingObserver::<SizeQuery>::new();

        op.cancel().await.unwrap();
        op.start_with_observer(recorder.clone()).await.unwrap();

        assert_eq!(recorder.names(), vec!["started", "canceled"]);
        assert!(inner.observer.lock().is_none());
        assert_eq!(inner.cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_running_wins_over_late_success() {
        let inner = Scripted::new(vec![Event::<Enrollment>::Started, progress(0.5)]);
        let op = GuardedOperation::new(inner.clone());
        let recorder = RecordingObserver::<Enrollment>::new();

        op.start_with_observer(recorder.clone()).await.unwrap();
        op.cancel().await.unwrap();
        inner.emit(Event::Succeeded(TemplateId::new(3)));

        assert_eq!(recorder.names(), vec!["started", "progress", "canceled"]);
        assert_eq!(inner.cancels.load(Ordering::SeqCst), 1);
        match recorder.events().last() {
            Some(Event::Canceled(reason)) => assert_eq!(reason, &Reason::default()),
            other => panic!("expected cancel, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_after_terminal_is_noop() {
        let inner = Scripted::new(vec![Event::<SizeQuery>::Failed("no sensor".into())]);
        let op = GuardedOperation::new(inner.clone());
        let recorder = RecordingObserver::<SizeQuery>::new();

        op.start_with_observer(recorder.clone()).await.unwrap();
        op.cancel().await.unwrap();

        assert_eq!(recorder.names(), vec!["started", "failed"]);
        assert_eq!(inner.cancels.load(Ordering::SeqCst), 0);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Started,
        Progress,
        Canceled,
        Failed,
        Succeeded,
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        prop_oneof![
            Just(Step::Started),
            Just(Step::Progress),
            Just(Step::Canceled),
            Just(Step::Failed),
            Just(Step::Succeeded),
        ]
    }

    fn to_event(step: &Step) -> Event<SizeQuery> {
        match step {
            Step::Started => Event::Started,
            Step::Progress => Event::Progress(crate::data::Void),
            Step::Canceled => Event::Canceled(Reason::new("user")),
            Step::Failed => Event::Failed("boom".into()),
            Step::Succeeded => Event::Succeeded(1),
        }
    }

    proptest! {
        #[test]
        fn prop_delivered_sequence_is_well_formed(steps in prop::collection::vec(step_strategy(), 0..24)) {
            let recorder = RecordingObserver::<SizeQuery>::new();
            let guard = ObserverGuard::new(recorder.clone());
            for step in &steps {
                guard.deliver(to_event(step));
            }

            let events = recorder.events();
            if steps.is_empty() {
                prop_assert!(events.is_empty());
            } else {
                prop_assert!(matches!(events.first(), Some(Event::Started)));
                let starts = events.iter().filter(|e| matches!(e, Event::Started)).count();
                prop_assert_eq!(starts, 1);
                let terminals = events.iter().filter(|e| e.is_terminal()).count();
                prop_assert!(terminals <= 1);
                if terminals == 1 {
                    prop_assert!(events.last().map_or(false, Event::is_terminal));
                }
                let any_terminal_step = steps.iter().any(|s| matches!(s, Step::Canceled | Step::Failed | Step::Succeeded));
                prop_assert_eq!(terminals == 1, any_terminal_step);
            }
        }
    }
}
