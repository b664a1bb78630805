//! Observers across the bus
//!
//! Server side, a [`RemoteObserver`] turns events into `Operation.Observer`
//! calls on the client. The client exports an [`ObserverSkeleton`] that turns
//! those calls back into events for the real observer.

use async_trait::async_trait;
use bio_protocol::{names, MethodCall, ObjectPath, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::bus::{CallContext, ConnectionPtr, Object, Teardown};
use crate::codec::{arg, expect_arity, Codec};
use crate::error::{BiometryError, Result};
use crate::operation::{Event, Observer, ObserverGuard, ObserverPtr, OperationKind};

/// Observer method call carrying `event`
pub fn event_to_call<K: OperationKind>(path: &ObjectPath, event: &Event<K>) -> MethodCall {
    use names::member::*;
    let (member, args) = match event {
        Event::Started => (ON_STARTED, vec![]),
        Event::Progress(p) => (ON_PROGRESS, vec![p.encode()]),
        Event::Canceled(r) => (ON_CANCELLED, vec![r.encode()]),
        Event::Failed(e) => (ON_FAILED, vec![e.encode()]),
        Event::Succeeded(r) => (ON_SUCCEEDED, vec![r.encode()]),
    };
    MethodCall::new(path.clone(), names::OBSERVER, member, args)
}

/// Event carried by an observer method call
pub fn event_from_call<K: OperationKind>(member: &str, args: &[Value]) -> Result<Event<K>> {
    use names::member::*;
    match member {
        ON_STARTED => {
            expect_arity(args, 0)?;
            Ok(Event::Started)
        }
        ON_PROGRESS => {
            expect_arity(args, 1)?;
            Ok(Event::Progress(arg(args, 0)?))
        }
        ON_CANCELLED => {
            expect_arity(args, 1)?;
            Ok(Event::Canceled(arg(args, 0)?))
        }
        ON_FAILED => {
            expect_arity(args, 1)?;
            Ok(Event::Failed(arg(args, 0)?))
        }
        ON_SUCCEEDED => {
            expect_arity(args, 1)?;
            Ok(Event::Succeeded(arg(args, 0)?))
        }
        other => Err(BiometryError::UnknownMethod {
            interface: names::OBSERVER.into(),
            member: other.into(),
        }),
    }
}

/// Forwards events to an observer object exported by the client.
///
/// Events are relayed by a single task, one call at a time, so the client
/// sees them in emission order. The teardown runs after the terminal event
/// has been delivered or as soon as the client cannot be reached.
pub struct RemoteObserver<K: OperationKind> {
    events: mpsc::UnboundedSender<Event<K>>,
}

impl<K: OperationKind> RemoteObserver<K> {
    pub fn spawn(
        connection: ConnectionPtr,
        path: ObjectPath,
        teardown: Arc<Teardown>,
    ) -> Arc<Self> {
        let (events, mut rx) = mpsc::unbounded_channel::<Event<K>>();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let terminal = event.is_terminal();
                let call = event_to_call(&path, &event);
                if let Err(e) = connection.call(call, None).await {
                    warn!("{}: observer {} unreachable: {}", K::NAME, path, e);
                    teardown.run();
                    return;
                }
                if terminal {
                    debug!("{}: relayed {} to {}", K::NAME, event.name(), path);
                    teardown.run();
                    return;
                }
            }
        });

        Arc::new(Self { events })
    }
}

impl<K: OperationKind> Observer<K> for RemoteObserver<K> {
    fn on_event(&self, event: Event<K>) {
        // Fails only once the forwarder gave up on an unreachable client
        let _ = self.events.send(event);
    }
}

/// Client side export receiving observer calls.
///
/// The wrapped observer sees at most one terminal event, whatever the
/// service sends.
pub struct ObserverSkeleton<K: OperationKind> {
    observer: Arc<ObserverGuard<K>>,
    teardown: Arc<Teardown>,
}

impl<K: OperationKind> ObserverSkeleton<K> {
    pub fn new(observer: ObserverPtr<K>, teardown: Arc<Teardown>) -> Arc<Self> {
        Arc::new(Self {
            observer: ObserverGuard::new(observer),
            teardown,
        })
    }
}

#[async_trait]
impl<K: OperationKind> Object for ObserverSkeleton<K> {
    fn interface(&self) -> &'static str {
        names::OBSERVER
    }

    async fn invoke(&self, _ctx: &CallContext, member: &str, args: &[Value]) -> Result<Value> {
        let event = event_from_call::<K>(member, args)?;
        let name = event.name();
        if !self.observer.deliver(event) {
            debug!("{}: ignoring {} on {}", K::NAME, name, self.teardown.path());
        }
        if self.observer.phase().is_terminal() {
            self.teardown.run();
        }
        Ok(Value::Unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Percent, Progress, Reason, TemplateId};
    use crate::ipc::bus::{Connection, ObjectTable};
    use crate::ipc::local::LocalConnection;
    use crate::ipc::Sender;
    use crate::operation::{Enrollment, Removal};
    use crate::testing::RecordingObserver;
    use std::time::Duration;

    #[test]
    fn test_event_call_mapping() {
        let path = ObjectPath::parse("/observer/enroll/0").unwrap();
        let events: Vec<Event<Enrollment>> = vec![
            Event::Started,
            Event::Progress(Progress::new(Percent::from_raw_value(0.5).unwrap())),
            Event::Canceled(Reason::new("user")),
            Event::Failed("no finger".into()),
            Event::Succeeded(TemplateId::new(3)),
        ];
        let members = ["OnStarted", "OnProgress", "OnCancelled", "OnFailed", "OnSucceeded"];

        for (event, member) in events.iter().zip(members) {
            let call = event_to_call(&path, event);
            assert_eq!(call.member, member);
            assert_eq!(call.interface, names::OBSERVER);
            let back = event_from_call::<Enrollment>(&call.member, &call.args).unwrap();
            assert_eq!(format!("{:?}", back), format!("{:?}", event));
        }
    }

    #[test]
    fn test_malformed_observer_call() {
        assert!(matches!(
            event_from_call::<Removal>("OnSucceeded", &[]),
            Err(BiometryError::InvalidArguments(_))
        ));
        assert!(matches!(
            event_from_call::<Removal>("OnExploded", &[]),
            Err(BiometryError::UnknownMethod { .. })
        ));
    }

    #[tokio::test]
    async fn test_remote_observer_relays_in_order_then_tears_down() {
        let (server, client) = LocalConnection::pair(
            Sender::new(":1.0", None),
            Sender::new(":1.1", None),
        );

        // Client exports the observer
        let recording = RecordingObserver::<Enrollment>::new();
        let observer_path = ObjectPath::parse("/op/observer/enroll/0").unwrap();
        let client_teardown = Teardown::new(client.objects(), observer_path.clone());
        client
            .objects()
            .register(
                observer_path.clone(),
                ObserverSkeleton::<Enrollment>::new(recording.clone(), client_teardown),
            )
            .unwrap();

        // Server holds a placeholder for the operation it would tear down
        let op_path = ObjectPath::parse("/op").unwrap();
        let server_table: &Arc<ObjectTable> = server.objects();
        server_table
            .register(
                op_path.clone(),
                ObserverSkeleton::<Enrollment>::new(
                    RecordingObserver::<Enrollment>::new(),
                    Teardown::new(server_table, op_path.clone()),
                ),
            )
            .unwrap();
        let server_teardown = Teardown::new(server_table, op_path.clone());

        let remote = RemoteObserver::<Enrollment>::spawn(server.clone(), observer_path.clone(), server_teardown);
        remote.on_event(Event::Started);
        for v in [0.5, 1.0] {
            remote.on_event(Event::Progress(Progress::new(Percent::from_raw_value(v).unwrap())));
        }
        remote.on_event(Event::Succeeded(TemplateId::new(1)));

        recording.wait_for_terminal(Duration::from_secs(5)).await.unwrap();
        assert_eq!(recording.names(), vec!["started", "progress", "progress", "succeeded"]);
        assert!(!client.objects().contains(&observer_path));

        // Forwarder tears down after the terminal reply came back
        for _ in 0..100 {
            if !server_table.contains(&op_path) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!server_table.contains(&op_path));
    }

    #[tokio::test]
    async fn test_skeleton_delivers_one_terminal_event() {
        let (server, client) = LocalConnection::pair(
            Sender::new(":1.0", None),
            Sender::new(":1.1", None),
        );
        let recording = RecordingObserver::<Enrollment>::new();
        let path = ObjectPath::parse("/op/observer/enroll/7").unwrap();
        let skeleton = ObserverSkeleton::<Enrollment>::new(
            recording.clone(),
            Teardown::new(client.objects(), path.clone()),
        );
        client.objects().register(path.clone(), skeleton.clone()).unwrap();

        let ctx = CallContext {
            sender: Sender::new(":1.0", None),
            connection: server.clone(),
        };
        let succeeded = event_to_call(&path, &Event::<Enrollment>::Succeeded(TemplateId::new(1)));
        let failed = event_to_call(&path, &Event::<Enrollment>::Failed("late".into()));
        for call in [&succeeded, &succeeded, &failed] {
            skeleton.invoke(&ctx, &call.member, &call.args).await.unwrap();
        }

        assert_eq!(recording.names(), vec!["started", "succeeded"]);
        assert!(!client.objects().contains(&path));
    }
}
