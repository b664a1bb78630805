//! Remote object layer
//!
//! The service, its device, the device's capabilities and every operation
//! handed out are exported as objects on a bus connection. Skeletons serve
//! them on the daemon side, stubs implement the same traits on the client
//! side, and observers travel the opposite way.
//!
//! ```text
//! /                                                   Service
//! /default_device                                     Device
//! /default_device/template_store                      TemplateStore
//! /default_device/template_store/operation/enroll/3   Operation
//! <operation path>/observer/enroll/0                  Observer (client side)
//! ```

mod bus;
mod local;
mod observer;
mod paths;
mod skeleton;
mod socket;
mod stub;

pub use bus::{
    error_from_wire, error_to_wire, CallContext, Connection, ConnectionPtr, Object, ObjectPtr,
    ObjectTable, PeerCredentials, Sender, Teardown,
};
pub use local::LocalConnection;
pub use observer::{event_from_call, event_to_call, ObserverSkeleton, RemoteObserver};
pub use paths::next_child_path;
pub use skeleton::{
    serve_service, DeviceSkeleton, IdentifierSkeleton, OperationSkeleton, ServiceSkeleton,
    SkeletonContext, TemplateStoreSkeleton, VerifierSkeleton,
};
pub use socket::{CallGate, SocketConnection};
pub use stub::{
    DeviceStub, IdentifierStub, OperationStub, ServiceStub, TemplateStoreStub, VerifierStub,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialsResolver;
    use crate::data::{Application, Reason, User};
    use crate::device::{DevicePtr, DummyDevice};
    use crate::error::{BiometryError, Result};
    use crate::operation::{Enrollment, Event, Identification, Operation, Verification};
    use crate::service::Service;
    use crate::testing::{RecordingObserver, StaticIdentityBroker};
    use async_trait::async_trait;
    use bio_protocol::{names, MethodCall, ObjectPath, Value};
    use std::sync::Arc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixed(DevicePtr);

    #[async_trait]
    impl Service for Fixed {
        async fn default_device(&self) -> Result<DevicePtr> {
            Ok(self.0.clone())
        }
    }

    struct Bus {
        server: Arc<LocalConnection>,
        client: Arc<LocalConnection>,
        service: ServiceStub,
    }

    fn bus(uid: u32) -> Bus {
        let (server, client) = LocalConnection::pair(
            Sender::new(":1.0", None),
            Sender::new(":1.1", None),
        );
        let resolver = CredentialsResolver::new(Arc::new(StaticIdentityBroker::new(uid, "com.example.app")));
        let device: DevicePtr = Arc::new(DummyDevice::new(None).unwrap());
        serve_service(server.objects().clone(), Arc::new(resolver), Arc::new(Fixed(device))).unwrap();
        let service = ServiceStub::new(client.clone());
        Bus {
            server,
            client,
            service,
        }
    }

    #[tokio::test]
    async fn test_enroll_then_verify_and_identify() {
        let bus = bus(1000);
        let device = bus.service.default_device().await.unwrap();
        let app = Application::new("com.example.app");
        let user = User::new(1000);

        let enroll = device.template_store().await.unwrap().enroll(&app, &user).await.unwrap();
        let observer = RecordingObserver::<Enrollment>::new();
        enroll.start_with_observer(observer.clone()).await.unwrap();
        assert!(matches!(observer.wait_for_terminal(WAIT).await.unwrap(), Event::Succeeded(_)));
        assert_eq!(observer.names(), vec!["started", "progress", "progress", "succeeded"]);

        let verify = device
            .verifier()
            .await
            .unwrap()
            .verify_user(&app, &user, &Reason::new("unlock"))
            .await
            .unwrap();
        let observer = RecordingObserver::<Verification>::new();
        verify.start_with_observer(observer.clone()).await.unwrap();
        assert!(matches!(observer.wait_for_terminal(WAIT).await.unwrap(), Event::Succeeded(true)));

        let identify = device
            .identifier()
            .await
            .unwrap()
            .identify_user(&app, &Reason::unknown())
            .await
            .unwrap();
        let observer = RecordingObserver::<Identification>::new();
        identify.start_with_observer(observer.clone()).await.unwrap();
        match observer.wait_for_terminal(WAIT).await.unwrap() {
            Event::Succeeded(found) => assert_eq!(found, user),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_objects_are_withdrawn_after_terminal_event() {
        let bus = bus(1000);
        let device = bus.service.default_device().await.unwrap();
        let store = device.template_store().await.unwrap();
        let enroll = store
            .enroll(&Application::new("com.example.app"), &User::new(1000))
            .await
            .unwrap();
        let before = bus.server.objects().len();

        let observer = RecordingObserver::<Enrollment>::new();
        enroll.start_with_observer(observer.clone()).await.unwrap();
        observer.wait_for_terminal(WAIT).await.unwrap();

        for _ in 0..100 {
            if bus.server.objects().len() < before && bus.client.objects().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(bus.server.objects().len(), before - 1);
        assert!(bus.client.objects().is_empty());

        // Late cancel on a withdrawn operation is harmless
        enroll.cancel().await.unwrap();
        assert!(matches!(
            enroll.start_with_observer(observer).await,
            Err(BiometryError::AlreadyStarted)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enrollments_get_distinct_paths() {
        const N: usize = 32;
        let bus = bus(1000);
        let device = bus.service.default_device().await.unwrap();
        let store = device.template_store().await.unwrap();

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .enroll(&Application::new("com.example.app"), &User::new(1000))
                        .await
                })
            })
            .collect();
        let mut ops = Vec::new();
        for handle in handles {
            ops.push(handle.await.unwrap().unwrap());
        }

        let exported: std::collections::HashSet<_> = bus
            .server
            .objects()
            .paths()
            .into_iter()
            .filter(|path| path.as_str().contains("/operation/enroll/"))
            .collect();
        assert_eq!(exported.len(), N);
        assert_eq!(ops.len(), N);
    }

    #[tokio::test]
    async fn test_acting_for_another_user_is_denied() {
        let bus = bus(1000);
        let device = bus.service.default_device().await.unwrap();
        let store = device.template_store().await.unwrap();
        let err = store
            .enroll(&Application::new("com.example.app"), &User::new(1001))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BiometryError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_cancel_before_start_reports_canceled() {
        let bus = bus(1000);
        let device = bus.service.default_device().await.unwrap();
        let enroll = device
            .template_store()
            .await
            .unwrap()
            .enroll(&Application::new("com.example.app"), &User::new(1000))
            .await
            .unwrap();

        enroll.cancel().await.unwrap();
        let observer = RecordingObserver::<Enrollment>::new();
        enroll.start_with_observer(observer.clone()).await.unwrap();
        assert!(matches!(observer.wait_for_terminal(WAIT).await.unwrap(), Event::Canceled(_)));
        assert_eq!(observer.names(), vec!["started", "canceled"]);
    }

    #[tokio::test]
    async fn test_operation_cannot_be_driven_by_another_connection() {
        let bus = bus(1000);
        let device = bus.service.default_device().await.unwrap();
        let store = device.template_store().await.unwrap();
        let enroll = store
            .enroll(&Application::new("com.example.app"), &User::new(1000))
            .await
            .unwrap();
        drop(enroll);

        let op_path = bus
            .server
            .objects()
            .paths()
            .into_iter()
            .find(|p| p.as_str().contains("/operation/enroll/"))
            .unwrap();

        // A second client on the same service
        let (intruder_server, intruder) = LocalConnection::pair(
            Sender::new(":1.0", None),
            Sender::new(":1.2", None),
        );
        let skeleton = bus.server.objects().lookup(&op_path).unwrap();
        intruder_server.objects().register(op_path.clone(), skeleton).unwrap();

        let err = intruder
            .call(
                MethodCall::new(op_path, names::OPERATION, names::member::CANCEL, vec![]),
                Some(WAIT),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BiometryError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_malformed_arguments_rejected() {
        let bus = bus(1000);
        let device = bus.service.default_device().await.unwrap();
        device.template_store().await.unwrap();

        let store_path = ObjectPath::parse("/default_device/template_store").unwrap();
        let err = bus
            .client
            .call(
                MethodCall::new(
                    store_path,
                    names::TEMPLATE_STORE,
                    names::member::REMOVE,
                    vec![Value::Str("app".into()), Value::Int32(1000), Value::Str("x".into())],
                ),
                Some(WAIT),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BiometryError::InvalidArguments(_)));

        // Nothing was exported for the failed call
        assert!(!bus
            .server
            .objects()
            .paths()
            .iter()
            .any(|p| p.as_str().contains("/operation/remove/")));
    }

    #[tokio::test]
    async fn test_closing_client_withdraws_its_operations() {
        let bus = bus(1000);
        let device = bus.service.default_device().await.unwrap();
        let enroll = device
            .template_store()
            .await
            .unwrap()
            .enroll(&Application::new("com.example.app"), &User::new(1000))
            .await
            .unwrap();
        let before = bus.server.objects().len();

        bus.client.close();
        assert!(bus.server.objects().len() < before);
        assert!(matches!(
            enroll.start_with_observer(RecordingObserver::<Enrollment>::new()).await,
            Err(BiometryError::Disconnected)
        ));
    }
}
