/*
 * Integration tests for biometryd
 *
 * These tests drive the daemon's object model end to end: a client stub
 * talks to the exported service through an in-process bus or a real Unix
 * socket, and the configured device does the work.
 */

use bio_core::Connection;
use bio_core::device::{DevicePtr, PluginLoader};
use bio_core::ipc::{LocalConnection, Sender};
use bio_core::testing::{RecordingObserver, StaticIdentityBroker};
use bio_core::{
    serve_service, Application, BiometryError, Clearance, Configuration, CredentialsResolver,
    DaemonConfig, DefaultDeviceConfig, DefaultService, DeviceRegistrar, DeviceRegistry,
    Enrollment, Event, List, ObjectTable, OperationKind, OperationPtr, Reason, Removal, Service,
    ServiceStub, SizeQuery, SocketConnection, Strand, User, Verification,
};
use bio_daemon::{run_server, ServerConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;

const WAIT: Duration = Duration::from_secs(5);
const APP: &str = "com.example.app";

// Test utilities
fn export_daemon(
    objects: Arc<ObjectTable>,
    config: DefaultDeviceConfig,
    broker: StaticIdentityBroker,
) -> DeviceRegistrar {
    let registry = Arc::new(DeviceRegistry::new());
    let registrar = DeviceRegistrar::new(registry.clone(), &[]);
    let service = DefaultService::new(registry, config, Strand::current().unwrap());
    serve_service(
        objects,
        Arc::new(CredentialsResolver::new(Arc::new(broker))),
        Arc::new(service),
    )
    .unwrap();
    registrar
}

fn local_client(
    config: DefaultDeviceConfig,
    broker: StaticIdentityBroker,
) -> (ServiceStub, Arc<LocalConnection>, DeviceRegistrar) {
    let (server, client) = LocalConnection::pair(
        Sender::new(":1.0", None),
        Sender::new(":1.1", None),
    );
    let registrar = export_daemon(server.objects().clone(), config, broker);
    (ServiceStub::new(client), server, registrar)
}

async fn run<K: OperationKind>(op: OperationPtr<K>) -> (Event<K>, Vec<&'static str>) {
    let observer = RecordingObserver::<K>::new();
    op.start_with_observer(observer.clone()).await.unwrap();
    let terminal = observer.wait_for_terminal(WAIT).await.unwrap();
    (terminal, observer.names())
}

fn storage_config(path: &Path) -> DefaultDeviceConfig {
    let json = format!(
        r#"{{"defaultDevice": {{"id": "Dummy", "config": {{"storage": "{}"}}}}}}"#,
        path.display()
    );
    DaemonConfig::parse(&json).unwrap().default_device
}

#[tokio::test]
async fn test_template_lifecycle_in_process() {
    let user = User::new(1000);
    let (service, _server, _registrar) =
        local_client(DefaultDeviceConfig::default(), StaticIdentityBroker::new(1000, APP));
    let app = Application::new(APP);
    let device = service.default_device().await.unwrap();
    let store = device.template_store().await.unwrap();

    let (enrolled, names) = run(store.enroll(&app, &user).await.unwrap()).await;
    assert_eq!(names, vec!["started", "progress", "progress", "succeeded"]);
    let id = match enrolled {
        Event::Succeeded(id) => id,
        other => panic!("enrollment failed: {:?}", other),
    };

    let (size, _) = run::<SizeQuery>(store.size(&app, &user).await.unwrap()).await;
    assert!(matches!(size, Event::Succeeded(1)));

    match run::<List>(store.list(&app, &user).await.unwrap()).await.0 {
        Event::Succeeded(ids) => assert_eq!(ids, vec![id]),
        other => panic!("unexpected {:?}", other),
    }

    match run::<Removal>(store.remove(&app, &user, id).await.unwrap()).await.0 {
        Event::Succeeded(removed) => assert_eq!(removed, id),
        other => panic!("unexpected {:?}", other),
    }

    run::<Enrollment>(store.enroll(&app, &user).await.unwrap()).await;
    let (cleared, _) = run::<Clearance>(store.clear(&app, &user).await.unwrap()).await;
    assert!(matches!(cleared, Event::Succeeded(_)));

    let (verified, _) = run::<Verification>(
        device
            .verifier()
            .await
            .unwrap()
            .verify_user(&app, &user, &Reason::new("unlock"))
            .await
            .unwrap(),
    )
    .await;
    assert!(matches!(verified, Event::Succeeded(false)));
}

#[tokio::test]
async fn test_templates_are_scoped_per_application() {
    let user = User::new(1000);
    let (service, _server, _registrar) =
        local_client(DefaultDeviceConfig::default(), StaticIdentityBroker::new(1000, APP));
    let device = service.default_device().await.unwrap();
    let store = device.template_store().await.unwrap();

    run::<Enrollment>(store.enroll(&Application::new(APP), &user).await.unwrap()).await;

    // The caller's confinement label decides the application, not the argument
    let (size, _) = run::<SizeQuery>(
        store
            .size(&Application::new("com.example.other"), &user)
            .await
            .unwrap(),
    )
    .await;
    assert!(matches!(size, Event::Succeeded(1)));
}

#[tokio::test]
async fn test_unconfined_caller_is_rejected() {
    let broker = StaticIdentityBroker {
        uid: Some(1000),
        ..StaticIdentityBroker::default()
    };
    let (service, _server, _registrar) = local_client(DefaultDeviceConfig::default(), broker);

    let err = service.default_device().await.err().unwrap();
    assert!(matches!(err, BiometryError::PermissionDenied(_)));
}

#[tokio::test]
async fn test_unknown_default_device() {
    let config = DefaultDeviceConfig {
        id: "NoSuchDevice".to_string(),
        config: Configuration::new(),
    };
    let (service, _server, _registrar) = local_client(config, StaticIdentityBroker::new(1000, APP));
    assert!(service.default_device().await.is_err());
}

#[tokio::test]
async fn test_enrollment_over_socket_persists() {
    let dir = TempDir::new().unwrap();
    let storage = dir.path().join("templates.json");
    let user = User::current();
    let app = Application::new(APP);

    for expected in [1u32, 2] {
        let socket = dir.path().join("biometryd.sock");
        let objects = ObjectTable::new();
        let _registrar = export_daemon(
            objects.clone(),
            storage_config(&storage),
            StaticIdentityBroker::new(user.id(), APP),
        );
        let (stop, stopped) = oneshot::channel::<()>();
        let config = ServerConfig::new(&socket);
        let server_config = config.clone();
        let server = tokio::spawn(async move {
            run_server(&server_config, objects, async {
                let _ = stopped.await;
            })
            .await
        });
        for _ in 0..100 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let client = SocketConnection::connect(&socket, ObjectTable::new()).await.unwrap();
        let device: DevicePtr = ServiceStub::new(client.clone()).default_device().await.unwrap();
        let store = device.template_store().await.unwrap();

        let (enrolled, names) = run::<Enrollment>(store.enroll(&app, &user).await.unwrap()).await;
        assert!(matches!(enrolled, Event::Succeeded(_)));
        assert_eq!(names, vec!["started", "progress", "progress", "succeeded"]);

        // Templates enrolled by the previous daemon instance are still there
        let (size, _) = run::<SizeQuery>(store.size(&app, &user).await.unwrap()).await;
        match size {
            Event::Succeeded(n) => assert_eq!(n, expected),
            other => panic!("unexpected {:?}", other),
        }

        client.close().await;
        stop.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
    assert!(storage.exists());
}

#[test]
fn test_plugin_major_version_mismatch_is_skipped() {
    let dir = TempDir::new().unwrap();
    let manifest = serde_json::json!({
        "id": "FutureSensor",
        "name": "Future sensor",
        "hostVersion": {"major": 99, "minor": 0},
        "driver": {"program": "/bin/false"}
    });
    let path = dir.path().join("future.json");
    std::fs::write(&path, manifest.to_string()).unwrap();

    let err = PluginLoader::new().load(&path).unwrap_err();
    assert!(matches!(err, BiometryError::MajorVersionMismatch { .. }));

    let registry = Arc::new(DeviceRegistry::new());
    let registrar = DeviceRegistrar::new(registry.clone(), &[dir.path().to_path_buf()]);
    assert!(!registry.contains("FutureSensor"));
    assert!(registry.contains("Dummy"));

    drop(registrar);
    assert!(registry.is_empty());
}
