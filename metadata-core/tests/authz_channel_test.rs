//! Connection manager behaviour against a lazily-dialed local channel.
//!
//! No authorization service needs to be running: stubs never dial until a call is made.

use std::sync::Arc;

use metadata_core::config::AuthzConfig;
use metadata_core::error::AppError;
use metadata_core::grpc::headers::{DEVELOPER_KEY_HEADER, EMAIL_HEADER, SOURCE_HEADER};
use metadata_core::grpc::{
    BackgroundTasks, CallContext, ConnectionManager, ConnectionState, HeaderSet, ServiceKind,
};
use secrecy::SecretString;

fn authz_config() -> AuthzConfig {
    AuthzConfig {
        host: Some("127.0.0.1".to_string()),
        port: Some(1),
        service_user_email: Some("svc@example.com".to_string()),
        service_user_dev_key: Some(SecretString::new("svc-key".to_string())),
        ..Default::default()
    }
}

#[tokio::test]
async fn construction_requires_host_and_port() {
    let cases = [
        (None, None),
        (Some("127.0.0.1".to_string()), None),
        (None, Some(50051)),
        (Some("   ".to_string()), Some(50051)),
    ];

    for (host, port) in cases {
        let config = AuthzConfig {
            host: host.clone(),
            port,
            ..authz_config()
        };
        match ConnectionManager::new(&config, BackgroundTasks::new()) {
            Err(AppError::Unavailable(msg)) => assert!(msg.contains("Host OR Port")),
            Err(other) => panic!("Expected Unavailable for {:?}/{:?}, got {:?}", host, port, other),
            Ok(_) => panic!("Expected Unavailable for {:?}/{:?}", host, port),
        }
    }
}

#[tokio::test]
async fn construction_opens_channel() {
    let manager = ConnectionManager::new(&authz_config(), BackgroundTasks::new()).unwrap();
    assert_eq!(manager.state(), ConnectionState::Open);
    assert_eq!(manager.in_flight(), 0);
}

#[tokio::test]
async fn stubs_are_cached_per_kind() {
    let manager = ConnectionManager::new(&authz_config(), BackgroundTasks::new()).unwrap();
    let call = CallContext::background();

    for kind in ServiceKind::ALL {
        let first = manager.get_stub(kind, &call, None).unwrap();
        let second = manager.get_stub(kind, &call, None).unwrap();
        assert!(Arc::ptr_eq(&first, &second), "{} stub was rebuilt", kind);
        assert_eq!(first.kind(), kind);
    }

    let roles = manager.get_stub(ServiceKind::Roles, &call, None).unwrap();
    let roles_async = manager.get_stub(ServiceKind::RolesAsync, &call, None).unwrap();
    assert!(!Arc::ptr_eq(&roles, &roles_async));
}

#[tokio::test]
async fn concurrent_first_access_yields_one_stub() {
    let manager = Arc::new(ConnectionManager::new(&authz_config(), BackgroundTasks::new()).unwrap());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .get_stub(ServiceKind::Organizations, &CallContext::background(), None)
                    .unwrap()
            })
        })
        .collect();

    let mut stubs = Vec::new();
    for handle in handles {
        stubs.push(handle.await.unwrap());
    }
    assert!(stubs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[tokio::test]
async fn background_stub_carries_service_account() {
    let background = BackgroundTasks::new();
    let manager = ConnectionManager::new(&authz_config(), background.clone()).unwrap();
    let _job = background.register("audit-flush");

    let stub = manager
        .get_stub(ServiceKind::Accounts, &CallContext::background(), None)
        .unwrap();
    let headers = stub.headers().expect("service account headers");
    assert_eq!(headers.get(EMAIL_HEADER), Some("svc@example.com"));
    assert_eq!(headers.get(DEVELOPER_KEY_HEADER), Some("svc-key"));
    assert_eq!(headers.get(SOURCE_HEADER), Some("PythonClient"));
}

#[tokio::test]
async fn request_stub_carries_caller_identity() {
    let background = BackgroundTasks::new();
    let manager = ConnectionManager::new(&authz_config(), background.clone()).unwrap();
    let _job = background.register("audit-flush");

    let caller: HeaderSet = [(EMAIL_HEADER, "alice@example.com")].into_iter().collect();
    let stub = manager
        .get_stub(
            ServiceKind::Authorization,
            &CallContext::with_identity(caller.clone()),
            None,
        )
        .unwrap();
    assert_eq!(stub.headers(), Some(&caller));
}

#[tokio::test]
async fn close_is_idempotent() {
    let manager = ConnectionManager::new(&authz_config(), BackgroundTasks::new()).unwrap();
    manager
        .get_stub(ServiceKind::Roles, &CallContext::background(), None)
        .unwrap();

    manager.close().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Closed);

    manager.close().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Closed);

    assert!(matches!(
        manager.get_stub(ServiceKind::Roles, &CallContext::background(), None),
        Err(AppError::Unavailable(_))
    ));
}

#[tokio::test]
async fn call_against_unreachable_service_fails_with_status() {
    let manager = ConnectionManager::new(&authz_config(), BackgroundTasks::new()).unwrap();
    let stub = manager
        .get_stub(ServiceKind::Teams, &CallContext::background(), None)
        .unwrap();

    assert!(stub.unary::<(), ()>("GetTeamById", ()).await.is_err());
    assert_eq!(manager.in_flight(), 0);
}
