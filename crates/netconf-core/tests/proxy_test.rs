#![allow(clippy::unwrap_used)]
// Mount point owner and proxy.

mod support;

use std::sync::Arc;
use std::time::Duration;

use netconf_core::{
    DeviceConfig, MountPoint, NetconfDevice, NetconfError, Store, XmlPayloadCodec, spawn_owner,
};
use netconf_proto::XmlElement;
use tokio_util::sync::CancellationToken;

use support::{ScriptedService, leaf, path};

fn owned(service: &Arc<ScriptedService>, config: DeviceConfig) -> Arc<NetconfDevice> {
    Arc::new(NetconfDevice::new(
        service.clone(),
        Arc::new(XmlPayloadCodec),
        config,
    ))
}

#[tokio::test]
async fn test_proxy_writes_go_through_owner() {
    let service = Arc::new(ScriptedService::candidate());
    let device = owned(&service, DeviceConfig::default());
    let (remote, _task) = spawn_owner(device.clone(), CancellationToken::new());

    let proxy = MountPoint::Proxy { remote };
    assert!(!proxy.is_owner());
    let facade = proxy.facade();
    assert_eq!(facade.device(), device.id());

    facade
        .put(Store::Configuration, path("a"), leaf("a", "1"))
        .await
        .unwrap();
    facade
        .merge(Store::Configuration, path("b"), leaf("b", "2"))
        .await
        .unwrap();
    facade.commit().await.unwrap();

    assert_eq!(
        service.operations(),
        ["lock", "edit-config", "edit-config", "validate", "commit", "unlock"]
    );
}

#[tokio::test]
async fn test_proxy_reads_match_owner_reads() {
    let data = XmlElement::netconf("data").with_child(leaf("a", "1"));
    let service = Arc::new(ScriptedService::candidate().script(|s| s.data = Some(data)));
    let device = owned(&service, DeviceConfig::default());
    let (remote, _task) = spawn_owner(device.clone(), CancellationToken::new());

    let owner = MountPoint::Owner { device };
    let proxy = MountPoint::Proxy { remote };
    assert!(owner.is_owner());

    for mount in [&owner, &proxy] {
        let facade = mount.facade();
        assert_eq!(
            facade.read(Store::Configuration, path("a")).await.unwrap(),
            Some(leaf("a", "1"))
        );
        assert!(facade.exists(Store::Operational, path("a")).await.unwrap());
        assert!(!facade.exists(Store::Configuration, path("z")).await.unwrap());
    }
}

#[tokio::test]
async fn test_device_errors_cross_the_proxy_unchanged() {
    let service = Arc::new(ScriptedService::candidate().script(|s| s.failing_edits = vec![1]));
    let device = owned(&service, DeviceConfig::default());
    let (remote, _task) = spawn_owner(device, CancellationToken::new());
    let proxy = MountPoint::Proxy { remote };

    proxy
        .facade()
        .put(Store::Configuration, path("a"), leaf("a", "1"))
        .await
        .unwrap();
    let err = proxy.facade().commit().await.unwrap_err();
    assert!(matches!(err, NetconfError::Edit { .. }), "{err:?}");

    let err = proxy
        .facade()
        .put(Store::Operational, path("a"), leaf("a", "1"))
        .await
        .unwrap_err();
    assert!(matches!(err, NetconfError::UnsupportedStore { .. }), "{err:?}");
}

#[tokio::test]
async fn test_proxy_cancel() {
    let service = Arc::new(ScriptedService::candidate());
    let device = owned(&service, DeviceConfig::default());
    let (remote, _task) = spawn_owner(device, CancellationToken::new());
    let proxy = MountPoint::Proxy { remote };

    assert!(!proxy.facade().cancel().await.unwrap());
    proxy
        .facade()
        .delete(Store::Configuration, path("a"))
        .await
        .unwrap();
    assert!(proxy.facade().cancel().await.unwrap());
}

#[tokio::test]
async fn test_stopped_owner_is_unreachable() {
    let service = Arc::new(ScriptedService::candidate());
    let device = owned(&service, DeviceConfig::default());
    let cancel = CancellationToken::new();
    let (remote, task) = spawn_owner(device, cancel.clone());

    cancel.cancel();
    task.await.unwrap();

    let err = MountPoint::Proxy { remote }
        .facade()
        .commit()
        .await
        .unwrap_err();
    assert!(matches!(err, NetconfError::OwnerUnreachable { .. }), "{err:?}");
    assert!(service.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_owner_times_out() {
    let service = Arc::new(ScriptedService::candidate().script(|s| s.hang_reads = true));
    let config = DeviceConfig {
        ask_timeout: Duration::from_secs(2),
        ..DeviceConfig::default()
    };
    let device = owned(&service, config);
    let (remote, _task) = spawn_owner(device, CancellationToken::new());
    let proxy = MountPoint::Proxy { remote };

    let err = proxy
        .facade()
        .read(Store::Configuration, path("a"))
        .await
        .unwrap_err();
    match err {
        NetconfError::OwnerUnreachable { timeout, .. } => {
            assert_eq!(timeout, Duration::from_secs(2));
        }
        other => panic!("expected owner unreachable, got {other:?}"),
    }
}
