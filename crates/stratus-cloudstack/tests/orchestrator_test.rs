mod common;

use common::{FakeControlPlane, config, fast_retry};
use std::sync::Arc;
use stratus_cloudstack::{
    CloudStackError, Created, DeploymentSpec, IpScope, Naming, Orchestrator, VmSpec,
};

fn spec(vms: usize, disks: usize, use_vpc: bool) -> DeploymentSpec {
    let config = config().with_vpc(use_vpc);
    DeploymentSpec::from_config(&config, Naming::new("run1").unwrap())
        .with_public_key("ssh-ed25519 AAAAC3Nza test@bench")
        .with_vms(
            vms,
            VmSpec {
                disk_count: disks,
                disk_size_gb: 20,
                ..VmSpec::default()
            },
        )
}

fn orchestrator(api: &Arc<FakeControlPlane>) -> Orchestrator {
    Orchestrator::new(api.clone()).with_retry(fast_retry())
}

/// Assert that calls starting with each prefix appear in this order
fn assert_order(api: &FakeControlPlane, prefixes: &[&str]) {
    let positions: Vec<usize> = prefixes
        .iter()
        .map(|p| {
            api.position(p)
                .unwrap_or_else(|| panic!("no call to {} in {:?}", p, api.calls()))
        })
        .collect();
    for (pair, names) in positions.windows(2).zip(prefixes.windows(2)) {
        assert!(
            pair[0] < pair[1],
            "{} should come before {}: {:?}",
            names[0],
            names[1],
            api.calls()
        );
    }
}

#[tokio::test]
async fn test_deploy_creates_in_dependency_order() {
    let api = Arc::new(FakeControlPlane::new());
    let deployment = orchestrator(&api).deploy(&spec(1, 2, true)).await.unwrap();

    assert_order(
        &api,
        &[
            "createVPC",
            "createNetwork",
            "registerSSHKeyPair",
            "deployVirtualMachine",
            "associateIpAddress",
            "enableStaticNat",
            "createVolume",
            "attachVolume",
        ],
    );

    assert_eq!(
        deployment.journal(),
        &[
            Created::Vpc,
            Created::Network,
            Created::Keypair(0),
            Created::Vm(0),
            Created::PublicIp(0),
            Created::StaticNat(0),
            Created::Volume(0, 0),
            Created::Attachment(0, 0),
            Created::Volume(0, 1),
            Created::Attachment(0, 1),
        ]
    );

    let vm = &deployment.vms[0];
    assert_eq!(vm.name, "stratus-run1-1");
    assert!(vm.static_nat);
    assert!(matches!(vm.ip_scope, Some(IpScope::Vpc(_))));
    assert_eq!(deployment.disks[0][0].name, "disk-stratus-run1-1-1");
    assert_eq!(deployment.disks[0][1].mount_device().unwrap().as_deref(), Some("/dev/xvdc"));
}

#[tokio::test]
async fn test_deploy_shares_network_and_keypair() {
    let api = Arc::new(FakeControlPlane::new());
    let deployment = orchestrator(&api).deploy(&spec(3, 0, false)).await.unwrap();

    assert_eq!(deployment.vms.len(), 3);
    assert_eq!(api.calls_to("createNetwork").len(), 1);
    assert_eq!(api.calls_to("registerSSHKeyPair").len(), 1);
    assert_eq!(api.calls_to("deployVirtualMachine").len(), 3);
    assert!(api.calls_to("createVPC").is_empty());

    let counts = api.counts();
    assert_eq!(counts.vms, 3);
    assert_eq!(counts.ips, 3);
}

#[tokio::test]
async fn test_deploy_rolls_back_on_failure() {
    let api = Arc::new(FakeControlPlane::new());
    // 431 is a parameter error, so it is not retried
    api.fail("attachVolume", 431, 1);

    let err = orchestrator(&api)
        .deploy(&spec(1, 1, true))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudStackError::Api { code: 431, .. }), "{err}");

    assert_eq!(api.counts(), common::Counts::default());
    assert_order(
        &api,
        &[
            "deleteVolume",
            "disableStaticNat",
            "disassociateIpAddress",
            "destroyVirtualMachine",
            "deleteSSHKeyPair",
            "deleteNetwork",
            "deleteVPC",
        ],
    );
}

#[tokio::test]
async fn test_rollback_reports_leaked_resources() {
    let api = Arc::new(FakeControlPlane::new());
    api.fail("createVolume", 431, 1);
    api.fail("destroyVirtualMachine", 431, 1);

    let err = orchestrator(&api)
        .deploy(&spec(1, 1, false))
        .await
        .unwrap_err();

    match err {
        CloudStackError::Rollback { cause, leaked } => {
            assert!(matches!(*cause, CloudStackError::Api { code: 431, .. }));
            assert_eq!(leaked, vec!["vm stratus-run1-1".to_string()]);
        }
        other => panic!("expected rollback error, got {other}"),
    }

    // Compensation carried on past the failure
    assert_eq!(api.counts().networks, 0);
    assert_eq!(api.counts().keypairs, 0);
    assert_eq!(api.counts().vms, 1);
}

#[tokio::test]
async fn test_deploy_retries_busy_volume() {
    let api = Arc::new(FakeControlPlane::new());
    api.fail("attachVolume", 437, 2);

    orchestrator(&api).deploy(&spec(1, 1, false)).await.unwrap();
    assert_eq!(api.calls_to("attachVolume").len(), 3);
}

#[tokio::test]
async fn test_deploy_failure_before_anything_created() {
    let api = Arc::new(FakeControlPlane::new());
    let mut spec = spec(1, 0, false);
    spec.zone = "QC-9".to_string();

    let err = orchestrator(&api).deploy(&spec).await.unwrap_err();
    assert!(matches!(err, CloudStackError::NotFound { kind: "zone", .. }));
    assert!(api.calls_to("createNetwork").is_empty());
}

#[tokio::test]
async fn test_deploy_needs_a_machine() {
    let api = Arc::new(FakeControlPlane::new());
    let err = orchestrator(&api)
        .deploy(&spec(0, 0, false))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudStackError::InvalidConfig(_)));
}

#[tokio::test]
async fn test_teardown_releases_in_reverse_order() {
    let api = Arc::new(FakeControlPlane::new());
    let orchestrator = orchestrator(&api);
    let deployment = orchestrator.deploy(&spec(1, 1, true)).await.unwrap();
    api.clear_calls();

    let result = orchestrator.teardown(deployment).await;
    assert!(result.is_success(), "{:?}", result.failed);
    assert_eq!(result.succeeded.len(), 8);

    assert_order(
        &api,
        &[
            "detachVolume",
            "deleteVolume",
            "disableStaticNat",
            "disassociateIpAddress",
            "destroyVirtualMachine",
            "deleteSSHKeyPair",
            "deleteNetwork",
            "deleteVPC",
        ],
    );
    assert_eq!(api.counts(), common::Counts::default());
}

#[tokio::test]
async fn test_teardown_by_name_after_restart() {
    let api = Arc::new(FakeControlPlane::new());
    api.add_foreign_vm("web-1");
    api.add_foreign_vm("stratus-other-1");

    let spec = spec(2, 2, true);
    orchestrator(&api).deploy(&spec).await.unwrap();
    api.clear_calls();

    // A new process knows nothing but the run id
    let result = orchestrator(&api).teardown_by_name(&spec).await.unwrap();
    assert!(result.is_success(), "{:?}", result.failed);

    let counts = api.counts();
    assert_eq!(counts.vms, 2, "foreign machines stay");
    assert_eq!(counts.volumes, 0);
    assert_eq!(counts.ips, 0);
    assert_eq!(counts.networks, 0);
    assert_eq!(counts.vpcs, 0);
    assert_eq!(counts.keypairs, 0);
    assert_order(&api, &["detachVolume", "destroyVirtualMachine", "deleteSSHKeyPair", "deleteNetwork", "deleteVPC"]);
}

#[tokio::test]
async fn test_teardown_by_name_releases_unbound_ips() {
    let api = Arc::new(FakeControlPlane::new());
    let spec = spec(1, 0, false);
    let deployment = orchestrator(&api).deploy(&spec).await.unwrap();

    let network_id = deployment.network.id.clone().unwrap();
    api.leak_ip(&IpScope::Network(network_id));
    assert_eq!(api.counts().ips, 2);

    let result = orchestrator(&api).teardown_by_name(&spec).await.unwrap();
    assert!(result.is_success(), "{:?}", result.failed);
    assert_eq!(api.counts(), common::Counts::default());
    // source NAT is released with the network, never directly
    assert_eq!(api.calls_to("disassociateIpAddress").len(), 2);
}

#[tokio::test]
async fn test_teardown_by_name_with_nothing_left() {
    let api = Arc::new(FakeControlPlane::new());
    let result = orchestrator(&api)
        .teardown_by_name(&spec(1, 1, true))
        .await
        .unwrap();
    assert!(result.is_success());
    assert!(result.succeeded.is_empty());
}

#[tokio::test]
async fn test_recover_finds_what_exists() {
    let api = Arc::new(FakeControlPlane::new());
    let spec = spec(1, 1, false);
    orchestrator(&api).deploy(&spec).await.unwrap();

    let recovered = orchestrator(&api).recover(&spec).await.unwrap();
    assert_eq!(
        recovered.created(),
        vec![
            "network stratus-network-run1",
            "keypair stratus-sshkey-run1",
            "vm stratus-run1-1",
            "public ip of stratus-run1-1",
            "static nat of stratus-run1-1",
            "volume disk-stratus-run1-1-1",
            "attachment of disk-stratus-run1-1-1 to stratus-run1-1",
        ]
    );
}

#[tokio::test]
async fn test_teardown_single_vm() {
    let api = Arc::new(FakeControlPlane::new());
    let spec = spec(2, 1, false);
    orchestrator(&api).deploy(&spec).await.unwrap();

    let result = orchestrator(&api)
        .teardown_vm(&spec, "stratus-run1-2")
        .await
        .unwrap();
    assert!(result.is_success(), "{:?}", result.failed);

    let counts = api.counts();
    assert_eq!(counts.vms, 1);
    assert_eq!(counts.volumes, 1);
    assert_eq!(counts.ips, 1);
    assert_eq!(counts.networks, 1);
    assert_eq!(counts.keypairs, 1);

    let err = orchestrator(&api)
        .teardown_vm(&spec, "web-1")
        .await
        .unwrap_err();
    assert!(matches!(err, CloudStackError::NotFound { .. }));
}

#[tokio::test]
async fn test_deploy_into_existing_network_keeps_it_on_failure() {
    let api = Arc::new(FakeControlPlane::new());
    let first = spec(1, 0, false);
    orchestrator(&api).deploy(&first).await.unwrap();

    let mut second = spec(1, 0, false);
    second.vms[0].name = Some("stratus-run1-2".to_string());
    second.vms[0].machine_type = "64vCPU.1TB".to_string();

    let err = orchestrator(&api).deploy(&second).await.unwrap_err();
    assert!(matches!(err, CloudStackError::NotFound { kind: "service offering", .. }));
    assert_eq!(api.counts().networks, 1);
    assert_eq!(api.counts().keypairs, 1);
    assert_eq!(api.counts().vms, 1);
}

#[tokio::test]
async fn test_teardown_by_name_finds_disks_of_destroyed_machines() {
    let api = Arc::new(FakeControlPlane::new());
    let spec = spec(1, 1, false);
    let orchestrator = orchestrator(&api);
    let deployment = orchestrator.deploy(&spec).await.unwrap();

    // Volume deletion is not retried, so the machine goes but its disk stays
    api.fail("deleteVolume", 530, 1);
    let result = orchestrator.teardown(deployment).await;
    assert!(!result.is_success());
    assert_eq!(api.counts().vms, 0);
    assert_eq!(api.counts().volumes, 1);

    let result = orchestrator.teardown_by_name(&spec).await.unwrap();
    assert!(result.is_success(), "{:?}", result.failed);
    assert_eq!(api.counts(), common::Counts::default());
}

#[tokio::test]
async fn test_teardown_by_name_finds_disks_past_a_gap() {
    let api = Arc::new(FakeControlPlane::new());
    let spec = spec(1, 2, false);
    let orchestrator = orchestrator(&api);
    let deployment = orchestrator.deploy(&spec).await.unwrap();

    // Disks go newest first, so the second one stays while the first is deleted
    api.fail("deleteVolume", 530, 1);
    let result = orchestrator.teardown(deployment).await;
    assert!(!result.is_success());
    assert!(api.volume("disk-stratus-run1-1-1").is_none());
    assert!(api.volume("disk-stratus-run1-1-2").is_some());

    let recovered = orchestrator.recover(&spec).await.unwrap();
    assert_eq!(recovered.created(), vec!["volume disk-stratus-run1-1-2"]);

    let result = orchestrator.teardown(recovered).await;
    assert!(result.is_success(), "{:?}", result.failed);
    assert_eq!(api.counts().volumes, 0);
}

#[tokio::test]
async fn test_recover_orders_machines_by_number() {
    let api = Arc::new(FakeControlPlane::new());
    api.add_foreign_vm("stratus-run1-10");
    api.add_foreign_vm("stratus-run1-2");

    let recovered = orchestrator(&api).recover(&spec(1, 0, false)).await.unwrap();
    assert_eq!(
        recovered.created(),
        vec!["vm stratus-run1-2", "vm stratus-run1-10"]
    );
}

#[tokio::test]
async fn test_rollback_releases_ip_allocated_after_timeout() {
    let api = Arc::new(FakeControlPlane::new());
    api.time_out_after("associateIpAddress", 1);
    api.fail("enableStaticNat", 431, 1);

    let err = orchestrator(&api)
        .deploy(&spec(1, 0, false))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudStackError::Api { code: 431, .. }), "{err}");

    assert_eq!(api.calls_to("associateIpAddress").len(), 1);
    assert_eq!(api.counts(), common::Counts::default());
}

#[tokio::test]
async fn test_deploy_adopts_ip_allocated_after_timeout() {
    let api = Arc::new(FakeControlPlane::new());
    api.time_out_after("associateIpAddress", 1);

    let deployment = orchestrator(&api).deploy(&spec(1, 0, false)).await.unwrap();
    assert_eq!(api.calls_to("associateIpAddress").len(), 1);
    assert_eq!(api.counts().ips, 1);

    let address = deployment.vms[0].public_ip.as_ref().unwrap().address.clone();
    assert!(api.ip(&address).unwrap().isstaticnat);
}
