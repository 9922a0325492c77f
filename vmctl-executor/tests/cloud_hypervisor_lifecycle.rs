//! Integration tests for the cloud-hypervisor backend.
//!
//! These tests require KVM, the `cloud-hypervisor` binary, and a guest
//! kernel and rootfs at `VMCTL_TEST_KERNEL` / `VMCTL_TEST_ROOTFS`.
//! Run with: `cargo test --test cloud_hypervisor_lifecycle -- --ignored`

use std::path::PathBuf;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use vmctl_core::{VmName, VmStatus};
use vmctl_executor::{CloudHypervisorBackend, GuestConfig, OrchestratorConfig, VmOrchestrator};

fn env_path(var: &str, default: &str) -> PathBuf {
    std::env::var_os(var).map_or_else(|| PathBuf::from(default), PathBuf::from)
}

fn orchestrator(state_root: PathBuf) -> VmOrchestrator<CloudHypervisorBackend> {
    let guest = GuestConfig::new(
        env_path("VMCTL_TEST_KERNEL", "/var/lib/vmctl/vmlinux"),
        env_path("VMCTL_TEST_ROOTFS", "/var/lib/vmctl/rootfs.ext4"),
    );
    let config = OrchestratorConfig::new(state_root, guest);
    VmOrchestrator::new(CloudHypervisorBackend::with_defaults(), config).expect("orchestrator")
}

fn name(s: &str) -> VmName {
    VmName::new(s).expect("valid name")
}

#[tokio::test]
#[ignore = "requires KVM and cloud-hypervisor binary"]
async fn start_stop_destroy_real_vm() {
    let dir = tempfile::tempdir().expect("tempdir");
    let orch = orchestrator(dir.path().to_owned());
    orch.health_check().await.expect("backend health check");

    let started = Instant::now();
    let info = orch.start(name("itest"), None, &CancellationToken::new()).await.expect("start");
    println!("VM boot time: {:?}", started.elapsed());
    println!("VM ip: {}, tap: {}", info.ip, info.tap_device);
    assert_eq!(info.status, VmStatus::Running);

    orch.stop(&name("itest")).await.expect("stop");
    assert_eq!(orch.list(&name("itest")).expect("list").status, VmStatus::Stopped);

    orch.destroy(&name("itest")).await.expect("destroy");
    assert!(orch.list_all().is_empty());
    assert!(!dir.path().join("itest").exists(), "state dir should be removed");
}

#[tokio::test]
#[ignore = "requires KVM and cloud-hypervisor binary"]
async fn destroy_all_tears_down_every_vm() {
    let dir = tempfile::tempdir().expect("tempdir");
    let orch = orchestrator(dir.path().to_owned());

    for n in ["itest-a", "itest-b"] {
        orch.start(name(n), None, &CancellationToken::new()).await.expect("start");
    }
    let report = orch.destroy_all().await;
    assert_eq!(report.destroyed.len(), 2);
    assert!(report.failed.is_empty(), "failures: {:?}", report.failed);
}
