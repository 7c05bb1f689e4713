//! Storage live migration, scaling and VM work jobs end to end

mod common;

use chrono::Utc;
use common::*;
use netplane_core::error::{ErrorCategory, NetplaneError};
use netplane_core::jobs::JobStatus;
use netplane_core::lock::{LockEntry, LockHolder, LockManager};
use netplane_core::storage::tables::LOCK_TABLE;
use netplane_core::state_machine::{TransitionToken, VmEvent, VmState, VolumeState};
use netplane_core::types::*;
use netplane_core::vm::{vm_lock_name, VmWork, VmWorkResult, WorkRecord, WorkStep};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn targets(pairs: &[(VolumeId, PoolId)]) -> BTreeMap<VolumeId, PoolId> {
    pairs.iter().copied().collect()
}

fn only_work(harness: &VmHarness, vm_id: VmId) -> WorkRecord {
    let mut records = harness.manager.work_records(vm_id).unwrap();
    assert_eq!(records.len(), 1, "expected one work record");
    records.remove(0)
}

#[tokio::test]
async fn test_shared_to_shared_migration_moves_vm_and_volume() {
    let harness = VmHarness::new();
    let (vm, volume) = harness.running_vm(1, SHARED_POOL_1, false);

    let migrated = harness
        .manager
        .migrate_with_storage(vm.id, HOST_2, &targets(&[(volume.id, SHARED_POOL_2)]))
        .await
        .unwrap();

    assert_eq!(migrated.state, VmState::Running);
    assert_eq!(migrated.host_id, Some(HOST_2));
    assert_eq!(migrated.last_host_id, Some(HOST_1));
    assert_eq!(migrated.pending_migration, None);

    let volume = harness.volume(volume.id);
    assert_eq!(volume.state, VolumeState::Ready);
    assert_eq!(volume.pool_id, SHARED_POOL_2);

    let work = only_work(&harness, vm.id);
    assert_eq!(work.step, WorkStep::Done);
    assert_eq!(work.operation, "migrate_with_storage");

    let sent: Vec<(HostId, String)> = harness
        .transport
        .sent()
        .into_iter()
        .map(|s| (s.target, s.command.name().to_string()))
        .collect();
    assert_eq!(
        sent,
        vec![
            (HOST_2, "PrepareForMigration".to_string()),
            (HOST_2, "MigrateWithStorageReceive".to_string()),
            (HOST_1, "MigrateWithStorageSend".to_string()),
            (HOST_2, "MigrateWithStorageComplete".to_string()),
            (HOST_2, "CheckVirtualMachine".to_string()),
        ]
    );

    // Lock released once the operation settled
    assert!(!harness.locks.get(&vm_lock_name(vm.id)).is_locked().unwrap());
}

#[tokio::test]
async fn test_shared_to_local_migration_is_rejected_before_any_command() {
    let harness = VmHarness::new();
    let (vm, volume) = harness.running_vm(1, SHARED_POOL_1, true);

    let err = harness
        .manager
        .migrate_with_storage(vm.id, HOST_2, &targets(&[(volume.id, LOCAL_POOL_2)]))
        .await
        .unwrap_err();

    assert!(matches!(err, NetplaneError::VmOperationFailed { .. }));
    assert_eq!(err.category(), ErrorCategory::Fatal);
    assert!(harness.transport.sent().is_empty());
    assert_eq!(harness.vm(vm.id).state, VmState::Running);
    assert_eq!(harness.vm(vm.id).host_id, Some(HOST_1));
    assert_eq!(harness.volume(volume.id).pool_id, SHARED_POOL_1);
    assert!(harness.manager.work_records(vm.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_local_pool_requires_local_disk_offering() {
    let harness = VmHarness::new();
    let (vm, volume) = harness.running_vm(1, LOCAL_POOL_1, false);

    let err = harness
        .manager
        .migrate_with_storage(vm.id, HOST_2, &targets(&[(volume.id, LOCAL_POOL_2)]))
        .await
        .unwrap_err();

    assert!(matches!(err, NetplaneError::VmOperationFailed { .. }));
    assert!(harness.transport.sent().is_empty());
    assert_eq!(harness.volume(volume.id).state, VolumeState::Ready);
}

#[tokio::test]
async fn test_local_to_local_migration_with_local_offering() {
    let harness = VmHarness::new();
    let (vm, volume) = harness.running_vm(1, LOCAL_POOL_1, true);

    let migrated = harness
        .manager
        .migrate_with_storage(vm.id, HOST_2, &targets(&[(volume.id, LOCAL_POOL_2)]))
        .await
        .unwrap();

    assert_eq!(migrated.host_id, Some(HOST_2));
    assert_eq!(harness.volume(volume.id).pool_id, LOCAL_POOL_2);
}

#[tokio::test]
async fn test_volume_left_on_unreachable_pool_is_rejected() {
    let harness = VmHarness::new();
    let (vm, _) = harness.running_vm(1, LOCAL_POOL_1, true);

    // No target given, so the volume would stay on host 1's local disk
    let err = harness
        .manager
        .migrate_with_storage(vm.id, HOST_2, &BTreeMap::new())
        .await
        .unwrap_err();

    assert!(matches!(err, NetplaneError::InvalidOperation { .. }));
    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn test_migration_preconditions() {
    let harness = VmHarness::new();
    let (vm, volume) = harness.running_vm(1, SHARED_POOL_1, false);

    let same_host = harness
        .manager
        .migrate_with_storage(vm.id, HOST_1, &targets(&[(volume.id, SHARED_POOL_2)]))
        .await
        .unwrap_err();
    assert!(matches!(same_host, NetplaneError::InvalidOperation { .. }));

    let stray = harness
        .manager
        .migrate_with_storage(vm.id, HOST_2, &targets(&[(VolumeId(999), SHARED_POOL_2)]))
        .await
        .unwrap_err();
    assert!(matches!(stray, NetplaneError::Validation { .. }));

    let mut stopped = harness.vm(vm.id);
    stopped.state = VmState::Stopped;
    stopped.host_id = None;
    harness.store.persist(&stopped).unwrap();
    let not_running = harness
        .manager
        .migrate_with_storage(vm.id, HOST_2, &targets(&[(volume.id, SHARED_POOL_2)]))
        .await
        .unwrap_err();
    assert!(matches!(not_running, NetplaneError::InvalidOperation { .. }));

    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn test_failed_send_step_rolls_back() {
    let harness = VmHarness::new();
    harness
        .transport
        .fail("MigrateWithStorageSend", "libvirt: storage copy failed");
    let (vm, volume) = harness.running_vm(1, SHARED_POOL_1, false);

    let err = harness
        .manager
        .migrate_with_storage(vm.id, HOST_2, &targets(&[(volume.id, SHARED_POOL_2)]))
        .await
        .unwrap_err();
    assert!(matches!(err, NetplaneError::VmOperationFailed { .. }));

    let vm = harness.vm(vm.id);
    assert_eq!(vm.state, VmState::Running);
    assert_eq!(vm.host_id, Some(HOST_1));
    assert_eq!(vm.pending_migration, None);

    let volume = harness.volume(volume.id);
    assert_eq!(volume.state, VolumeState::Ready);
    assert_eq!(volume.pool_id, SHARED_POOL_1);

    let work = only_work(&harness, vm.id);
    assert_eq!(work.step, WorkStep::RolledBack);
    assert!(work.details.unwrap().contains("storage copy failed"));

    assert_eq!(
        harness.transport.sent_names(),
        vec![
            "PrepareForMigration",
            "MigrateWithStorageReceive",
            "MigrateWithStorageSend"
        ]
    );
}

#[tokio::test]
async fn test_refused_prepare_leaves_vm_untouched() {
    let harness = VmHarness::new();
    harness.transport.fail_host(HOST_2);
    let (vm, volume) = harness.running_vm(1, SHARED_POOL_1, false);
    let before = harness.vm(vm.id);

    harness
        .manager
        .migrate_with_storage(vm.id, HOST_2, &targets(&[(volume.id, SHARED_POOL_2)]))
        .await
        .unwrap_err();

    assert_eq!(harness.vm(vm.id), before);
    assert_eq!(harness.transport.sent_names(), vec!["PrepareForMigration"]);
    assert_eq!(only_work(&harness, vm.id).step, WorkStep::RolledBack);
}

#[tokio::test]
async fn test_step_timeout_rolls_back() {
    let harness = VmHarness::new();
    harness
        .transport
        .delay("MigrateWithStorageReceive", Duration::from_secs(5));
    let (vm, volume) = harness.running_vm(1, SHARED_POOL_1, false);

    let err = harness
        .manager
        .migrate_with_storage(vm.id, HOST_2, &targets(&[(volume.id, SHARED_POOL_2)]))
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::ResourceUnavailable);
    assert_eq!(harness.vm(vm.id).state, VmState::Running);
    assert_eq!(harness.volume(volume.id).state, VolumeState::Ready);
    assert_eq!(only_work(&harness, vm.id).step, WorkStep::RolledBack);
}

#[tokio::test]
async fn test_migration_completion_is_idempotent() {
    let harness = VmHarness::new();
    let (vm, _) = harness.running_vm(1, SHARED_POOL_1, false);
    let token = TransitionToken::new(HOST_1, HOST_2);

    let moved = harness
        .manager
        .vm_state_machine()
        .transition(vm.id.value(), VmEvent::MigrationRequested, VmState::Running, Some(&token))
        .unwrap();
    assert!(moved);

    // A completion for some other move is ignored
    let other = TransitionToken::new(HOST_1, HostId(7));
    assert!(!harness.manager.complete_migration(vm.id, other).unwrap());
    assert_eq!(harness.vm(vm.id).state, VmState::Migrating);

    assert!(harness.manager.complete_migration(vm.id, token).unwrap());
    let after = harness.vm(vm.id);
    assert_eq!(after.state, VmState::Running);
    assert_eq!(after.host_id, Some(HOST_2));

    // Duplicate notification
    assert!(!harness.manager.complete_migration(vm.id, token).unwrap());
    assert_eq!(harness.vm(vm.id), after);
}

#[tokio::test]
async fn test_concurrent_migrations_of_one_vm_are_serialized() {
    let harness = VmHarness::new();
    harness
        .transport
        .delay("MigrateWithStorageReceive", Duration::from_millis(100));
    let (vm, volume) = harness.running_vm(1, SHARED_POOL_1, false);
    let plan = targets(&[(volume.id, SHARED_POOL_2)]);

    let (first, second) = tokio::join!(
        harness.manager.migrate_with_storage(vm.id, HOST_2, &plan),
        harness.manager.migrate_with_storage(vm.id, HOST_2, &plan),
    );

    // The loser sees the VM already on the destination
    assert_eq!(
        [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(),
        1
    );
    let loser = first.err().or(second.err()).unwrap();
    assert!(matches!(loser, NetplaneError::InvalidOperation { .. }));
    assert_eq!(
        harness
            .transport
            .sent_names()
            .iter()
            .filter(|name| *name == "PrepareForMigration")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_held_vm_lock_times_out_as_conflict() {
    let harness = VmHarness::new();
    let (vm, volume) = harness.running_vm(1, SHARED_POOL_1, false);
    let lock = harness.locks.get(&vm_lock_name(vm.id));
    assert!(lock.acquire("operator", Duration::from_millis(50)).await.unwrap());

    let err = harness
        .manager
        .migrate_with_storage(vm.id, HOST_2, &targets(&[(volume.id, SHARED_POOL_2)]))
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Conflict);
    assert!(harness.transport.sent().is_empty());
    assert!(lock.release("operator").unwrap());
}

#[tokio::test]
async fn test_scale_running_vm_up() {
    let harness = VmHarness::new();
    let (vm, _) = harness.running_vm(1, SHARED_POOL_1, false);

    let scaled = harness
        .manager
        .scale_vm(vm.id, offering(4, 4096, true))
        .await
        .unwrap();

    assert_eq!(scaled.service_offering.cpu, 4);
    assert_eq!(scaled.service_offering.memory_mb, 4096);
    assert_eq!(scaled.version, vm.version + 1);
    assert_eq!(harness.transport.sent_to(HOST_1), vec!["ScaleVm"]);
    assert_eq!(only_work(&harness, vm.id).step, WorkStep::Done);
}

#[tokio::test]
async fn test_scale_running_vm_down_is_rejected() {
    let harness = VmHarness::new();
    let (vm, _) = harness.running_vm(1, SHARED_POOL_1, false);

    let err = harness
        .manager
        .scale_vm(vm.id, offering(1, 1024, true))
        .await
        .unwrap_err();

    assert!(matches!(err, NetplaneError::InvalidOperation { .. }));
    assert!(harness.transport.sent().is_empty());
    assert_eq!(harness.vm(vm.id).service_offering.cpu, 2);
}

#[tokio::test]
async fn test_scale_stopped_vm_records_offering_only() {
    let harness = VmHarness::new();
    let vm = VmInstance::new(VmId(5), "i-2-5-VM", offering(1, 512, false));
    harness.store.persist(&vm).unwrap();

    let scaled = harness
        .manager
        .scale_vm(vm.id, offering(1, 256, false))
        .await
        .unwrap();

    assert_eq!(scaled.service_offering.memory_mb, 256);
    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn test_rejected_scale_rolls_back_work() {
    let harness = VmHarness::new();
    harness.transport.fail("ScaleVm", "hotplug not supported");
    let (vm, _) = harness.running_vm(1, SHARED_POOL_1, false);

    let err = harness
        .manager
        .scale_vm(vm.id, offering(4, 4096, true))
        .await
        .unwrap_err();

    assert!(matches!(err, NetplaneError::VmOperationFailed { .. }));
    assert_eq!(harness.vm(vm.id).service_offering.cpu, 2);
    let work = only_work(&harness, vm.id);
    assert_eq!(work.step, WorkStep::RolledBack);
    assert_eq!(work.details.as_deref().map(|d| d.contains("hotplug")), Some(true));
}

#[tokio::test]
async fn test_vm_work_runs_through_the_job_queue() {
    let harness = VmHarness::new();
    harness.jobs.start().unwrap();
    let (vm, volume) = harness.running_vm(1, SHARED_POOL_1, false);

    let migrate = harness
        .manager
        .submit_work(&VmWork::MigrateWithStorage {
            vm_id: vm.id,
            dest_host: HOST_2,
            volume_to_pool: vec![(volume.id, SHARED_POOL_2)],
        })
        .unwrap();
    let scale = harness
        .manager
        .submit_work(&VmWork::Scale {
            vm_id: vm.id,
            service_offering: offering(4, 4096, true),
        })
        .unwrap();

    let migrate = harness
        .jobs
        .wait_for_completion(migrate, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(migrate.status, JobStatus::Succeeded);
    assert_eq!(migrate.step.as_deref(), Some("VmWorkMigrateWithStorage"));
    assert_eq!(migrate.instance_type.as_deref(), Some("VirtualMachine"));
    let result: VmWorkResult = migrate.result_as().unwrap().unwrap();
    assert_eq!(result.host_id, Some(HOST_2));
    assert_eq!(result.state, VmState::Running);

    let scale = harness
        .jobs
        .wait_for_completion(scale, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(scale.status, JobStatus::Succeeded);

    // The scale ran after the migration, on the destination host
    assert_eq!(harness.transport.sent_to(HOST_2).last().unwrap(), "ScaleVm");
    let records = harness.manager.work_records(vm.id).unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.step == WorkStep::Done));
    assert!(records.iter().any(|r| r.job_id == Some(migrate.id)));
    assert!(records.iter().any(|r| r.job_id == Some(scale.id)));
}

#[tokio::test]
async fn test_failed_vm_work_fails_its_job() {
    let harness = VmHarness::new();
    let (vm, volume) = harness.running_vm(1, SHARED_POOL_1, true);

    let job = harness
        .manager
        .submit_work(&VmWork::MigrateWithStorage {
            vm_id: vm.id,
            dest_host: HOST_2,
            volume_to_pool: vec![(volume.id, LOCAL_POOL_2)],
        })
        .unwrap();

    let job = harness
        .jobs
        .wait_for_completion(job, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failure().unwrap().category, ErrorCategory::Fatal);
}

#[tokio::test]
async fn test_interrupted_migration_is_rolled_back_on_recovery() {
    let harness = VmHarness::new();
    let (vm, volume) = harness.running_vm(1, SHARED_POOL_1, false);
    let token = TransitionToken::new(HOST_1, HOST_2);

    // State left behind by a crash between the state change and the remote steps
    harness
        .manager
        .vm_state_machine()
        .transition(vm.id.value(), VmEvent::MigrationRequested, VmState::Running, Some(&token))
        .unwrap();
    let mut migrating = harness.volume(volume.id);
    migrating.state = VolumeState::Migrating;
    harness.store.persist(&migrating).unwrap();
    let now = Utc::now();
    harness
        .store
        .persist(&WorkRecord {
            id: WorkId(1),
            vm_id: vm.id,
            operation: "migrate_with_storage".into(),
            step: WorkStep::Migrating,
            owner_node: harness.config.node_id,
            job_id: None,
            details: None,
            created_at: now,
            updated_at: now,
        })
        .unwrap();

    assert_eq!(harness.manager.recover_interrupted_work().unwrap(), 1);

    let vm = harness.vm(vm.id);
    assert_eq!(vm.state, VmState::Running);
    assert_eq!(vm.host_id, Some(HOST_1));
    assert_eq!(harness.volume(volume.id).state, VolumeState::Ready);
    let work = only_work(&harness, vm.id);
    assert_eq!(work.step, WorkStep::RolledBack);
    assert_eq!(
        work.details.as_deref(),
        Some("interrupted by management server restart")
    );

    // Nothing left to recover
    assert_eq!(harness.manager.recover_interrupted_work().unwrap(), 0);
}

#[tokio::test]
async fn test_expunged_vm_leaves_affinity_groups() {
    let harness = VmHarness::new();
    let vm = VmInstance::new(VmId(3), "i-2-3-VM", offering(1, 512, false));
    harness.store.persist(&vm).unwrap();
    harness
        .store
        .persist(&AffinityGroup {
            id: AffinityGroupId(1),
            name: "web-anti-affinity".into(),
            members: vec![VmId(3), VmId(4)],
        })
        .unwrap();

    let applied = harness
        .manager
        .vm_state_machine()
        .transition(vm.id.value(), VmEvent::ExpungeOperation, VmState::Stopped, None)
        .unwrap();
    assert!(applied);

    let group: AffinityGroup = harness.store.get(1).unwrap();
    assert_eq!(group.members, vec![VmId(4)]);
}

fn short_lease_harness() -> VmHarness {
    let mut config = test_config();
    config.lock.lease_ttl = Duration::from_millis(150);
    VmHarness::with_config(config)
}

#[tokio::test]
async fn test_vm_lock_lease_is_renewed_during_long_step() {
    let harness = Arc::new(short_lease_harness());
    harness
        .transport
        .delay("MigrateWithStorageReceive", Duration::from_millis(450));
    let (vm, volume) = harness.running_vm(1, SHARED_POOL_1, false);
    let plan = targets(&[(volume.id, SHARED_POOL_2)]);
    let vm_id = vm.id;

    let migration = {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .manager
                .migrate_with_storage(vm_id, HOST_2, &plan)
                .await
        })
    };

    // Well past one lease TTL, another node still cannot take the lock
    tokio::time::sleep(Duration::from_millis(300)).await;
    let other_node = LockManager::new(2, harness.store.clone(), harness.config.lock.clone());
    assert!(!other_node.get(&vm_lock_name(vm.id)).try_lock("scaler").unwrap());

    let migrated = migration.await.unwrap().unwrap();
    assert_eq!(migrated.host_id, Some(HOST_2));
    assert_eq!(only_work(&harness, vm.id).step, WorkStep::Done);
}

#[tokio::test]
async fn test_migration_stops_when_vm_lock_is_taken_over() {
    let harness = Arc::new(VmHarness::new());
    harness
        .transport
        .delay("MigrateWithStorageReceive", Duration::from_millis(300));
    let (vm, volume) = harness.running_vm(1, SHARED_POOL_1, false);
    let plan = targets(&[(volume.id, SHARED_POOL_2)]);
    let vm_id = vm.id;

    let migration = {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .manager
                .migrate_with_storage(vm_id, HOST_2, &plan)
                .await
        })
    };

    // Another node breaks the lease while the destination is receiving
    tokio::time::sleep(Duration::from_millis(100)).await;
    let name = vm_lock_name(vm.id);
    harness
        .store
        .mutate_keyed::<LockEntry, _, _>(LOCK_TABLE, &name, |row| {
            let current = row.clone().unwrap();
            *row = Some(LockEntry {
                name: name.clone(),
                holder: LockHolder {
                    node_id: 2,
                    owner: "scaler".into(),
                },
                count: 1,
                fencing_token: current.fencing_token + 1,
                acquired_at_ms: current.acquired_at_ms,
                deadline_ms: u64::MAX,
            });
        })
        .unwrap();

    let err = migration.await.unwrap().unwrap_err();
    assert!(matches!(err, NetplaneError::ConcurrentOperation { .. }));
    assert_eq!(harness.vm(vm.id).state, VmState::Running);
    assert_eq!(harness.vm(vm.id).host_id, Some(HOST_1));
    assert_eq!(harness.volume(volume.id).state, VolumeState::Ready);
    assert_eq!(only_work(&harness, vm.id).step, WorkStep::RolledBack);
    assert!(!harness
        .transport
        .sent_names()
        .contains(&"MigrateWithStorageSend".to_string()));
}
