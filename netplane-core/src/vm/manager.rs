use super::affinity::AffinityGroupCleanup;
use super::dispatcher::VmWorkJobDispatcher;
use super::work::{VmWork, VmWorkResult, WorkRecord, WorkStep};
use crate::agent::{AgentManager, Command, VmSpec, VolumeMigration};
use crate::config::NetplaneConfig;
use crate::error::{NetplaneError, NetplaneResult};
use crate::jobs::{AsyncJobManager, JobRequest};
use crate::lock::{GlobalLock, LockManager};
use crate::state_machine::{
    EntityStateMachine, TransitionToken, VmEvent, VmState, VolumeEvent, VolumeState,
};
use crate::storage::Store;
use crate::types::{
    new_uuid, Host, HostId, JobId, PoolId, ServiceOffering, StoragePool, VmId, VmInstance,
    Volume, VolumeId, WorkId,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Name the VM work dispatcher registers under
pub const VM_WORK_DISPATCHER: &str = "VmWorkJobDispatcher";

const VM_INSTANCE_TYPE: &str = "VirtualMachine";
const MIGRATE_WITH_STORAGE: &str = "migrate_with_storage";
const SCALE: &str = "scale_vm";

/// Name of the lock serializing operations on one VM
pub fn vm_lock_name(vm_id: VmId) -> String {
    format!("vm-operation-{}", vm_id.value())
}

/// This operation's hold on a VM lock.
///
/// Kept alive by a heartbeat while the operation runs and checked before
/// every state change, so a holder whose lease was broken stops there.
#[derive(Clone)]
struct VmLease {
    lock: Arc<GlobalLock>,
    owner: String,
    token: u64,
}

impl VmLease {
    fn check(&self) -> NetplaneResult<()> {
        if self.lock.validate_token(self.token)? {
            return Ok(());
        }
        Err(NetplaneError::concurrent(
            self.lock.name(),
            format!("lease with fencing token {} was lost", self.token),
        ))
    }
}

fn vm_spec(vm: &VmInstance, offering: &ServiceOffering) -> VmSpec {
    VmSpec {
        name: vm.name.clone(),
        uuid: vm.uuid.clone(),
        cpu: offering.cpu,
        speed_mhz: offering.speed_mhz,
        memory_mb: offering.memory_mb,
    }
}

/// Validated storage migration
struct MigrationPlan {
    vm: VmInstance,
    token: TransitionToken,
    volumes: Vec<VolumeMigration>,
}

/// Orchestrates multi-step VM operations.
///
/// Every operation runs under the VM's distributed lock, records its
/// progress in a [`WorkRecord`] and moves the VM and its volumes through
/// their state machines. Remote steps that fail are compensated so the VM
/// never stays `Migrating`.
pub struct VirtualMachineManager {
    node_id: u64,
    store: Store,
    locks: Arc<LockManager>,
    jobs: Arc<AsyncJobManager>,
    agents: AgentManager,
    vms: EntityStateMachine<VmInstance>,
    volumes: EntityStateMachine<Volume>,
    vm_work_queue: String,
}

impl VirtualMachineManager {
    /// Wire the manager and register its job dispatcher with `jobs`
    pub fn new(
        config: &NetplaneConfig,
        store: Store,
        locks: Arc<LockManager>,
        jobs: Arc<AsyncJobManager>,
        agents: AgentManager,
    ) -> Arc<Self> {
        let vms = EntityStateMachine::new(store.clone());
        vms.register_listener(Arc::new(AffinityGroupCleanup::new(store.clone())));

        let manager = Arc::new(Self {
            node_id: config.node_id,
            volumes: EntityStateMachine::new(store.clone()),
            store,
            locks,
            jobs,
            agents,
            vms,
            vm_work_queue: config.jobs.vm_work_queue.clone(),
        });
        manager
            .jobs
            .register_dispatcher(Arc::new(VmWorkJobDispatcher::new(Arc::downgrade(&manager))));
        manager
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn vm_state_machine(&self) -> &EntityStateMachine<VmInstance> {
        &self.vms
    }

    pub fn volume_state_machine(&self) -> &EntityStateMachine<Volume> {
        &self.volumes
    }

    pub fn get_vm(&self, vm_id: VmId) -> NetplaneResult<VmInstance> {
        self.store.get(vm_id.value())
    }

    pub fn vm_volumes(&self, vm_id: VmId) -> NetplaneResult<Vec<Volume>> {
        Ok(self
            .store
            .list::<Volume>()?
            .into_iter()
            .filter(|volume| volume.vm_id == Some(vm_id))
            .collect())
    }

    pub fn work_records(&self, vm_id: VmId) -> NetplaneResult<Vec<WorkRecord>> {
        Ok(self
            .store
            .list::<WorkRecord>()?
            .into_iter()
            .filter(|record| record.vm_id == vm_id)
            .collect())
    }

    /// Queue `work` on the VM work queue of its VM; runs after earlier work on the same VM
    pub fn submit_work(&self, work: &VmWork) -> NetplaneResult<JobId> {
        let vm_id = work.vm_id();
        self.get_vm(vm_id)?;

        let request = JobRequest::new(VM_WORK_DISPATCHER, work.command_name())
            .with_cmd_info(work)?
            .for_instance(VM_INSTANCE_TYPE, vm_id.value());
        let job_id = self
            .jobs
            .submit_async_job(request, &self.vm_work_queue, vm_id.value())?;
        info!(vm = %vm_id, job_id = %job_id, command = work.command_name(), "Submitted VM work");
        Ok(job_id)
    }

    pub(crate) async fn run_work(
        &self,
        work: VmWork,
        job: Option<JobId>,
    ) -> NetplaneResult<VmWorkResult> {
        let (vm, work_id) = match work {
            VmWork::MigrateWithStorage {
                vm_id,
                dest_host,
                volume_to_pool,
            } => {
                let volume_to_pool: BTreeMap<VolumeId, PoolId> =
                    volume_to_pool.into_iter().collect();
                self.migrate(vm_id, dest_host, &volume_to_pool, job).await?
            }
            VmWork::Scale {
                vm_id,
                service_offering,
            } => self.scale(vm_id, service_offering, job).await?,
        };
        Ok(VmWorkResult {
            vm_id: vm.id,
            work_id,
            state: vm.state,
            host_id: vm.host_id,
        })
    }

    /// Live-migrate a running VM to `dest_host`, moving the listed volumes
    /// to their target pools.
    ///
    /// Mixed shared/local moves and local targets for volumes whose disk
    /// offering does not allow local storage are rejected before any command
    /// is sent.
    pub async fn migrate_with_storage(
        &self,
        vm_id: VmId,
        dest_host: HostId,
        volume_to_pool: &BTreeMap<VolumeId, PoolId>,
    ) -> NetplaneResult<VmInstance> {
        let (vm, _) = self.migrate(vm_id, dest_host, volume_to_pool, None).await?;
        Ok(vm)
    }

    async fn migrate(
        &self,
        vm_id: VmId,
        dest_host: HostId,
        volume_to_pool: &BTreeMap<VolumeId, PoolId>,
        job: Option<JobId>,
    ) -> NetplaneResult<(VmInstance, WorkId)> {
        self.with_vm_lock(vm_id, MIGRATE_WITH_STORAGE, |lease| async move {
            let plan = self.plan_migration(vm_id, dest_host, volume_to_pool)?;
            self.execute_migration(plan, job, &lease).await
        })
        .await
    }

    fn plan_migration(
        &self,
        vm_id: VmId,
        dest_host: HostId,
        volume_to_pool: &BTreeMap<VolumeId, PoolId>,
    ) -> NetplaneResult<MigrationPlan> {
        let vm = self.get_vm(vm_id)?;
        if vm.state != VmState::Running {
            return Err(NetplaneError::invalid_operation(
                MIGRATE_WITH_STORAGE,
                format!("{} is {:?}, only running VMs can be live migrated", vm.id, vm.state),
            ));
        }
        let src_host = vm.host_id.ok_or_else(|| {
            NetplaneError::invalid_operation(
                MIGRATE_WITH_STORAGE,
                format!("{} is running without a host", vm.id),
            )
        })?;
        if src_host == dest_host {
            return Err(NetplaneError::invalid_operation(
                MIGRATE_WITH_STORAGE,
                format!("{} is already on {}", vm.id, dest_host),
            ));
        }
        let dest: Host = self.store.get(dest_host.value())?;

        let volumes = self.vm_volumes(vm.id)?;
        if let Some(stray) = volume_to_pool
            .keys()
            .find(|id| !volumes.iter().any(|volume| volume.id == **id))
        {
            return Err(NetplaneError::validation(
                "volume_to_pool",
                format!("{} is not attached to {}", stray, vm.id),
            ));
        }

        let mut migrations = Vec::new();
        for volume in &volumes {
            let source_pool: StoragePool = self.store.get(volume.pool_id.value())?;
            let dest_pool_id = match volume_to_pool.get(&volume.id) {
                Some(pool) if *pool != volume.pool_id => *pool,
                _ => {
                    if !source_pool.is_reachable_from(&dest) {
                        return Err(NetplaneError::invalid_operation(
                            MIGRATE_WITH_STORAGE,
                            format!(
                                "{} stays on {} which {} cannot reach",
                                volume.id, source_pool.id, dest.id
                            ),
                        ));
                    }
                    continue;
                }
            };
            let dest_pool: StoragePool = self.store.get(dest_pool_id.value())?;

            if source_pool.is_shared() != dest_pool.is_shared() {
                return Err(NetplaneError::vm_operation_failed(
                    MIGRATE_WITH_STORAGE,
                    format!(
                        "{} cannot move between shared and local storage ({} to {})",
                        volume.id, source_pool.id, dest_pool.id
                    ),
                ));
            }
            if dest_pool.is_local() && !volume.disk_offering.use_local_storage {
                return Err(NetplaneError::vm_operation_failed(
                    MIGRATE_WITH_STORAGE,
                    format!(
                        "disk offering {} of {} does not allow local storage pool {}",
                        volume.disk_offering.name, volume.id, dest_pool.id
                    ),
                ));
            }
            if !dest_pool.is_reachable_from(&dest) {
                return Err(NetplaneError::invalid_operation(
                    MIGRATE_WITH_STORAGE,
                    format!("{} is not reachable from {}", dest_pool.id, dest.id),
                ));
            }
            if volume.state != VolumeState::Ready {
                return Err(NetplaneError::invalid_operation(
                    MIGRATE_WITH_STORAGE,
                    format!("{} is {:?}, expected Ready", volume.id, volume.state),
                ));
            }

            migrations.push(VolumeMigration {
                volume_id: volume.id,
                volume_uuid: volume.uuid.clone(),
                source_pool: source_pool.id,
                dest_pool: dest_pool.id,
            });
        }

        Ok(MigrationPlan {
            token: TransitionToken::new(src_host, dest_host),
            vm,
            volumes: migrations,
        })
    }

    async fn execute_migration(
        &self,
        plan: MigrationPlan,
        job: Option<JobId>,
        lease: &VmLease,
    ) -> NetplaneResult<(VmInstance, WorkId)> {
        let vm_id = plan.vm.id;
        let token = plan.token;
        let spec = vm_spec(&plan.vm, &plan.vm.service_offering);
        let work = WorkRecord::create(
            &self.store,
            vm_id,
            MIGRATE_WITH_STORAGE,
            WorkStep::Prepare,
            self.node_id,
            job,
        )?;
        info!(
            vm = %vm_id,
            work = %work.id,
            src = %token.src_host,
            dest = %token.dest_host,
            volumes = plan.volumes.len(),
            "Starting storage live migration"
        );

        let prepare = Command::PrepareForMigration { vm: spec.clone() };
        if let Err(e) = self.run_step(token.dest_host, prepare).await {
            warn!(vm = %vm_id, error = %e, "Destination refused to prepare for migration");
            self.finish_work(work.id, WorkStep::RolledBack, Some(e.to_string()));
            return Err(e);
        }

        let moved = lease.check().and_then(|_| {
            self.vms.transition(
                vm_id.value(),
                VmEvent::MigrationRequested,
                VmState::Running,
                Some(&token),
            )
        });
        match moved {
            Ok(true) => {}
            Ok(false) => {
                let e = NetplaneError::concurrent(
                    vm_id.to_string(),
                    "VM state changed before migration started",
                );
                self.finish_work(work.id, WorkStep::RolledBack, Some(e.to_string()));
                return Err(e);
            }
            Err(e) => {
                self.finish_work(work.id, WorkStep::RolledBack, Some(e.to_string()));
                return Err(e);
            }
        }

        let mut migrating = Vec::with_capacity(plan.volumes.len());
        let steps = self
            .run_migration_steps(&plan, &spec, work.id, lease, &mut migrating)
            .await
            .and_then(|_| lease.check());
        if let Err(e) = steps {
            self.roll_back_migration(vm_id, &token, &migrating, work.id, &e);
            return Err(e);
        }

        self.commit_migration(&plan, work.id)
    }

    async fn run_migration_steps(
        &self,
        plan: &MigrationPlan,
        spec: &VmSpec,
        work_id: WorkId,
        lease: &VmLease,
        migrating: &mut Vec<VolumeId>,
    ) -> NetplaneResult<()> {
        lease.check()?;
        for volume in &plan.volumes {
            let moved = self.volumes.transition(
                volume.volume_id.value(),
                VolumeEvent::MigrationRequested,
                VolumeState::Ready,
                None,
            )?;
            if !moved {
                return Err(NetplaneError::concurrent(
                    volume.volume_id.to_string(),
                    "volume state changed before migration started",
                ));
            }
            migrating.push(volume.volume_id);
        }
        WorkRecord::advance(&self.store, work_id, WorkStep::Migrating, None)?;

        let (src, dest) = (plan.token.src_host, plan.token.dest_host);
        let steps = [
            (
                dest,
                Command::MigrateWithStorageReceive {
                    vm: spec.clone(),
                    volumes: plan.volumes.clone(),
                },
            ),
            (
                src,
                Command::MigrateWithStorageSend {
                    vm: spec.clone(),
                    dest_host: dest,
                    volumes: plan.volumes.clone(),
                },
            ),
            (
                dest,
                Command::MigrateWithStorageComplete {
                    vm: spec.clone(),
                    volumes: plan.volumes.clone(),
                },
            ),
            (
                dest,
                Command::CheckVirtualMachine {
                    vm_name: spec.name.clone(),
                },
            ),
        ];
        for (host, command) in steps {
            lease.check()?;
            self.run_step(host, command).await?;
        }
        Ok(())
    }

    fn commit_migration(
        &self,
        plan: &MigrationPlan,
        work_id: WorkId,
    ) -> NetplaneResult<(VmInstance, WorkId)> {
        for volume in &plan.volumes {
            let dest_pool = volume.dest_pool;
            self.store
                .update_if::<Volume, _>(volume.volume_id.value(), |record| {
                    if record.state != VolumeState::Migrating {
                        return false;
                    }
                    record.pool_id = dest_pool;
                    true
                })?;
            let settled = self.volumes.transition(
                volume.volume_id.value(),
                VolumeEvent::OperationSucceeded,
                VolumeState::Migrating,
                None,
            )?;
            if !settled {
                warn!(volume = %volume.volume_id, "Volume left Migrating before the migration committed");
            }
        }

        self.complete_migration(plan.vm.id, plan.token)?;
        let vm = self.get_vm(plan.vm.id)?;
        if vm.state != VmState::Running || vm.host_id != Some(plan.token.dest_host) {
            let e = NetplaneError::concurrent(
                vm.id.to_string(),
                format!("VM is {:?} on {:?} after migration", vm.state, vm.host_id),
            );
            self.finish_work(work_id, WorkStep::RolledBack, Some(e.to_string()));
            return Err(e);
        }

        WorkRecord::advance(&self.store, work_id, WorkStep::Done, None)?;
        info!(vm = %vm.id, host = %plan.token.dest_host, work = %work_id, "Storage live migration completed");
        Ok((vm, work_id))
    }

    /// Finish the migration identified by `token`.
    ///
    /// Returns false when no matching migration is in flight, which makes
    /// duplicate completion notifications harmless.
    pub fn complete_migration(&self, vm_id: VmId, token: TransitionToken) -> NetplaneResult<bool> {
        let applied = self.vms.transition(
            vm_id.value(),
            VmEvent::OperationSucceeded,
            VmState::Migrating,
            Some(&token),
        )?;
        if !applied {
            debug!(
                vm = %vm_id,
                src = %token.src_host,
                dest = %token.dest_host,
                "Ignoring completion of a migration that is not in flight"
            );
        }
        Ok(applied)
    }

    fn roll_back_migration(
        &self,
        vm_id: VmId,
        token: &TransitionToken,
        migrating: &[VolumeId],
        work_id: WorkId,
        reason: &NetplaneError,
    ) {
        warn!(vm = %vm_id, work = %work_id, error = %reason, "Storage migration failed, rolling back");

        for volume_id in migrating {
            match self.volumes.transition(
                volume_id.value(),
                VolumeEvent::OperationFailed,
                VolumeState::Migrating,
                None,
            ) {
                Ok(true) => {}
                Ok(false) => warn!(volume = %volume_id, "Volume no longer Migrating during rollback"),
                Err(e) => warn!(volume = %volume_id, error = %e, "Unable to roll back volume"),
            }
        }

        match self.vms.transition(
            vm_id.value(),
            VmEvent::OperationFailed,
            VmState::Migrating,
            Some(token),
        ) {
            Ok(true) => {}
            Ok(false) => warn!(vm = %vm_id, "VM no longer Migrating during rollback"),
            Err(e) => warn!(vm = %vm_id, error = %e, "Unable to roll back VM state"),
        }

        self.finish_work(work_id, WorkStep::RolledBack, Some(reason.to_string()));
    }

    /// Change the service offering of `vm_id`.
    ///
    /// Stopped VMs only get the new offering recorded. Running VMs must allow
    /// dynamic scaling and can only grow.
    pub async fn scale_vm(
        &self,
        vm_id: VmId,
        offering: ServiceOffering,
    ) -> NetplaneResult<VmInstance> {
        let (vm, _) = self.scale(vm_id, offering, None).await?;
        Ok(vm)
    }

    async fn scale(
        &self,
        vm_id: VmId,
        offering: ServiceOffering,
        job: Option<JobId>,
    ) -> NetplaneResult<(VmInstance, WorkId)> {
        self.with_vm_lock(vm_id, SCALE, |lease| async move {
            self.scale_locked(vm_id, offering, job, &lease).await
        })
        .await
    }

    async fn scale_locked(
        &self,
        vm_id: VmId,
        offering: ServiceOffering,
        job: Option<JobId>,
        lease: &VmLease,
    ) -> NetplaneResult<(VmInstance, WorkId)> {
        let vm = self.get_vm(vm_id)?;
        let current = &vm.service_offering;
        match vm.state {
            VmState::Stopped => {}
            VmState::Running => {
                if !current.dynamic_scaling {
                    return Err(NetplaneError::invalid_operation(
                        SCALE,
                        format!("{} does not allow dynamic scaling", current.name),
                    ));
                }
                if offering.cpu < current.cpu
                    || offering.speed_mhz < current.speed_mhz
                    || offering.memory_mb < current.memory_mb
                {
                    return Err(NetplaneError::invalid_operation(
                        SCALE,
                        format!("running {} can only be scaled up", vm.id),
                    ));
                }
            }
            other => {
                return Err(NetplaneError::invalid_operation(
                    SCALE,
                    format!("{} is {:?}", vm.id, other),
                ));
            }
        }

        let work = WorkRecord::create(
            &self.store,
            vm.id,
            SCALE,
            WorkStep::Scaling,
            self.node_id,
            job,
        )?;

        if vm.state == VmState::Running {
            let host = vm.host_id.ok_or_else(|| {
                NetplaneError::invalid_operation(SCALE, format!("{} is running without a host", vm.id))
            })?;
            let command = Command::ScaleVm {
                vm: vm_spec(&vm, &offering),
            };
            let outcome = match self.agents.send(host, &command).await {
                Ok(answer) if answer.success => Ok(()),
                Ok(answer) => Err(NetplaneError::vm_operation_failed(
                    command.name(),
                    answer.details.unwrap_or_else(|| "rejected by agent".to_string()),
                )),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                warn!(vm = %vm.id, error = %e, "Scaling failed");
                self.finish_work(work.id, WorkStep::RolledBack, Some(e.to_string()));
                return Err(e);
            }
        }

        if let Err(e) = lease.check() {
            warn!(vm = %vm.id, error = %e, "VM lock lost while scaling");
            self.finish_work(work.id, WorkStep::RolledBack, Some(e.to_string()));
            return Err(e);
        }

        let (expected_state, expected_version) = (vm.state, vm.version);
        let offering_name = offering.name.clone();
        let updated = self.store.update_if::<VmInstance, _>(vm.id.value(), |record| {
            if record.state != expected_state || record.version != expected_version {
                return false;
            }
            record.service_offering = offering;
            record.version += 1;
            record.updated_at = Utc::now();
            true
        })?;

        match updated {
            Some(vm) => {
                WorkRecord::advance(&self.store, work.id, WorkStep::Done, None)?;
                info!(vm = %vm.id, offering = %offering_name, work = %work.id, "VM scaled");
                Ok((vm, work.id))
            }
            None => {
                let e = NetplaneError::concurrent(
                    vm_id.to_string(),
                    "VM changed while scaling; offering not recorded",
                );
                self.finish_work(work.id, WorkStep::RolledBack, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Roll back work this node left unfinished, e.g. after a crash.
    ///
    /// VMs stuck in `Migrating` return to `Running` and their volumes to
    /// `Ready`. Returns the number of work records rolled back.
    pub fn recover_interrupted_work(&self) -> NetplaneResult<usize> {
        let mut recovered = 0;
        for record in self.store.list::<WorkRecord>()? {
            if record.owner_node != self.node_id || record.step.is_finished() {
                continue;
            }

            if let Some(vm) = self.store.find::<VmInstance>(record.vm_id.value())? {
                if vm.state == VmState::Migrating {
                    self.vms.transition(
                        vm.id.value(),
                        VmEvent::OperationFailed,
                        VmState::Migrating,
                        vm.pending_migration.as_ref(),
                    )?;
                }
            }
            for volume in self.vm_volumes(record.vm_id)? {
                if volume.state == VolumeState::Migrating {
                    self.volumes.transition(
                        volume.id.value(),
                        VolumeEvent::OperationFailed,
                        VolumeState::Migrating,
                        None,
                    )?;
                }
            }

            WorkRecord::advance(
                &self.store,
                record.id,
                WorkStep::RolledBack,
                Some("interrupted by management server restart".to_string()),
            )?;
            warn!(vm = %record.vm_id, work = %record.id, step = %record.step, "Rolled back interrupted VM work");
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn run_step(&self, host: HostId, command: Command) -> NetplaneResult<()> {
        let timeout = self.agents.config().migration_step_timeout;
        let answer = self
            .agents
            .send_with_timeout(host, &command, timeout)
            .await?;
        if !answer.success {
            return Err(NetplaneError::vm_operation_failed(
                command.name(),
                answer
                    .details
                    .unwrap_or_else(|| format!("rejected by {}", host)),
            ));
        }
        debug!(host = %host, command = command.name(), "Migration step succeeded");
        Ok(())
    }

    fn finish_work(&self, work_id: WorkId, step: WorkStep, details: Option<String>) {
        if let Err(e) = WorkRecord::advance(&self.store, work_id, step, details) {
            warn!(work = %work_id, step = %step, error = %e, "Unable to update work record");
        }
    }

    async fn with_vm_lock<T, F, Fut>(
        &self,
        vm_id: VmId,
        operation: &str,
        work: F,
    ) -> NetplaneResult<T>
    where
        F: FnOnce(VmLease) -> Fut,
        Fut: Future<Output = NetplaneResult<T>>,
    {
        let lock = self.locks.get(&vm_lock_name(vm_id));
        let owner = new_uuid();
        if !lock.acquire(&owner, self.locks.default_timeout()).await? {
            warn!(vm = %vm_id, operation, lock = lock.name(), "Timed out waiting for VM lock");
            return Err(NetplaneError::concurrent(
                vm_id.to_string(),
                format!("another operation holds {}", lock.name()),
            ));
        }

        let result = match lock.fencing_token(&owner) {
            Ok(Some(token)) => {
                let lease = VmLease {
                    lock: lock.clone(),
                    owner: owner.clone(),
                    token,
                };
                self.hold_lease(vm_id, operation, &lease, work(lease.clone()))
                    .await
            }
            Ok(None) => Err(NetplaneError::concurrent(
                vm_id.to_string(),
                format!("{} expired right after acquisition", lock.name()),
            )),
            Err(e) => Err(e),
        };

        if let Err(e) = lock.release(&owner) {
            warn!(vm = %vm_id, operation, error = %e, "Unable to release VM lock");
        }
        result
    }

    /// Drive `work` while renewing the lease every third of its TTL
    async fn hold_lease<T>(
        &self,
        vm_id: VmId,
        operation: &str,
        lease: &VmLease,
        work: impl Future<Output = NetplaneResult<T>>,
    ) -> NetplaneResult<T> {
        let period = (self.locks.lease_ttl() / 3).max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(work);

        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = heartbeat.tick() => match lease.lock.renew(&lease.owner) {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(vm = %vm_id, operation, token = lease.token, "VM lock lease lost");
                    }
                    Err(e) => {
                        warn!(vm = %vm_id, operation, error = %e, "Unable to renew VM lock lease");
                    }
                },
            }
        }
    }
}
