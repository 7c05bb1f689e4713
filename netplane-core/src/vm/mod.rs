//! VM migration and scaling workflow
//!
//! [`VirtualMachineManager`] combines the distributed lock (one operation per
//! VM), work records (durable progress markers), the VM and volume state
//! machines and the agent transport. Work can also be queued through the
//! async job store, where [`VmWorkJobDispatcher`] picks it up.

mod affinity;
mod dispatcher;
mod manager;
mod work;

pub use affinity::AffinityGroupCleanup;
pub use dispatcher::VmWorkJobDispatcher;
pub use manager::{vm_lock_name, VirtualMachineManager, VM_WORK_DISPATCHER};
pub use work::{VmWork, VmWorkResult, WorkRecord, WorkStep};
