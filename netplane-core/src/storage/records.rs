use super::store::Record;
use super::tables::*;
use crate::types::{
    AffinityGroup, Host, NetworkAclItem, StaticRoute, StoragePool, VmInstance, Volume,
};
use redb::TableDefinition;

macro_rules! impl_record {
    ($ty:ty, $table:expr, $kind:literal) => {
        impl Record for $ty {
            const TABLE: TableDefinition<'static, u64, &'static [u8]> = $table;
            const KIND: &'static str = $kind;

            fn key(&self) -> u64 {
                self.id.0
            }
        }
    };
}

impl_record!(VmInstance, VM_TABLE, "vm");
impl_record!(Volume, VOLUME_TABLE, "volume");
impl_record!(Host, HOST_TABLE, "host");
impl_record!(StoragePool, STORAGE_POOL_TABLE, "storage pool");
impl_record!(StaticRoute, STATIC_ROUTE_TABLE, "static route");
impl_record!(NetworkAclItem, NETWORK_ACL_ITEM_TABLE, "network acl item");
impl_record!(AffinityGroup, AFFINITY_GROUP_TABLE, "affinity group");
