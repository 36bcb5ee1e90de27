//! Plugin registration table.
//!
//! Built once by the gateway builder and never mutated afterwards apart from
//! the per-protocol lifecycle state.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use protogate_config::Settings;

use super::{ClientPlugin, PluginState, ServerPlugin};
use crate::executor::RoleExecutor;
use crate::message::Protocol;

/// A started plugin together with its settings and executor.
pub(crate) struct RoleSlot<P: ?Sized> {
    pub(crate) plugin: Arc<P>,
    pub(crate) settings: Settings,
    pub(crate) executor: RoleExecutor,
}

/// Everything registered for one protocol.
pub(crate) struct PluginRecord {
    pub(crate) client: Option<RoleSlot<dyn ClientPlugin>>,
    pub(crate) server: Option<RoleSlot<dyn ServerPlugin>>,
    state: Mutex<PluginState>,
}

impl PluginRecord {
    pub(crate) fn new(
        client: Option<RoleSlot<dyn ClientPlugin>>,
        server: Option<RoleSlot<dyn ServerPlugin>>,
    ) -> Self {
        Self {
            client,
            server,
            state: Mutex::new(PluginState::Registered),
        }
    }

    pub(crate) fn state(&self) -> PluginState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: PluginState) {
        *self.state.lock() = state;
    }
}

/// Protocol → registration record, ordered by protocol name.
#[derive(Default)]
pub(crate) struct PluginTable {
    records: BTreeMap<Protocol, PluginRecord>,
}

impl PluginTable {
    pub(crate) fn insert(&mut self, protocol: Protocol, record: PluginRecord) {
        self.records.insert(protocol, record);
    }

    pub(crate) fn get(&self, protocol: &Protocol) -> Option<&PluginRecord> {
        self.records.get(protocol)
    }

    pub(crate) fn client(&self, protocol: &Protocol) -> Option<&RoleSlot<dyn ClientPlugin>> {
        self.get(protocol).and_then(|record| record.client.as_ref())
    }

    pub(crate) fn server(&self, protocol: &Protocol) -> Option<&RoleSlot<dyn ServerPlugin>> {
        self.get(protocol).and_then(|record| record.server.as_ref())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Protocol, &PluginRecord)> {
        self.records.iter()
    }

    pub(crate) fn protocols(&self) -> impl Iterator<Item = &Protocol> {
        self.records.keys()
    }
}
