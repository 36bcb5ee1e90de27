//! Gateway assembly and lifecycle.
//!
//! [`GatewayBuilder`] collects plugins, pipeline stages and collaborators.
//! [`GatewayBuilder::start`] freezes the registration table, spawns one
//! executor per protocol and role, starts the plugins and launches the idle
//! sweeper. The returned [`Gateway`] stops everything on [`Gateway::stop`]
//! or when dropped.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use protogate_config::{Config, Settings};

use super::pipeline::{Core, CoreParts};
use super::stage::Stage;
use super::{DISPATCH_TARGET, GatewayError};
use crate::cache::{NoCache, ReplyCache};
use crate::clock::{Clock, SystemClock};
use crate::executor::{ExecutorError, RoleExecutor};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::message::Protocol;
use crate::plugin::{
    ClientPlugin, PluginError, PluginRecord, PluginRole, PluginState, PluginTable, ReplyLink,
    RoleSlot, ServerLink, ServerPlugin,
};
use crate::reply_store::ReplyStore;

/// Collects everything a gateway needs before it starts.
pub struct GatewayBuilder {
    config: Config,
    clients: BTreeMap<Protocol, (Arc<dyn ClientPlugin>, Settings)>,
    servers: BTreeMap<Protocol, (Arc<dyn ServerPlugin>, Settings)>,
    cache: Arc<dyn ReplyCache>,
    input_stages: Vec<Arc<dyn Stage>>,
    output_stages: Vec<Arc<dyn Stage>>,
    reporter: Arc<dyn HealthReporter>,
    clock: Arc<dyn Clock>,
}

impl GatewayBuilder {
    /// Creates a builder using `config` for timings and executor sizing.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            clients: BTreeMap::new(),
            servers: BTreeMap::new(),
            cache: Arc::new(NoCache),
            input_stages: Vec::new(),
            output_stages: Vec::new(),
            reporter: Arc::new(StructuredHealthReporter::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Registers the client-role plugin of its protocol.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DuplicatePlugin`] when the protocol already has
    /// a client plugin and [`GatewayError::InvalidProtocol`] when the plugin
    /// names no protocol.
    pub fn register_client(
        &mut self,
        plugin: Arc<dyn ClientPlugin>,
        settings: Settings,
    ) -> Result<&mut Self, GatewayError> {
        register(&mut self.clients, PluginRole::Client, plugin.protocol(), (plugin, settings))?;
        Ok(self)
    }

    /// Registers the server-role plugin of its protocol.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DuplicatePlugin`] when the protocol already has
    /// a server plugin and [`GatewayError::InvalidProtocol`] when the plugin
    /// names no protocol.
    pub fn register_server(
        &mut self,
        plugin: Arc<dyn ServerPlugin>,
        settings: Settings,
    ) -> Result<&mut Self, GatewayError> {
        register(&mut self.servers, PluginRole::Server, plugin.protocol(), (plugin, settings))?;
        Ok(self)
    }

    /// Replaces the default [`NoCache`] strategy.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ReplyCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Appends a stage run before routing.
    #[must_use]
    pub fn with_input_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.input_stages.push(stage);
        self
    }

    /// Appends a stage run after routing.
    #[must_use]
    pub fn with_output_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.output_stages.push(stage);
        self
    }

    /// Replaces the default tracing-backed health reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn HealthReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Starts executors, plugins and the idle sweeper.
    ///
    /// Client plugins start before server plugins so that no request can be
    /// submitted before its target is able to take it. If any plugin fails
    /// to start, every plugin already started is stopped again.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] for unusable timings,
    /// [`GatewayError::Executor`] when a thread cannot be spawned and
    /// [`GatewayError::PluginStart`] when a plugin refuses to start.
    pub fn start(self) -> Result<Gateway, GatewayError> {
        self.config.validate()?;
        let Self {
            config,
            mut clients,
            mut servers,
            cache,
            input_stages,
            output_stages,
            reporter,
            clock,
        } = self;

        let backlog = config.executor_backlog();
        let mut plugins = PluginTable::default();
        let protocols: Vec<Protocol> = clients.keys().chain(servers.keys()).cloned().collect();
        for protocol in protocols {
            if plugins.get(&protocol).is_some() {
                continue;
            }
            let client = role_slot(
                clients.remove(&protocol),
                format!("gw-client-{protocol}"),
                backlog,
            )?;
            let server = role_slot(
                servers.remove(&protocol),
                format!("gw-server-{protocol}"),
                backlog,
            )?;
            plugins.insert(protocol, PluginRecord::new(client, server));
        }

        let core = Arc::new(Core::new(CoreParts {
            replies: ReplyStore::with_clock(config.idle_threshold(), clock),
            cache,
            plugins,
            input_stages,
            output_stages,
            reporter,
            reply_timeout: config.reply_timeout(),
        }));

        if let Err(error) = launch(&core) {
            core.halt();
            drain_executors(&core);
            return Err(error);
        }
        let gateway = Gateway {
            core,
            sweeper: Mutex::new(None),
        };
        let sweeper = Sweeper::spawn(&gateway.core, config.sweep_interval())?;
        *gateway.sweeper.lock() = Some(sweeper);
        Ok(gateway)
    }
}

/// A started gateway.
pub struct Gateway {
    core: Arc<Core>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl Gateway {
    /// Lifecycle state of `protocol`, if registered.
    #[must_use]
    pub fn state(&self, protocol: &Protocol) -> Option<PluginState> {
        self.core.plugins().get(protocol).map(PluginRecord::state)
    }

    /// Registered protocols, in name order.
    #[must_use]
    pub fn protocols(&self) -> Vec<Protocol> {
        self.core.plugins().protocols().cloned().collect()
    }

    /// Whether the gateway still accepts submissions.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    /// Number of waiters currently registered in the reply store.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.core.replies().len()
    }

    /// Number of resources somebody currently holds interest in.
    #[must_use]
    pub fn interests(&self) -> usize {
        self.core.registry().len()
    }

    /// Runs an idle sweep immediately and returns the number of cancelled
    /// waiters.
    pub fn sweep_now(&self) -> usize {
        self.core.sweep()
    }

    /// Stops the plugins and drains their executors.
    ///
    /// Server plugins stop first so that no new request arrives while the
    /// client plugins shut down. Calling `stop` again has no effect.
    pub fn stop(&self) {
        if !self.core.halt() {
            return;
        }
        let sweeper = self.sweeper.lock().take();
        if let Some(running) = sweeper {
            running.stop();
        }
        let plugins = self.core.plugins();
        for (_, record) in plugins.iter() {
            record.set_state(PluginState::Stopping);
        }
        for (protocol, record) in plugins.iter() {
            if let Some(slot) = &record.server {
                stop_plugin(&self.core, protocol, PluginRole::Server, || slot.plugin.stop());
            }
        }
        for (protocol, record) in plugins.iter() {
            if let Some(slot) = &record.client {
                stop_plugin(&self.core, protocol, PluginRole::Client, || slot.plugin.stop());
            }
        }
        drain_executors(&self.core);
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.stop();
    }
}

fn register<P: ?Sized>(
    table: &mut BTreeMap<Protocol, (Arc<P>, Settings)>,
    role: PluginRole,
    protocol: Protocol,
    entry: (Arc<P>, Settings),
) -> Result<(), GatewayError> {
    if protocol.is_empty() {
        return Err(GatewayError::InvalidProtocol);
    }
    match table.entry(protocol) {
        Entry::Occupied(occupied) => Err(GatewayError::duplicate(occupied.key().clone(), role)),
        Entry::Vacant(vacant) => {
            debug!(
                target: DISPATCH_TARGET,
                protocol = %vacant.key(),
                role = %role,
                "plugin registered"
            );
            vacant.insert(entry);
            Ok(())
        }
    }
}

fn role_slot<P: ?Sized>(
    entry: Option<(Arc<P>, Settings)>,
    name: String,
    backlog: usize,
) -> Result<Option<RoleSlot<P>>, ExecutorError> {
    entry
        .map(|(plugin, settings)| {
            RoleExecutor::spawn(name, backlog).map(|executor| RoleSlot {
                plugin,
                settings,
                executor,
            })
        })
        .transpose()
}

/// Starts every client plugin, then every server plugin. On failure the
/// plugins already started are stopped in reverse order.
fn launch(core: &Arc<Core>) -> Result<(), GatewayError> {
    let mut started: Vec<(Protocol, PluginRole)> = Vec::new();
    let outcome = start_role(core, PluginRole::Client, &mut started)
        .and_then(|()| start_role(core, PluginRole::Server, &mut started));

    if let Err(error) = outcome {
        for (protocol, role) in started.iter().rev() {
            let Some(record) = core.plugins().get(protocol) else {
                continue;
            };
            match role {
                PluginRole::Client => {
                    if let Some(slot) = &record.client {
                        stop_plugin(core, protocol, *role, || slot.plugin.stop());
                    }
                }
                PluginRole::Server => {
                    if let Some(slot) = &record.server {
                        stop_plugin(core, protocol, *role, || slot.plugin.stop());
                    }
                }
            }
        }
        return Err(error);
    }

    for (_, record) in core.plugins().iter() {
        record.set_state(PluginState::Started);
    }
    Ok(())
}

fn start_role(
    core: &Arc<Core>,
    role: PluginRole,
    started: &mut Vec<(Protocol, PluginRole)>,
) -> Result<(), GatewayError> {
    for (protocol, record) in core.plugins().iter() {
        let registered = match role {
            PluginRole::Client => record.client.is_some(),
            PluginRole::Server => record.server.is_some(),
        };
        if !registered {
            continue;
        }
        core.reporter().plugin_starting(protocol, role);
        let result = guarded_start(|| match role {
            PluginRole::Client => record.client.as_ref().map_or(Ok(()), |slot| {
                slot.plugin
                    .start(ReplyLink::new(core, protocol.clone()), &slot.settings)
            }),
            PluginRole::Server => record.server.as_ref().map_or(Ok(()), |slot| {
                slot.plugin
                    .start(ServerLink::new(core, protocol.clone()), &slot.settings)
            }),
        });
        if let Err(error) = result {
            core.reporter().plugin_failed(protocol, role, &error);
            return Err(GatewayError::plugin_start(protocol.clone(), role, error));
        }
        core.reporter().plugin_started(protocol, role);
        started.push((protocol.clone(), role));
    }
    Ok(())
}

fn guarded_start(start: impl FnOnce() -> Result<(), PluginError>) -> Result<(), PluginError> {
    panic::catch_unwind(AssertUnwindSafe(start))
        .unwrap_or_else(|_| Err(PluginError::start("panicked during start")))
}

fn stop_plugin(core: &Core, protocol: &Protocol, role: PluginRole, stop: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(stop)).is_err() {
        warn!(
            target: DISPATCH_TARGET,
            protocol = %protocol,
            role = %role,
            "plugin panicked while stopping"
        );
    }
    core.reporter().plugin_stopped(protocol, role);
}

fn drain_executors(core: &Core) {
    for (_, record) in core.plugins().iter() {
        let executors = record
            .server
            .as_ref()
            .map(|slot| &slot.executor)
            .into_iter()
            .chain(record.client.as_ref().map(|slot| &slot.executor));
        for executor in executors {
            if let Err(error) = executor.shutdown() {
                warn!(
                    target: DISPATCH_TARGET,
                    executor = %executor.name(),
                    error = %error,
                    "executor did not shut down cleanly"
                );
            }
        }
        record.set_state(PluginState::Stopped);
    }
}

/// Background thread running periodic idle sweeps.
struct Sweeper {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    fn spawn(core: &Arc<Core>, interval: Duration) -> Result<Self, GatewayError> {
        let (shutdown, signal) = mpsc::channel::<()>();
        let weak: Weak<Core> = Arc::downgrade(core);
        let handle = thread::Builder::new()
            .name("gw-sweeper".to_owned())
            .spawn(move || {
                while let Err(RecvTimeoutError::Timeout) = signal.recv_timeout(interval) {
                    let Some(core) = weak.upgrade() else {
                        break;
                    };
                    core.sweep();
                }
                debug!(target: DISPATCH_TARGET, "sweeper stopped");
            })
            .map_err(|source| ExecutorError::Spawn {
                name: "gw-sweeper".to_owned(),
                source: Arc::new(source),
            })?;
        Ok(Self { shutdown, handle })
    }

    fn stop(self) {
        drop(self.shutdown);
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            warn!(target: DISPATCH_TARGET, "sweeper thread panicked");
        }
    }
}
