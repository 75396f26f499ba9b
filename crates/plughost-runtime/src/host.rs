//! The instance host.
//!
//! [`InstanceHost`] owns every plug-in instance of the process. It:
//!
//! - Admits new instances up to `max_executing_instances`.
//! - Loads each instance's code into the load context of its package, shared
//!   by all active instances of that package, and builds the plug-in.
//! - Runs every plug-in as its own Tokio task and records how it ended.
//! - Unloads a package's context once none of its instances is active.
//! - Broadcasts an [`InstanceStateChanged`] for every transition.
//!
//! ```text
//! create ──► None ──start──► Starting ──► Running ──┬──► Complete
//!                     │                             └──► Faulted
//!                     └── build failure ──► Faulted
//! ```
//!
//! All host state sits behind one mutex that is never held across an
//! `.await`. Notifications are sent while it is held, so observers see the
//! transitions of an instance in order.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use futures::FutureExt;
use futures::future;
use parking_lot::Mutex;
use plughost_core::{BoxedPlugIn, DevicePublisher, LogSink};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::builder::{BuiltPlugIn, PlugInBuilder};
use crate::config::HostConfig;
use crate::error::{HostError, HostResult};
use crate::execution::ExecutionContext;
use crate::instance::{
    Fault, FaultKind, Instance, InstanceConfiguration, InstanceDefinition, InstanceId,
    InstanceInfo, InstanceState, InstanceStateChanged, PlugInId,
};
use crate::load::{LoadContext, LoadContextHandle, NativeUnitLoader, UnitLoader};
use crate::store::{DirectoryFileStore, FileStore};
use crate::updates::DeviceUpdateSender;

#[derive(Default)]
struct HostState {
    /// Insertion order.
    instances: Vec<Instance>,
    packages: HashMap<PlugInId, LoadContextHandle>,
}

impl HostState {
    fn resolve(&self, id: InstanceId) -> HostResult<usize> {
        self.instances
            .iter()
            .position(|instance| instance.id == id)
            .ok_or(HostError::InstanceNotFound(id))
    }

    /// Whether an instance of the package other than `except` is active.
    fn package_in_use(&self, plug_in_id: PlugInId, except: InstanceId) -> bool {
        self.instances
            .iter()
            .any(|i| i.plug_in_id == plug_in_id && i.id != except && i.is_active())
    }

    /// Removes the package's handle if nothing else uses it.
    fn evict_package(&mut self, plug_in_id: PlugInId, except: InstanceId) -> Option<LoadContextHandle> {
        if self.package_in_use(plug_in_id, except) {
            return None;
        }
        self.packages.remove(&plug_in_id)
    }
}

struct HostInner {
    state: Mutex<HostState>,
    config: HostConfig,
    builder: PlugInBuilder,
    loader: Arc<dyn UnitLoader>,
    store: Option<Arc<dyn FileStore>>,
    updates: Option<DeviceUpdateSender>,
    events: broadcast::Sender<InstanceStateChanged>,
}

impl HostInner {
    fn emit(&self, instance: &Instance) {
        trace!(
            instance_id = instance.id,
            plug_in_id = instance.plug_in_id,
            state = %instance.state,
            "Instance state changed"
        );
        // no subscribers is fine
        let _ = self.events.send(instance.changed());
    }

    fn publisher(&self, instance_id: InstanceId, plug_in_id: PlugInId) -> DevicePublisher {
        match &self.updates {
            Some(sender) => sender.publisher(instance_id, plug_in_id),
            None => DevicePublisher::detached(),
        }
    }

    /// Returns the package's load context, creating it on first use.
    fn package_context(
        &self,
        state: &mut HostState,
        plug_in_id: PlugInId,
        path: &Path,
    ) -> HostResult<Arc<LoadContext>> {
        let existing = state
            .packages
            .get(&plug_in_id)
            .and_then(|handle| handle.target().ok())
            .filter(|context| !context.is_unloading());
        if let Some(context) = existing {
            return Ok(context);
        }

        let root = path.parent().map(|p| p.to_path_buf());
        let handle = LoadContextHandle::new(LoadContext::new(
            format!("package-{plug_in_id}"),
            root,
            Arc::clone(&self.loader),
        ));
        let context = handle.target()?;
        debug!(plug_in_id, context = %handle.name(), "Created load context");
        state.packages.insert(plug_in_id, handle);
        Ok(context)
    }

    /// Moves the instance to `Starting` with fresh run tokens.
    fn reserve(&self, instance: &mut Instance) -> u64 {
        instance.run += 1;
        instance.state = InstanceState::Starting;
        instance.start_time = Some(SystemTime::now());
        instance.stop_time = None;
        instance.fault = None;
        instance.execution = Some(ExecutionContext::new());
        info!(
            instance_id = instance.id,
            plug_in_id = instance.plug_in_id,
            "Instance starting"
        );
        self.emit(instance);
        instance.run
    }

    /// Records a failed start and releases what the attempt held.
    fn fail_start(&self, state: &mut HostState, index: usize, fault: Fault) {
        let instance = &mut state.instances[index];
        let (id, plug_in_id) = (instance.id, instance.plug_in_id);
        instance.state = InstanceState::Faulted;
        instance.stop_time = Some(SystemTime::now());
        instance.fault = Some(fault);
        let execution = instance.execution.take();
        self.emit(instance);

        if let Some(handle) = state.evict_package(plug_in_id, id) {
            drop(self.release(handle));
        }
        if let Some(execution) = execution {
            let completed = execution.completed().clone();
            execution.dispose();
            completed.cancel();
        }
    }

    /// Unloads `handle` on a blocking thread.
    fn release(&self, mut handle: LoadContextHandle) -> tokio::task::JoinHandle<bool> {
        let attempts = self.config.unload_attempts;
        let interval = self.config.unload_interval();
        tokio::task::spawn_blocking(move || handle.unload(attempts, interval))
    }

    fn mark_running(&self, id: InstanceId, run: u64) {
        let mut state = self.state.lock();
        let Ok(index) = state.resolve(id) else {
            return;
        };
        let instance = &mut state.instances[index];
        if instance.run != run || instance.state != InstanceState::Starting {
            return;
        }
        instance.state = InstanceState::Running;
        info!(instance_id = id, plug_in_id = instance.plug_in_id, "Instance running");
        self.emit(instance);
    }

    fn complete(
        &self,
        id: InstanceId,
        run: u64,
        outcome: Result<(), Fault>,
    ) -> (Option<ExecutionContext>, Option<LoadContextHandle>) {
        let mut state = self.state.lock();
        let Ok(index) = state.resolve(id) else {
            return (None, None);
        };
        let instance = &mut state.instances[index];
        if instance.run != run {
            return (None, None);
        }

        let plug_in_id = instance.plug_in_id;
        instance.stop_time = Some(SystemTime::now());
        match outcome {
            Ok(()) => {
                instance.state = InstanceState::Complete;
                info!(instance_id = id, plug_in_id, "Instance complete");
            }
            Err(fault) => {
                error!(
                    instance_id = id,
                    plug_in_id,
                    kind = ?fault.kind,
                    error = %fault,
                    "Instance faulted"
                );
                instance.state = InstanceState::Faulted;
                instance.fault = Some(fault);
            }
        }
        let execution = instance.execution.take();
        self.emit(&state.instances[index]);

        let package = state.evict_package(plug_in_id, id);
        (execution, package)
    }
}

/// Runs one instance's workload to its end and cleans up after it.
async fn run_instance(
    inner: Arc<HostInner>,
    id: InstanceId,
    run: u64,
    plug_in: Arc<BuiltPlugIn>,
    cancellation: CancellationToken,
    completed: CancellationToken,
) {
    inner.mark_running(id, run);

    let outcome = AssertUnwindSafe(plug_in.plug_in().execute(cancellation))
        .catch_unwind()
        .await;
    drop(plug_in);

    let outcome = match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) if err.is_cancelled() => Ok(()),
        Ok(Err(err)) => Err(Fault::from_error(FaultKind::Runtime, &err)),
        Err(payload) => Err(Fault::from_panic(payload.as_ref())),
    };

    let (execution, package) = inner.complete(id, run, outcome);
    if let Some(execution) = execution {
        execution.dispose();
    }
    if let Some(handle) = package
        && let Err(err) = inner.release(handle).await
    {
        warn!(instance_id = id, error = %err, "Load context release task failed");
    }

    completed.cancel();
}

/// Hosts plug-in instances. Cheap to clone.
#[derive(Clone)]
pub struct InstanceHost {
    inner: Arc<HostInner>,
}

impl InstanceHost {
    /// Creates a host with native library loading and default settings.
    pub fn new(config: HostConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: HostConfig) -> InstanceHostBuilder {
        InstanceHostBuilder::new(config)
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    /// Registers a new instance in state `None`.
    pub fn create_instance(&self, definition: InstanceDefinition) -> HostResult<InstanceInfo> {
        if definition.id <= 0 {
            return Err(HostError::invalid_argument("id", "must be greater than 0"));
        }
        if definition.name.trim().is_empty() {
            return Err(HostError::invalid_argument("name", "cannot be empty"));
        }
        if definition.assembly_path.as_os_str().is_empty() {
            return Err(HostError::invalid_argument("assembly_path", "cannot be empty"));
        }

        let mut definition = definition;
        if definition.assembly_path.is_relative()
            && let Some(store) = &self.inner.store
        {
            definition.assembly_path =
                store.path_for(definition.plug_in_id, &definition.assembly_path);
        }

        let mut state = self.inner.state.lock();
        if state.resolve(definition.id).is_ok() {
            return Err(HostError::InstanceExists(definition.id));
        }
        let max = self.inner.config.max_executing_instances;
        if state.instances.len() >= max {
            warn!(instance_id = definition.id, max, "Instance limit reached");
            return Err(HostError::MaxInstancesRunning { max });
        }

        let instance = Instance::new(definition);
        info!(
            instance_id = instance.id,
            plug_in_id = instance.plug_in_id,
            name = %instance.name,
            assembly = %instance.assembly_path.display(),
            "Instance created"
        );
        self.inner.emit(&instance);
        let info = instance.info();
        state.instances.push(instance);
        Ok(info)
    }

    /// Loads, builds and starts the instance's plug-in.
    ///
    /// Must be called within a Tokio runtime. Returns once the plug-in is
    /// built; the workload runs in the background. The instance is `Starting`
    /// while its code loads, and becomes `Faulted` if loading or construction
    /// fails or panics.
    pub fn start_instance(&self, id: InstanceId) -> HostResult<InstanceInfo> {
        let inner = &self.inner;
        let (context, path, configuration, publisher) = {
            let mut state = inner.state.lock();
            let index = state.resolve(id)?;

            let instance = &state.instances[index];
            if instance.is_active() {
                return Err(HostError::InstanceRunning(id));
            }
            if inner.config.configuration_support
                && instance.configuration.requires_configuration
                && !instance.configuration.is_configured()
            {
                return Err(HostError::InstanceNotConfigured(id));
            }

            let plug_in_id = instance.plug_in_id;
            let path = instance.assembly_path.clone();
            let configuration = instance.configuration.clone();
            let context = inner.package_context(&mut state, plug_in_id, &path)?;
            inner.reserve(&mut state.instances[index]);
            (context, path, configuration, inner.publisher(id, plug_in_id))
        };

        // library loading and plug-in constructors run without the host lock
        let built = panic::catch_unwind(AssertUnwindSafe(|| {
            context
                .load_unit(&path)
                .and_then(|unit| inner.builder.build(unit, &configuration, publisher))
        }));
        drop(context);
        let built = match built {
            Ok(built) => built,
            Err(payload) => Err(HostError::BuildPanicked(
                Fault::from_panic(payload.as_ref()).message,
            )),
        };

        let mut state = inner.state.lock();
        let index = state.resolve(id)?;
        match built {
            Ok(built) => Ok(self.launch(&mut state, index, built)),
            Err(err) => {
                error!(
                    instance_id = id,
                    plug_in_id = state.instances[index].plug_in_id,
                    error = %err,
                    "Failed to build plug-in"
                );
                inner.fail_start(&mut state, index, Fault::from_error(FaultKind::Build, &err));
                Err(err)
            }
        }
    }

    /// Starts the instance with a plug-in object built by the caller.
    ///
    /// No load context is involved and stored configuration is not checked.
    pub fn start_instance_with(
        &self,
        id: InstanceId,
        plug_in: BoxedPlugIn,
    ) -> HostResult<InstanceInfo> {
        let mut state = self.inner.state.lock();
        let index = state.resolve(id)?;
        if state.instances[index].is_active() {
            return Err(HostError::InstanceRunning(id));
        }
        self.inner.reserve(&mut state.instances[index]);
        Ok(self.launch(&mut state, index, BuiltPlugIn::from_plug_in(plug_in)))
    }

    /// Spawns the workload of a reserved instance.
    fn launch(&self, state: &mut HostState, index: usize, built: BuiltPlugIn) -> InstanceInfo {
        let plug_in = Arc::new(built);
        let instance = &mut state.instances[index];
        let (id, plug_in_id, run) = (instance.id, instance.plug_in_id, instance.run);
        debug!(
            instance_id = id,
            plug_in_id,
            type_name = plug_in.type_name(),
            "Launching plug-in"
        );

        let execution = instance.execution.get_or_insert_with(ExecutionContext::new);
        let span = info_span!("instance", instance_id = id, plug_in_id);
        let task = tokio::spawn(
            run_instance(
                Arc::clone(&self.inner),
                id,
                run,
                Arc::clone(&plug_in),
                execution.cancellation().clone(),
                execution.completed().clone(),
            )
            .instrument(span),
        );
        execution.attach(plug_in, task);
        instance.info()
    }

    /// Requests cooperative cancellation and waits up to the stop timeout.
    ///
    /// A no-op for instances that are not starting or running. If the
    /// workload outlives the timeout the instance keeps its state until the
    /// task actually ends.
    pub async fn stop_instance(&self, id: InstanceId) -> HostResult<InstanceInfo> {
        let (cancellation, completed) = {
            let state = self.inner.state.lock();
            let instance = &state.instances[state.resolve(id)?];
            let execution = match &instance.execution {
                Some(execution) if instance.is_active() => execution,
                _ => {
                    trace!(instance_id = id, state = %instance.state, "Instance not running, nothing to stop");
                    return Ok(instance.info());
                }
            };
            (
                execution.cancellation().clone(),
                execution.completed().clone(),
            )
        };

        debug!(instance_id = id, "Stopping instance");
        cancellation.cancel();

        let timeout = self.inner.config.task_stop_timeout();
        tokio::select! {
            _ = completed.cancelled() => {
                debug!(instance_id = id, "Instance stopped");
            }
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    instance_id = id,
                    timeout_ms = self.inner.config.task_stop_timeout_ms,
                    "Instance did not stop in time"
                );
            }
        }

        self.instance(id)
    }

    /// Drops a non-active instance from the host.
    pub fn remove_instance(&self, id: InstanceId) -> HostResult<InstanceInfo> {
        let mut state = self.inner.state.lock();
        let index = state.resolve(id)?;
        if state.instances[index].is_active() {
            return Err(HostError::InstanceRunning(id));
        }
        let instance = state.instances.remove(index);
        info!(instance_id = id, plug_in_id = instance.plug_in_id, "Instance removed");
        Ok(instance.info())
    }

    /// Replaces the stored configuration of a non-active instance.
    pub fn configure_instance(
        &self,
        id: InstanceId,
        configuration: InstanceConfiguration,
    ) -> HostResult<InstanceInfo> {
        let mut state = self.inner.state.lock();
        let index = state.resolve(id)?;
        let instance = &mut state.instances[index];
        if instance.is_active() {
            return Err(HostError::InstanceRunning(id));
        }
        instance.configuration = configuration;
        debug!(
            instance_id = id,
            configured = instance.configuration.is_configured(),
            "Instance configuration updated"
        );
        Ok(instance.info())
    }

    pub fn instance_exists(&self, id: InstanceId) -> bool {
        self.inner.state.lock().resolve(id).is_ok()
    }

    pub fn instance(&self, id: InstanceId) -> HostResult<InstanceInfo> {
        let state = self.inner.state.lock();
        Ok(state.instances[state.resolve(id)?].info())
    }

    /// Snapshot of all instances in creation order.
    pub fn instances(&self) -> Vec<InstanceInfo> {
        self.inner
            .state
            .lock()
            .instances
            .iter()
            .map(Instance::info)
            .collect()
    }

    pub fn instance_count(&self) -> usize {
        self.inner.state.lock().instances.len()
    }

    /// Number of starting or running instances.
    pub fn active_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .instances
            .iter()
            .filter(|i| i.is_active())
            .count()
    }

    /// Packages that currently have a load context.
    pub fn loaded_packages(&self) -> Vec<PlugInId> {
        let mut packages: Vec<PlugInId> =
            self.inner.state.lock().packages.keys().copied().collect();
        packages.sort_unstable();
        packages
    }

    /// Receives every subsequent state change.
    pub fn subscribe(&self) -> broadcast::Receiver<InstanceStateChanged> {
        self.inner.events.subscribe()
    }

    /// Stops every active instance.
    pub async fn stop_all(&self) {
        let active: Vec<InstanceId> = {
            let state = self.inner.state.lock();
            state
                .instances
                .iter()
                .filter(|i| i.is_active())
                .map(|i| i.id)
                .collect()
        };
        if active.is_empty() {
            return;
        }

        info!(count = active.len(), "Stopping all instances");
        let results = future::join_all(active.iter().map(|&id| self.stop_instance(id))).await;
        for (id, result) in active.into_iter().zip(results) {
            if let Err(err) = result {
                warn!(instance_id = id, error = %err, "Failed to stop instance");
            }
        }
    }
}

impl std::fmt::Debug for InstanceHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHost")
            .field("instances", &self.instance_count())
            .field("packages", &self.loaded_packages())
            .finish_non_exhaustive()
    }
}

/// Builder for [`InstanceHost`].
pub struct InstanceHostBuilder {
    config: HostConfig,
    loader: Option<Arc<dyn UnitLoader>>,
    store: Option<Arc<dyn FileStore>>,
    updates: Option<DeviceUpdateSender>,
    log_sink: Option<Arc<dyn LogSink>>,
}

impl InstanceHostBuilder {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            loader: None,
            store: None,
            updates: None,
            log_sink: None,
        }
    }

    /// Loader for code units. Defaults to [`NativeUnitLoader`].
    pub fn loader(mut self, loader: Arc<dyn UnitLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Resolves relative assembly paths. Defaults to a
    /// [`DirectoryFileStore`] over `assembly_root` when that is set.
    pub fn file_store(mut self, store: Arc<dyn FileStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Routes device events raised by plug-ins.
    pub fn device_updates(mut self, sender: DeviceUpdateSender) -> Self {
        self.updates = Some(sender);
        self
    }

    /// Sink for plug-in log records. Defaults to `tracing`.
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn build(self) -> InstanceHost {
        let store = self.store.or_else(|| {
            self.config
                .assembly_root
                .clone()
                .map(|root: PathBuf| Arc::new(DirectoryFileStore::new(root)) as Arc<dyn FileStore>)
        });
        let mut builder = PlugInBuilder::new(self.config.configuration_support);
        if let Some(sink) = self.log_sink {
            builder = builder.with_log_sink(sink);
        }
        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));

        InstanceHost {
            inner: Arc::new(HostInner {
                state: Mutex::new(HostState::default()),
                builder,
                loader: self.loader.unwrap_or_else(|| Arc::new(NativeUnitLoader)),
                store,
                updates: self.updates,
                events,
                config: self.config,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use plughost_core::{CancellationToken, PlugIn, PlugInError};

    use super::*;

    struct Finish;

    #[async_trait]
    impl PlugIn for Finish {
        async fn execute(&self, _cancellation: CancellationToken) -> Result<(), PlugInError> {
            Ok(())
        }
    }

    fn host() -> InstanceHost {
        InstanceHost::new(HostConfig::default())
    }

    #[test]
    fn test_create_validates_arguments() {
        let host = host();
        assert!(matches!(
            host.create_instance(InstanceDefinition::new(0, 1, "zero", "a.so")),
            Err(HostError::InvalidArgument { name: "id", .. })
        ));
        assert!(matches!(
            host.create_instance(InstanceDefinition::new(1, 1, " ", "a.so")),
            Err(HostError::InvalidArgument { name: "name", .. })
        ));
        assert!(matches!(
            host.create_instance(InstanceDefinition::new(1, 1, "one", "")),
            Err(HostError::InvalidArgument { name: "assembly_path", .. })
        ));
        assert_eq!(host.instance_count(), 0);
    }

    #[test]
    fn test_relative_paths_resolve_against_assembly_root() {
        let host = InstanceHost::new(HostConfig {
            assembly_root: Some(PathBuf::from("/srv/plug-ins")),
            ..Default::default()
        });
        let info = host
            .create_instance(InstanceDefinition::new(1, 7, "sensor", "libsensor.so"))
            .unwrap();
        assert_eq!(
            info.assembly_path,
            PathBuf::from("/srv/plug-ins/7/libsensor.so")
        );
    }

    #[test]
    fn test_unknown_ids_are_not_found() {
        let host = host();
        assert!(matches!(host.start_instance(5), Err(HostError::InstanceNotFound(5))));
        assert!(matches!(host.remove_instance(5), Err(HostError::InstanceNotFound(5))));
        assert!(matches!(host.instance(5), Err(HostError::InstanceNotFound(5))));
        assert!(matches!(
            host.configure_instance(5, InstanceConfiguration::default()),
            Err(HostError::InstanceNotFound(5))
        ));
        assert!(!host.instance_exists(5));
    }

    #[tokio::test]
    async fn test_stop_unknown_instance() {
        assert!(matches!(
            host().stop_instance(9).await,
            Err(HostError::InstanceNotFound(9))
        ));
    }

    #[tokio::test]
    async fn test_missing_assembly_faults_instance() {
        let host = host();
        let mut events = host.subscribe();
        host.create_instance(InstanceDefinition::new(1, 3, "ghost", "/no/such/libghost.so"))
            .unwrap();

        let err = host.start_instance(1).unwrap_err();
        assert!(matches!(err, HostError::AssetNotFound(_)));

        let info = host.instance(1).unwrap();
        assert_eq!(info.state, InstanceState::Faulted);
        assert_eq!(info.fault.map(|f| f.kind), Some(FaultKind::Build));
        assert!(host.loaded_packages().is_empty());

        assert_eq!(events.recv().await.unwrap().state, InstanceState::None);
        assert_eq!(events.recv().await.unwrap().state, InstanceState::Starting);
        let faulted = events.recv().await.unwrap();
        assert_eq!(faulted.state, InstanceState::Faulted);
        assert_eq!(faulted.fault.map(|f| f.kind), Some(FaultKind::Build));
    }

    #[tokio::test]
    async fn test_start_with_runs_to_completion() {
        let host = host();
        host.create_instance(InstanceDefinition::new(1, 1, "finish", "finish.so"))
            .unwrap();
        let mut events = host.subscribe();

        let info = host.start_instance_with(1, Box::new(Finish)).unwrap();
        assert_eq!(info.state, InstanceState::Starting);

        let mut seen = Vec::new();
        while let Ok(change) = events.recv().await {
            seen.push(change.state);
            if change.state == InstanceState::Complete {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![
                InstanceState::Starting,
                InstanceState::Running,
                InstanceState::Complete
            ]
        );
        assert!(host.instance(1).unwrap().stop_time.is_some());
    }
}
