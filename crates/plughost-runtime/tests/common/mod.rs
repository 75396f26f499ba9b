#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use plughost_core::prelude::*;
use plughost_core::declare;
use plughost_runtime::{
    HostConfig, InstanceHost, InstanceId, InstanceState, LinkedUnitLoader,
};

/// Returns as soon as it is executed.
pub struct Finish;

#[async_trait]
impl PlugIn for Finish {
    async fn execute(&self, _cancellation: CancellationToken) -> Result<(), PlugInError> {
        Ok(())
    }
}

impl PlugInFactory for Finish {
    type Configuration = NoConfiguration;

    fn create(_context: PlugInContext<NoConfiguration>) -> BuildResult<Self> {
        Ok(Self)
    }
}

/// Waits for cancellation.
pub struct Loop;

#[async_trait]
impl PlugIn for Loop {
    async fn execute(&self, cancellation: CancellationToken) -> Result<(), PlugInError> {
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => return Err(PlugInError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(5)) => {}
            }
        }
    }
}

impl PlugInFactory for Loop {
    type Configuration = NoConfiguration;

    fn create(_context: PlugInContext<NoConfiguration>) -> BuildResult<Self> {
        Ok(Self)
    }
}

/// Fails with a runtime error.
pub struct Fail;

#[async_trait]
impl PlugIn for Fail {
    async fn execute(&self, _cancellation: CancellationToken) -> Result<(), PlugInError> {
        Err(PlugInError::with_source(
            "poll failed",
            std::io::Error::other("device unreachable"),
        ))
    }
}

/// Panics inside `execute`.
pub struct Explode;

#[async_trait]
impl PlugIn for Explode {
    async fn execute(&self, _cancellation: CancellationToken) -> Result<(), PlugInError> {
        panic!("sensor exploded");
    }
}

/// Ignores cancellation and finishes after `delay`.
pub struct Stubborn {
    pub delay: Duration,
}

#[async_trait]
impl PlugIn for Stubborn {
    async fn execute(&self, _cancellation: CancellationToken) -> Result<(), PlugInError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize, PlugInConfiguration)]
#[configuration(name = "MeterConfig")]
#[serde(deny_unknown_fields)]
pub struct MeterConfig {
    pub device: String,
    pub interval_ms: u64,
}

/// Reports one reading for its configured device, then waits for cancellation.
pub struct Meter {
    logger: PlugInLogger,
    publisher: DevicePublisher,
    config: MeterConfig,
}

#[async_trait]
impl PlugIn for Meter {
    async fn execute(&self, cancellation: CancellationToken) -> Result<(), PlugInError> {
        self.logger.info(format_args!("metering {}", self.config.device));
        self.publisher.device_added(DeviceRecord {
            external_id: self.config.device.clone(),
            name: "Meter".into(),
            parameters: Vec::new(),
        });
        self.publisher
            .parameter_value_changed(&self.config.device, "power", 42);
        cancellation.cancelled().await;
        Err(PlugInError::Cancelled)
    }
}

impl PlugInFactory for Meter {
    type Configuration = MeterConfig;

    fn create(context: PlugInContext<MeterConfig>) -> BuildResult<Self> {
        if context.configuration.device.is_empty() {
            return Err(BuildError::construction("Meter", "device is required"));
        }
        Ok(Self {
            logger: context.logger,
            publisher: context.publisher,
            config: context.configuration,
        })
    }
}

pub const FINISH_UNIT: &str = "/plug-ins/libfinish.so";
pub const LOOP_UNIT: &str = "/plug-ins/libloop.so";
pub const METER_UNIT: &str = "/plug-ins/libmeter.so";

pub fn linked_loader() -> Arc<LinkedUnitLoader> {
    Arc::new(
        LinkedUnitLoader::new()
            .with_unit(FINISH_UNIT, [declare::<Finish>()])
            .with_unit(LOOP_UNIT, [declare::<Loop>()])
            .with_unit(METER_UNIT, [declare::<Meter>()]),
    )
}

pub fn config() -> HostConfig {
    HostConfig {
        task_stop_timeout_ms: 2_000,
        unload_interval_ms: 5,
        ..Default::default()
    }
}

pub fn host_with(config: HostConfig) -> InstanceHost {
    InstanceHost::builder(config)
        .loader(linked_loader())
        .build()
}

pub fn host() -> InstanceHost {
    host_with(config())
}

/// Polls until the instance reaches `state`.
pub async fn wait_for_state(host: &InstanceHost, id: InstanceId, state: InstanceState) {
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if host.instance(id).map(|i| i.state).ok() == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(
        polled.is_ok(),
        "instance {id} never reached {state}, last seen {:?}",
        host.instance(id).map(|i| i.state)
    );
}
