mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use plughost_core::LogSink;
use plughost_runtime::{
    ChannelUpdateQueue, HostConfig, InstanceConfiguration, InstanceDefinition, InstanceState,
    PlugHostConfig, PlugInRuntime, UpdateCommand,
};
use tracing::Level;

use common::*;

#[derive(Default)]
struct CaptureSink(Mutex<Vec<(Level, String, String)>>);

impl LogSink for CaptureSink {
    fn log(&self, level: Level, category: &str, message: &str) {
        self.0
            .lock()
            .push((level, category.to_string(), message.to_string()));
    }
}

fn runtime_builder(dir: &tempfile::TempDir) -> plughost_runtime::RuntimeBuilder {
    PlugInRuntime::builder()
        .search_path(dir.path())
        .without_env()
        .merge(PlugHostConfig {
            host: HostConfig {
                unload_interval_ms: 5,
                ..Default::default()
            },
            ..Default::default()
        })
        .loader(linked_loader())
}

#[tokio::test]
async fn device_events_reach_the_update_queue() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, mut commands) = ChannelUpdateQueue::new();
    let sink = Arc::new(CaptureSink::default());
    let runtime = runtime_builder(&dir)
        .update_queue(Arc::new(queue))
        .log_sink(sink.clone())
        .build()
        .unwrap();
    runtime.start();

    let host = runtime.host();
    host.create_instance(
        InstanceDefinition::new(3, 9, "meter", METER_UNIT)
            .with_configuration(InstanceConfiguration::new(r#"{"device":"m-7"}"#)),
    )
    .unwrap();
    host.start_instance(3).unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), commands.recv())
        .await
        .unwrap();
    assert!(matches!(
        first,
        Some(UpdateCommand::AddDevice { instance_id: 3, plug_in_id: 9, ref device })
            if device.external_id == "m-7"
    ));
    let second = tokio::time::timeout(Duration::from_secs(5), commands.recv())
        .await
        .unwrap();
    assert!(matches!(
        second,
        Some(UpdateCommand::SetParameterValue { instance_id: 3, ref parameter, .. })
            if parameter == "power"
    ));

    runtime.stop().await.unwrap();
    assert_eq!(host.instance(3).unwrap().state, InstanceState::Complete);

    let records = sink.0.lock();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, Level::INFO);
    assert!(records[0].1.ends_with("Meter"));
    assert_eq!(records[0].2, "metering m-7");
}

#[tokio::test]
async fn run_until_stops_all_instances() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = runtime_builder(&dir).build().unwrap();

    let host = runtime.host().clone();
    host.create_instance(InstanceDefinition::new(1, 1, "loop", LOOP_UNIT))
        .unwrap();
    host.create_instance(InstanceDefinition::new(2, 2, "loop", LOOP_UNIT))
        .unwrap();

    let starter = host.clone();
    runtime
        .run_until(async move {
            starter.start_instance(1).unwrap();
            starter.start_instance(2).unwrap();
            wait_for_state(&starter, 1, InstanceState::Running).await;
            wait_for_state(&starter, 2, InstanceState::Running).await;
        })
        .await
        .unwrap();

    assert_eq!(host.active_count(), 0);
    assert!(host.loaded_packages().is_empty());
    for info in host.instances() {
        assert_eq!(info.state, InstanceState::Complete);
    }
}

#[test]
fn config_file_settings_reach_the_host() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plughost.toml");
    std::fs::write(
        &path,
        "[host]\nmax_executing_instances = 2\nconfiguration_support = false\n",
    )
    .unwrap();

    let runtime = PlugInRuntime::builder()
        .config_file(&path)
        .without_env()
        .build();

    // the TOML provider is feature gated
    if cfg!(feature = "toml-config") {
        let runtime = runtime.unwrap();
        assert_eq!(runtime.host().config().max_executing_instances, 2);
        assert!(!runtime.config().host.configuration_support);
    } else {
        assert!(runtime.is_err());
    }
}
