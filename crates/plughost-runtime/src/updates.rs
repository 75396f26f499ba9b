//! Routing of device events from plug-ins to persistence.
//!
//! ```text
//! plug-in ── DevicePublisher ──▶ DeviceUpdateSender ══ channel ══▶ DeviceUpdateHandler ──▶ UpdateQueue
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use plughost_core::{BoxError, DeviceEvent, DeviceEventSink, DevicePublisher, DeviceRecord};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::instance::{InstanceId, PlugInId};

/// A device event tagged with the instance that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceUpdate {
    pub instance_id: InstanceId,
    pub plug_in_id: PlugInId,
    pub event: DeviceEvent,
}

/// Write request handed to the persistence queue.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateCommand {
    AddDevice {
        instance_id: InstanceId,
        plug_in_id: PlugInId,
        device: DeviceRecord,
    },
    RemoveDevice {
        instance_id: InstanceId,
        device: String,
    },
    SetParameterValue {
        instance_id: InstanceId,
        device: String,
        parameter: String,
        value: Value,
    },
    SetSignalLevel {
        instance_id: InstanceId,
        device: String,
        level: u8,
    },
    SetBatteryLevel {
        instance_id: InstanceId,
        device: String,
        level: u8,
    },
}

impl UpdateCommand {
    pub fn instance_id(&self) -> InstanceId {
        match self {
            Self::AddDevice { instance_id, .. }
            | Self::RemoveDevice { instance_id, .. }
            | Self::SetParameterValue { instance_id, .. }
            | Self::SetSignalLevel { instance_id, .. }
            | Self::SetBatteryLevel { instance_id, .. } => *instance_id,
        }
    }
}

impl From<DeviceUpdate> for UpdateCommand {
    fn from(update: DeviceUpdate) -> Self {
        let instance_id = update.instance_id;
        match update.event {
            DeviceEvent::DeviceAdded(device) => Self::AddDevice {
                instance_id,
                plug_in_id: update.plug_in_id,
                device,
            },
            DeviceEvent::DeviceRemoved { device } => Self::RemoveDevice {
                instance_id,
                device,
            },
            DeviceEvent::ParameterValueChanged {
                device,
                parameter,
                value,
            } => Self::SetParameterValue {
                instance_id,
                device,
                parameter,
                value,
            },
            DeviceEvent::SignalLevelChanged { device, level } => Self::SetSignalLevel {
                instance_id,
                device,
                level,
            },
            DeviceEvent::BatteryLevelChanged { device, level } => Self::SetBatteryLevel {
                instance_id,
                device,
                level,
            },
        }
    }
}

/// Queued background writer for device state.
#[async_trait]
pub trait UpdateQueue: Send + Sync {
    async fn enqueue(&self, command: UpdateCommand) -> Result<(), BoxError>;
}

/// An [`UpdateQueue`] that forwards commands to a channel.
#[derive(Debug, Clone)]
pub struct ChannelUpdateQueue {
    tx: mpsc::UnboundedSender<UpdateCommand>,
}

impl ChannelUpdateQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UpdateCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl UpdateQueue for ChannelUpdateQueue {
    async fn enqueue(&self, command: UpdateCommand) -> Result<(), BoxError> {
        self.tx
            .send(command)
            .map_err(|_| "update queue receiver dropped".into())
    }
}

/// Creates the channel connecting instance publishers to a handler.
pub fn update_channel() -> (DeviceUpdateSender, mpsc::UnboundedReceiver<DeviceUpdate>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DeviceUpdateSender { tx }, rx)
}

/// Producer side of the device update channel.
#[derive(Debug, Clone)]
pub struct DeviceUpdateSender {
    tx: mpsc::UnboundedSender<DeviceUpdate>,
}

impl DeviceUpdateSender {
    /// Creates a publisher that tags events with the given instance.
    pub fn publisher(&self, instance_id: InstanceId, plug_in_id: PlugInId) -> DevicePublisher {
        DevicePublisher::new(Arc::new(InstanceEventSink {
            instance_id,
            plug_in_id,
            tx: self.tx.clone(),
        }))
    }
}

struct InstanceEventSink {
    instance_id: InstanceId,
    plug_in_id: PlugInId,
    tx: mpsc::UnboundedSender<DeviceUpdate>,
}

impl DeviceEventSink for InstanceEventSink {
    fn publish(&self, event: DeviceEvent) {
        let update = DeviceUpdate {
            instance_id: self.instance_id,
            plug_in_id: self.plug_in_id,
            event,
        };
        if self.tx.send(update).is_err() {
            trace!(
                instance_id = self.instance_id,
                "Device update dropped, handler is gone"
            );
        }
    }
}

/// Drains device updates into an [`UpdateQueue`].
pub struct DeviceUpdateHandler {
    rx: mpsc::UnboundedReceiver<DeviceUpdate>,
    queue: Arc<dyn UpdateQueue>,
}

impl DeviceUpdateHandler {
    pub fn new(rx: mpsc::UnboundedReceiver<DeviceUpdate>, queue: Arc<dyn UpdateQueue>) -> Self {
        Self { rx, queue }
    }

    /// Runs until `cancellation` fires or every sender is dropped.
    pub async fn run(mut self, cancellation: CancellationToken) {
        debug!("Device update handler started");
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                update = self.rx.recv() => match update {
                    Some(update) => self.forward(update).await,
                    None => break,
                },
            }
        }
        debug!("Device update handler stopped");
    }

    pub fn spawn(self, cancellation: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancellation))
    }

    async fn forward(&self, update: DeviceUpdate) {
        let event = update.event.event_name();
        let command = UpdateCommand::from(update);
        let instance_id = command.instance_id();
        trace!(instance_id, event, "Forwarding device update");
        if let Err(error) = self.queue.enqueue(command).await {
            warn!(instance_id, event, %error, "Failed to enqueue device update");
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct FailingQueue {
        attempts: Mutex<usize>,
    }

    #[async_trait]
    impl UpdateQueue for FailingQueue {
        async fn enqueue(&self, _command: UpdateCommand) -> Result<(), BoxError> {
            *self.attempts.lock() += 1;
            Err("database unavailable".into())
        }
    }

    #[test]
    fn test_events_map_to_commands() {
        let command = UpdateCommand::from(DeviceUpdate {
            instance_id: 4,
            plug_in_id: 2,
            event: DeviceEvent::BatteryLevelChanged {
                device: "sensor-1".into(),
                level: 80,
            },
        });
        assert_eq!(
            command,
            UpdateCommand::SetBatteryLevel {
                instance_id: 4,
                device: "sensor-1".into(),
                level: 80,
            }
        );
    }

    #[tokio::test]
    async fn test_handler_forwards_in_order() {
        let (sender, rx) = update_channel();
        let (queue, mut commands) = ChannelUpdateQueue::new();
        let cancellation = CancellationToken::new();
        let task = DeviceUpdateHandler::new(rx, Arc::new(queue)).spawn(cancellation.clone());

        let publisher = sender.publisher(9, 3);
        publisher.device_added(DeviceRecord {
            external_id: "sensor-1".into(),
            name: "Sensor".into(),
            parameters: Vec::new(),
        });
        publisher.parameter_value_changed("sensor-1", "temperature", 21.5);
        publisher.device_removed("sensor-1");

        assert!(matches!(
            commands.recv().await,
            Some(UpdateCommand::AddDevice { instance_id: 9, plug_in_id: 3, .. })
        ));
        assert!(matches!(
            commands.recv().await,
            Some(UpdateCommand::SetParameterValue { parameter, .. }) if parameter == "temperature"
        ));
        assert!(matches!(
            commands.recv().await,
            Some(UpdateCommand::RemoveDevice { instance_id: 9, .. })
        ));

        cancellation.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_errors_are_not_fatal() {
        let (sender, rx) = update_channel();
        let queue = Arc::new(FailingQueue::default());
        let task = DeviceUpdateHandler::new(rx, queue.clone()).spawn(CancellationToken::new());

        let publisher = sender.publisher(1, 1);
        publisher.signal_level_changed("radio", 40);
        publisher.signal_level_changed("radio", 50);
        drop(publisher);
        drop(sender);

        // the handler stops once every sender is gone
        task.await.unwrap();
        assert_eq!(*queue.attempts.lock(), 2);
    }

    #[test]
    fn test_idle_handler_waits_for_cancellation() {
        let (_sender, rx) = update_channel();
        let (queue, _commands) = ChannelUpdateQueue::new();
        let cancellation = CancellationToken::new();
        let mut run = tokio_test::task::spawn(
            DeviceUpdateHandler::new(rx, Arc::new(queue)).run(cancellation.clone()),
        );

        tokio_test::assert_pending!(run.poll());
        cancellation.cancel();
        assert!(run.is_woken());
        tokio_test::assert_ready!(run.poll());
    }
}
