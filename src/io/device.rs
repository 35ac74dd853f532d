//! Command path from the controller to a serial device task
//!
//! The controller never touches a serial port. It talks to a `CommandSink`;
//! in production that is a `DeviceHandle` feeding the device's `SerialDevice`
//! task through an mpsc channel.

use crate::domain::types::Device;
use crate::io::commands::DeviceCommand;
use crate::io::framing::Frame;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Something that can deliver commands to one device
#[async_trait]
pub trait CommandSink: Send + Sync {
    fn device(&self) -> Device;

    /// Fire-and-forget write
    async fn send(&self, command: DeviceCommand);

    /// Write `command` and wait for the next raw reply chunk
    async fn query(&self, command: DeviceCommand, timeout: Duration) -> Option<Frame>;
}

/// Work item for a serial device task
#[derive(Debug)]
pub enum DeviceRequest {
    Write(DeviceCommand),
    Query { command: DeviceCommand, reply: oneshot::Sender<Frame> },
}

/// Channel-backed `CommandSink`
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    device: Device,
    tx: mpsc::Sender<DeviceRequest>,
}

impl DeviceHandle {
    pub fn new(device: Device, tx: mpsc::Sender<DeviceRequest>) -> Self {
        Self { device, tx }
    }
}

#[async_trait]
impl CommandSink for DeviceHandle {
    fn device(&self) -> Device {
        self.device
    }

    async fn send(&self, command: DeviceCommand) {
        if self.tx.send(DeviceRequest::Write(command)).await.is_err() {
            warn!(device = %self.device, command = %command, "device_task_gone");
        }
    }

    async fn query(&self, command: DeviceCommand, timeout: Duration) -> Option<Frame> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(DeviceRequest::Query { command, reply: reply_tx }).await.is_err() {
            warn!(device = %self.device, command = %command, "device_task_gone");
            return None;
        }
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(frame)) => Some(frame),
            Ok(Err(_)) => None,
            Err(_) => {
                warn!(
                    device = %self.device,
                    command = %command,
                    timeout_ms = %timeout.as_millis(),
                    "device_query_timeout"
                );
                None
            }
        }
    }
}

/// Create a device request channel
///
/// Returns the handle (for the controller) and the receiver (for the device task)
pub fn create_device_channel(
    device: Device,
    buffer_size: usize,
) -> (DeviceHandle, mpsc::Receiver<DeviceRequest>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (DeviceHandle::new(device, tx), rx)
}
