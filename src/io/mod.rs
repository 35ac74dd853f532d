//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `commands` - Byte table for both cash devices
//! - `framing` - Serial byte stream to protocol frames
//! - `device` - Command path from the controller to a device task
//! - `serial` - Serial port task per device (tokio-serial)
//! - `http` - Payment endpoints, health and metrics (hyper)
//! - `prometheus` - Prometheus text format for `/metrics`

pub mod commands;
pub mod device;
pub mod framing;
pub mod http;
pub mod prometheus;
pub mod serial;

// Re-export commonly used types
pub use commands::DeviceCommand;
pub use device::{create_device_channel, CommandSink, DeviceHandle, DeviceRequest};
pub use framing::{Frame, FrameAssembler};
pub use http::{start_http_server, HttpState};
pub use serial::{DeviceFrame, SerialDevice};
