//! Serial device task
//!
//! One task per device owns the port, the frame assembler and the poll timer.
//! Line settings:
//! - Bill acceptor: 9600 8E1, 8-byte chunks, `Status` poll every 250 ms
//! - Coin changer: 115200 8N1, 24-byte chunks + marker framing, `PullMonedero`
//!   poll every 500 ms
//!
//! Commands arrive as `DeviceRequest`s. A query is answered with the next raw
//! chunk read from the line. Frames go to the controller with `try_send`; a
//! full mailbox drops the frame rather than stalling the line.

use crate::domain::types::Device;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::commands::DeviceCommand;
use crate::io::device::DeviceRequest;
use crate::io::framing::{Frame, FrameAssembler};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_serial::{DataBits, FlowControl, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, error, info, trace, warn};

const READ_BUFFER_LEN: usize = 256;
/// Back-off after a hard read error so a dead line does not spin
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A frame read from a device, stamped on arrival
#[derive(Debug, Clone)]
pub struct DeviceFrame {
    pub device: Device,
    pub frame: Frame,
    pub received_at: Instant,
}

/// Port parameters for one device
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub path: String,
    pub baud: u32,
    pub parity: tokio_serial::Parity,
    pub poll_interval: Duration,
}

pub struct SerialDevice {
    device: Device,
    settings: SerialSettings,
    poll_command: DeviceCommand,
    assembler: FrameAssembler,
    requests: mpsc::Receiver<DeviceRequest>,
    frame_tx: mpsc::Sender<DeviceFrame>,
    metrics: Arc<Metrics>,
    /// Reply slot of the query waiting for the next chunk
    pending_reply: Option<oneshot::Sender<Frame>>,
}

impl SerialDevice {
    pub fn new(
        device: Device,
        settings: SerialSettings,
        assembler: FrameAssembler,
        requests: mpsc::Receiver<DeviceRequest>,
        frame_tx: mpsc::Sender<DeviceFrame>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let poll_command = match device {
            Device::BillAcceptor => DeviceCommand::Status,
            Device::CoinChanger => DeviceCommand::PullMonedero,
        };
        Self {
            device,
            settings,
            poll_command,
            assembler,
            requests,
            frame_tx,
            metrics,
            pending_reply: None,
        }
    }

    pub fn bill_acceptor(
        config: &Config,
        requests: mpsc::Receiver<DeviceRequest>,
        frame_tx: mpsc::Sender<DeviceFrame>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let settings = SerialSettings {
            path: config.bill_device().to_string(),
            baud: config.bill_baud(),
            parity: config.bill_parity().into(),
            poll_interval: Duration::from_millis(config.bill_poll_interval_ms()),
        };
        let assembler = FrameAssembler::fixed(config.bill_chunk_len());
        Self::new(Device::BillAcceptor, settings, assembler, requests, frame_tx, metrics)
    }

    pub fn coin_changer(
        config: &Config,
        requests: mpsc::Receiver<DeviceRequest>,
        frame_tx: mpsc::Sender<DeviceFrame>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let settings = SerialSettings {
            path: config.coin_device().to_string(),
            baud: config.coin_baud(),
            parity: config.coin_parity().into(),
            poll_interval: Duration::from_millis(config.coin_poll_interval_ms()),
        };
        let assembler = FrameAssembler::delimited(
            config.coin_chunk_len(),
            config.coin_buffer_limit(),
            config.coin_buffer_keep(),
        );
        Self::new(Device::CoinChanger, settings, assembler, requests, frame_tx, metrics)
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn poll_interval(&self) -> Duration {
        self.settings.poll_interval
    }

    fn open_port(&self) -> Result<SerialStream, tokio_serial::Error> {
        tokio_serial::new(&self.settings.path, self.settings.baud)
            .data_bits(DataBits::Eight)
            .parity(self.settings.parity)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open_native_async()
    }

    /// Run the device loop until shutdown or until every request sender is gone
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            device = %self.device,
            path = %self.settings.path,
            baud = %self.settings.baud,
            poll_interval_ms = %self.settings.poll_interval.as_millis(),
            "serial_device_started"
        );

        let mut port = match self.open_port() {
            Ok(p) => {
                info!(device = %self.device, path = %self.settings.path, "serial_port_opened");
                p
            }
            Err(e) => {
                error!(
                    device = %self.device,
                    path = %self.settings.path,
                    error = %e,
                    "serial_port_open_failed"
                );
                self.discard_requests(shutdown).await;
                return;
            }
        };

        let mut poll_timer = interval(self.settings.poll_interval);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = [0u8; READ_BUFFER_LEN];

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(device = %self.device, "serial_device_shutdown");
                        return;
                    }
                }
                _ = poll_timer.tick() => {
                    let command = self.poll_command;
                    self.write(&mut port, command).await;
                }
                request = self.requests.recv() => match request {
                    Some(request) => self.dispatch(&mut port, request).await,
                    None => {
                        info!(device = %self.device, "serial_requests_closed");
                        return;
                    }
                },
                result = port.read(&mut buf) => match result {
                    Ok(0) => {}
                    Ok(n) => self.ingest(&buf[..n], Instant::now()),
                    Err(e) if e.kind() == ErrorKind::TimedOut => {}
                    Err(e) => {
                        warn!(device = %self.device, error = %e, "serial_read_error");
                        tokio::time::sleep(READ_ERROR_BACKOFF).await;
                    }
                },
            }
        }
    }

    async fn dispatch(&mut self, port: &mut SerialStream, request: DeviceRequest) {
        match request {
            DeviceRequest::Write(command) => self.write(port, command).await,
            DeviceRequest::Query { command, reply } => {
                if self.pending_reply.replace(reply).is_some() {
                    debug!(device = %self.device, "serial_query_superseded");
                }
                self.write(port, command).await;
            }
        }
    }

    async fn write(&self, port: &mut SerialStream, command: DeviceCommand) {
        match port.write_all(command.bytes()).await {
            Ok(()) if command == self.poll_command => {
                trace!(device = %self.device, command = %command, "serial_poll");
            }
            Ok(()) => {
                debug!(device = %self.device, command = %command, "serial_command_sent");
            }
            Err(e) => {
                self.metrics.record_serial_write_error();
                warn!(device = %self.device, command = %command, error = %e, "serial_write_error");
            }
        }
    }

    /// Feed raw bytes through the assembler and route the results
    pub fn ingest(&mut self, bytes: &[u8], received_at: Instant) {
        trace!(device = %self.device, raw = %hex::encode_upper(bytes), "serial_bytes");
        let assembled = self.assembler.feed(bytes);

        if let Some(chunk) = assembled.chunks.first() {
            if let Some(reply) = self.pending_reply.take() {
                debug!(device = %self.device, reply = %chunk.hex(), "serial_query_answered");
                // The caller may have timed out already
                let _ = reply.send(chunk.clone());
            }
        }

        for frame in assembled.frames {
            let device_frame = DeviceFrame { device: self.device, frame, received_at };
            if let Err(e) = self.frame_tx.try_send(device_frame) {
                self.metrics.record_frame_dropped();
                warn!(device = %self.device, error = %e, "serial_frame_dropped");
            }
        }
    }

    /// Port never opened: answer nothing, discard commands until shutdown
    async fn discard_requests(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(device = %self.device, "serial_device_shutdown");
                        return;
                    }
                }
                request = self.requests.recv() => match request {
                    Some(DeviceRequest::Write(command)) | Some(DeviceRequest::Query { command, .. }) => {
                        debug!(device = %self.device, command = %command, "serial_command_discarded");
                    }
                    None => return,
                },
            }
        }
    }
}
