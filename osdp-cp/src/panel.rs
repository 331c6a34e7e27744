//! Control panel: scheduler and public engine surface
//!
//! The panel owns the channels, one session and one command queue per
//! device, and the event dispatcher. `refresh()` is the single entry point
//! that drives all protocol work; the application calls it on a steady
//! cadence from its own loop.

use log::{debug, info};
use osdp_core::{validate_pd_configs, MasterKey, OsdpCommand, OsdpError, OsdpResult, PdConfig};
use osdp_transport::Channel;
use std::time::Duration;

use crate::device::PdSession;
use crate::events::{EventCallback, EventDispatcher};
use crate::queue::{CommandQueue, EnqueueOutcome};

/// Timing and retry policy for every device session
///
/// One policy applies panel-wide; the defaults suit a 9600 baud multidrop
/// line polled every few tens of milliseconds.
#[derive(Debug, Clone)]
pub struct Timings {
    /// How long to wait for a reply before retransmitting
    pub reply_timeout: Duration,
    /// Minimum gap between liveness polls to an idle device
    pub poll_interval: Duration,
    /// How long an offline device rests before the next contact attempt
    pub offline_retry_interval: Duration,
    /// Retransmissions per exchange before the device goes offline
    pub max_retries: u8,
    /// Sequence-reset attempts before a resynchronizing device goes offline
    pub resync_max_attempts: u8,
    /// Full handshake restarts before secure setup is abandoned
    pub sc_max_retries: u8,
    /// Consecutive invalid frames that trigger resynchronization
    pub frame_error_resync_threshold: u8,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(50),
            offline_retry_interval: Duration::from_secs(1),
            max_retries: 2,
            resync_max_attempts: 3,
            sc_max_retries: 1,
            frame_error_resync_threshold: 3,
        }
    }
}

const DEFAULT_QUEUE_DEPTH: usize = 8;

/// Builder for a `ControlPanel`
pub struct ControlPanelBuilder {
    channels: Vec<Box<dyn Channel>>,
    configs: Vec<PdConfig>,
    master_key: Option<MasterKey>,
    timings: Timings,
    queue_depth: usize,
}

impl Default for ControlPanelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPanelBuilder {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            configs: Vec::new(),
            master_key: None,
            timings: Timings::default(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }

    /// Add a physical channel; devices reference channels by add order
    pub fn channel(mut self, channel: Box<dyn Channel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Add a device; its index in the panel is its add order
    pub fn device(mut self, config: PdConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Supply the master key; secure channel setup is attempted for every
    /// device when a key is present
    pub fn master_key(mut self, key: MasterKey) -> Self {
        self.master_key = Some(key);
        self
    }

    pub fn timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Per-device command queue depth (minimum 1)
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Validate the configuration and construct the panel
    ///
    /// # Errors
    /// Returns `OsdpError::Config` for an empty device list, out-of-range
    /// addresses, dangling channel bindings, duplicate addresses on a shared
    /// channel, or a device that enforces secure channel without a master
    /// key being supplied.
    pub fn build(self) -> OsdpResult<ControlPanel> {
        validate_pd_configs(&self.configs, self.channels.len())?;
        if self.master_key.is_none() {
            if let Some(i) = self
                .configs
                .iter()
                .position(|c| c.flags.enforce_secure_channel)
            {
                return Err(OsdpError::Config(format!(
                    "PD[{}]: enforces secure channel but no master key supplied",
                    i
                )));
            }
        }

        let devices: Vec<PdSession> = self
            .configs
            .into_iter()
            .enumerate()
            .map(|(i, cfg)| PdSession::new(i, cfg))
            .collect();
        let queues = devices
            .iter()
            .map(|_| CommandQueue::new(self.queue_depth))
            .collect();

        info!(
            "Control panel ready: {} devices on {} channels, secure channel {}",
            devices.len(),
            self.channels.len(),
            if self.master_key.is_some() {
                "enabled"
            } else {
                "disabled"
            }
        );
        Ok(ControlPanel {
            channels: self.channels,
            devices,
            queues,
            dispatcher: EventDispatcher::new(),
            master_key: self.master_key,
            timings: self.timings,
        })
    }
}

/// The control panel engine
///
/// All state is owned by the instance; creating several independent panels
/// in one process is supported.
pub struct ControlPanel {
    channels: Vec<Box<dyn Channel>>,
    devices: Vec<PdSession>,
    queues: Vec<CommandQueue>,
    dispatcher: EventDispatcher,
    master_key: Option<MasterKey>,
    timings: Timings,
}

impl ControlPanel {
    pub fn builder() -> ControlPanelBuilder {
        ControlPanelBuilder::new()
    }

    /// Construct a panel with default timings and queue depth
    ///
    /// # Errors
    /// Same validation as `ControlPanelBuilder::build`.
    pub fn new(
        channels: Vec<Box<dyn Channel>>,
        configs: Vec<PdConfig>,
        master_key: Option<MasterKey>,
    ) -> OsdpResult<Self> {
        let mut builder = ControlPanelBuilder::new();
        for channel in channels {
            builder = builder.channel(channel);
        }
        for config in configs {
            builder = builder.device(config);
        }
        if let Some(key) = master_key {
            builder = builder.master_key(key);
        }
        builder.build()
    }

    /// Advance every device session by at most one protocol action
    ///
    /// Never blocks. Devices sharing a half-duplex channel take turns: a
    /// device is skipped while another session's exchange occupies its
    /// channel, so a dead device's timeout cannot starve a healthy one for
    /// longer than a single reply timeout.
    pub fn refresh(&mut self) {
        for i in 0..self.devices.len() {
            let channel_index = self.devices[i].channel_index();
            let channel_busy = self
                .devices
                .iter()
                .enumerate()
                .any(|(j, d)| j != i && d.channel_index() == channel_index && d.in_flight());
            if channel_busy {
                continue;
            }
            self.devices[i].tick(
                self.channels[channel_index].as_mut(),
                &mut self.queues[i],
                &mut self.dispatcher,
                self.master_key.as_ref(),
                &self.timings,
            );
        }
    }

    /// Queue a command for a device
    ///
    /// The command is dispatched in queue order once the device is online.
    /// When the queue is full the oldest pending command is evicted and
    /// returned in the outcome.
    ///
    /// # Errors
    /// Returns `OsdpError::UnknownDevice` for an out-of-range device index.
    pub fn send_command(
        &mut self,
        device: usize,
        command: OsdpCommand,
    ) -> OsdpResult<EnqueueOutcome> {
        if device >= self.devices.len() {
            return Err(OsdpError::UnknownDevice(device));
        }
        debug!("PD[{}]: queued {}", device, command.name());
        Ok(self.queues[device].push(command))
    }

    /// Withdraw commands not yet dispatched to a device
    ///
    /// A command whose exchange is currently in flight is past the point of
    /// withdrawal and stays queued until its reply settles it.
    ///
    /// # Errors
    /// Returns `OsdpError::UnknownDevice` for an out-of-range device index.
    pub fn cancel_pending(&mut self, device: usize) -> OsdpResult<usize> {
        if device >= self.devices.len() {
            return Err(OsdpError::UnknownDevice(device));
        }
        let keep_front = self.devices[device].in_flight_command();
        Ok(self.queues[device].cancel_pending(keep_front))
    }

    /// Register the application event callback
    pub fn set_event_callback(&mut self, callback: EventCallback) {
        self.dispatcher.set_callback(callback);
    }

    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    /// Session handle for status queries
    ///
    /// # Errors
    /// Returns `OsdpError::UnknownDevice` for an out-of-range device index.
    pub fn device(&self, device: usize) -> OsdpResult<&PdSession> {
        self.devices
            .get(device)
            .ok_or(OsdpError::UnknownDevice(device))
    }

    /// Whether a device is currently communicating
    pub fn is_online(&self, device: usize) -> OsdpResult<bool> {
        Ok(self.device(device)?.is_online())
    }

    /// Whether a device has an active secure channel
    pub fn sc_active(&self, device: usize) -> OsdpResult<bool> {
        Ok(self.device(device)?.sc_active())
    }

    /// Bitmask of online devices, bit N for device index N
    pub fn online_mask(&self) -> u32 {
        self.devices
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_online())
            .fold(0, |mask, (i, _)| mask | (1 << (i as u32 % 32)))
    }

    /// Bitmask of devices with an active secure channel
    pub fn sc_active_mask(&self) -> u32 {
        self.devices
            .iter()
            .enumerate()
            .filter(|(_, d)| d.sc_active())
            .fold(0, |mask, (i, _)| mask | (1 << (i as u32 % 32)))
    }
}
