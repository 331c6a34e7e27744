//! Per-device protocol session
//!
//! Each configured peripheral device gets one `PdSession` holding its state
//! machine, sequence counter, secure channel context and receive buffer. The
//! scheduler drives a session with `tick()`: at most one protocol action per
//! call, never blocking. An exchange that is waiting for a reply spans as
//! many ticks as the reply takes to arrive, bounded by the reply timeout.

use bytes::BytesMut;
use log::{debug, info, warn};
use osdp_core::{MasterKey, OsdpCommand, OsdpError, OsdpResult, PdConfig};
use osdp_security::SecureChannel;
use osdp_session::{
    extract_frame, nak, next_sequence, scs, CommandCode, Packet, PdSessionState, ReplyCode, Scb,
    MAC_LEN,
};
use osdp_transport::Channel;
use std::time::Instant;

use crate::events::{decode_event, EventDispatcher};
use crate::panel::Timings;
use crate::queue::CommandQueue;

/// Identification report from a peripheral device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdIdReport {
    pub vendor_code: [u8; 3],
    pub model: u8,
    pub version: u8,
    pub serial: u32,
    pub firmware: [u8; 3],
}

impl PdIdReport {
    /// Decode the 12-byte identification report body
    pub fn decode(data: &[u8]) -> OsdpResult<Self> {
        if data.len() < 12 {
            return Err(OsdpError::Protocol(format!(
                "Identification report too short: {} bytes",
                data.len()
            )));
        }
        Ok(Self {
            vendor_code: [data[0], data[1], data[2]],
            model: data[3],
            version: data[4],
            serial: u32::from_le_bytes([data[5], data[6], data[7], data[8]]),
            firmware: [data[9], data[10], data[11]],
        })
    }
}

/// One capability entry from a device capability report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdCapability {
    pub function: u8,
    pub compliance: u8,
    pub num_items: u8,
}

/// Decode a capability report body (a sequence of 3-byte entries)
fn decode_capabilities(data: &[u8]) -> Vec<PdCapability> {
    data.chunks_exact(3)
        .map(|c| PdCapability {
            function: c[0],
            compliance: c[1],
            num_items: c[2],
        })
        .collect()
}

/// The command frame currently awaiting its reply
#[derive(Debug, Clone, Copy)]
struct SentFrame {
    code: CommandCode,
    sequence: u8,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    /// No exchange in flight; the next tick may start one
    Idle,
    /// Command sent, reply pending
    Awaiting { sent_at: Instant },
}

/// Protocol session for one peripheral device
pub struct PdSession {
    index: usize,
    config: PdConfig,
    state: PdSessionState,
    phase: Phase,
    /// Sequence number of the last transmitted command
    seq: u8,
    /// Next command goes out with sequence 0 (communication reset)
    seq_zero_pending: bool,
    rx: BytesMut,
    /// Last transmitted frame, retransmitted verbatim on timeout
    last_tx: Vec<u8>,
    sent: Option<SentFrame>,
    retry_count: u8,
    frame_errors: u8,
    resync_attempts: u8,
    sc: SecureChannel,
    sc_attempts: u8,
    /// CP cryptogram held between the CCRYPT reply and the SCRYPT leg
    pending_scrypt: Option<[u8; 16]>,
    ident: Option<PdIdReport>,
    capabilities: Vec<PdCapability>,
    last_poll: Option<Instant>,
    offline_since: Option<Instant>,
}

impl PdSession {
    pub(crate) fn new(index: usize, config: PdConfig) -> Self {
        Self {
            index,
            config,
            state: PdSessionState::default(),
            phase: Phase::Idle,
            seq: 0,
            seq_zero_pending: true,
            rx: BytesMut::new(),
            last_tx: Vec::new(),
            sent: None,
            retry_count: 0,
            frame_errors: 0,
            resync_attempts: 0,
            sc: SecureChannel::new(),
            sc_attempts: 0,
            pending_scrypt: None,
            ident: None,
            capabilities: Vec::new(),
            last_poll: None,
            offline_since: None,
        }
    }

    pub fn state(&self) -> PdSessionState {
        self.state
    }

    /// Whether the device is communicating (resynchronization counts)
    pub fn is_online(&self) -> bool {
        matches!(
            self.state,
            PdSessionState::Online | PdSessionState::Resync
        )
    }

    pub fn sc_active(&self) -> bool {
        self.sc.is_active()
    }

    pub fn ident(&self) -> Option<&PdIdReport> {
        self.ident.as_ref()
    }

    pub fn capabilities(&self) -> &[PdCapability] {
        &self.capabilities
    }

    pub(crate) fn channel_index(&self) -> usize {
        self.config.channel
    }

    /// Whether an exchange is in flight (the shared channel is ours)
    pub(crate) fn in_flight(&self) -> bool {
        matches!(self.phase, Phase::Awaiting { .. })
    }

    /// Whether the in-flight exchange carries an application command
    pub(crate) fn in_flight_command(&self) -> bool {
        self.in_flight()
            && self.sent.is_some_and(|s| is_app_command(s.code))
    }

    /// Advance the session by at most one protocol action
    pub(crate) fn tick(
        &mut self,
        channel: &mut dyn Channel,
        queue: &mut CommandQueue,
        dispatcher: &mut EventDispatcher,
        master_key: Option<&MasterKey>,
        timings: &Timings,
    ) {
        match self.phase {
            Phase::Awaiting { sent_at } => {
                if let Err(err) = self.drain_channel(channel) {
                    warn!("PD[{}]: channel read failed: {}", self.index, err);
                    self.fail_device(queue, "channel error");
                    return;
                }
                while let Some(frame) = extract_frame(&mut self.rx) {
                    self.handle_frame(&frame, queue, dispatcher, master_key, timings);
                    if !self.in_flight() {
                        return;
                    }
                }
                if sent_at.elapsed() >= timings.reply_timeout {
                    self.handle_timeout(channel, queue, timings);
                }
            }
            Phase::Idle => self.start_exchange(channel, queue, timings),
        }
    }

    fn drain_channel(&mut self, channel: &mut dyn Channel) -> OsdpResult<()> {
        if channel.available() == 0 {
            return Ok(());
        }
        let mut chunk = [0u8; 256];
        loop {
            let n = channel.read(&mut chunk)?;
            if n == 0 {
                return Ok(());
            }
            self.rx.extend_from_slice(&chunk[..n]);
        }
    }

    /// Pick and send the next command appropriate for the current state
    fn start_exchange(
        &mut self,
        channel: &mut dyn Channel,
        queue: &mut CommandQueue,
        timings: &Timings,
    ) {
        match self.state {
            PdSessionState::Offline => {
                let due = self
                    .offline_since
                    .is_none_or(|t| t.elapsed() >= timings.offline_retry_interval);
                if !due {
                    return;
                }
                self.transition(PdSessionState::Negotiating);
                self.seq_zero_pending = true;
                self.ident = None;
                self.capabilities.clear();
                self.rx.clear();
                // Late replies from before the device went offline are stale
                if let Err(err) = channel.flush() {
                    warn!("PD[{}]: channel flush failed: {}", self.index, err);
                }
                self.send(channel, queue, CommandCode::Id, vec![0], None);
            }
            PdSessionState::Negotiating => {
                if self.ident.is_none() {
                    self.send(channel, queue, CommandCode::Id, vec![0], None);
                } else {
                    self.send(channel, queue, CommandCode::Cap, vec![0], None);
                }
            }
            PdSessionState::SecureHandshake => match self.pending_scrypt.take() {
                Some(cp_crypt) => {
                    let scb = Scb::with_data(scs::SCRYPT, vec![1]);
                    self.send(
                        channel,
                        queue,
                        CommandCode::SCrypt,
                        cp_crypt.to_vec(),
                        Some(scb),
                    );
                }
                None => {
                    let cp_random = self.sc.begin_handshake();
                    let scb = Scb::with_data(scs::CHLNG, vec![1]);
                    self.send(
                        channel,
                        queue,
                        CommandCode::Challenge,
                        cp_random.to_vec(),
                        Some(scb),
                    );
                }
            },
            PdSessionState::Online => {
                if let Some(command) = queue.front() {
                    let code = command_code(command);
                    let data = command.wire_data();
                    debug!("PD[{}]: dispatching {}", self.index, command.name());
                    self.send(channel, queue, code, data, None);
                } else if self
                    .last_poll
                    .is_none_or(|t| t.elapsed() >= timings.poll_interval)
                {
                    self.send(channel, queue, CommandCode::Poll, vec![], None);
                }
            }
            PdSessionState::Resync => {
                // Anything still in the channel belongs to the abandoned
                // exchange and must not answer the reset poll
                if let Err(err) = channel.flush() {
                    warn!("PD[{}]: channel flush failed: {}", self.index, err);
                }
                self.seq_zero_pending = true;
                self.send(channel, queue, CommandCode::Poll, vec![], None);
            }
        }
    }

    /// Encode, wrap for the secure channel if active, and transmit
    fn send(
        &mut self,
        channel: &mut dyn Channel,
        queue: &mut CommandQueue,
        code: CommandCode,
        data: Vec<u8>,
        scb: Option<Scb>,
    ) {
        let sequence = if self.seq_zero_pending {
            0
        } else {
            next_sequence(self.seq)
        };
        let bytes = match self.build_frame(code, sequence, data, scb) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("PD[{}]: frame encode failed: {}", self.index, err);
                self.fail_device(queue, "encode failure");
                return;
            }
        };
        match channel.write(&bytes) {
            Ok(n) if n == bytes.len() => {
                debug!(
                    "PD[{}]: sent 0x{:02X} seq {} ({} bytes)",
                    self.index,
                    code.as_u8(),
                    sequence,
                    bytes.len()
                );
                self.seq = sequence;
                self.seq_zero_pending = false;
                self.last_tx = bytes;
                self.sent = Some(SentFrame { code, sequence });
                self.phase = Phase::Awaiting {
                    sent_at: Instant::now(),
                };
            }
            Ok(n) => {
                // A short write desynchronizes the MAC chain, so restart
                warn!(
                    "PD[{}]: short write: {} of {} bytes",
                    self.index,
                    n,
                    bytes.len()
                );
                self.fail_device(queue, "short write");
            }
            Err(err) => {
                warn!("PD[{}]: channel write failed: {}", self.index, err);
                self.fail_device(queue, "channel error");
            }
        }
    }

    fn build_frame(
        &mut self,
        code: CommandCode,
        sequence: u8,
        data: Vec<u8>,
        scb: Option<Scb>,
    ) -> OsdpResult<Vec<u8>> {
        let mut packet = Packet::command(self.config.address, sequence, code.as_u8(), data);
        if self.sc.is_active() {
            if packet.data.is_empty() {
                packet.scb = Some(Scb::new(scs::CMD_MAC));
            } else {
                packet.data = self.sc.encrypt_payload(true, &packet.data)?;
                packet.scb = Some(Scb::new(scs::CMD_ENC));
            }
            let unsealed = packet.encode_unsealed()?;
            let mac = self.sc.compute_mac(true, &unsealed)?;
            self.sc.commit_mac(true, mac);
            Ok(Packet::seal(unsealed, Some(mac), true))
        } else {
            packet.scb = scb;
            packet.encode()
        }
    }

    /// Validate and dispatch one received frame
    fn handle_frame(
        &mut self,
        frame: &[u8],
        queue: &mut CommandQueue,
        dispatcher: &mut EventDispatcher,
        master_key: Option<&MasterKey>,
        timings: &Timings,
    ) {
        let packet = match Packet::decode(frame) {
            Ok(packet) => packet,
            Err(err) => {
                debug!("PD[{}]: bad frame: {}", self.index, err);
                self.frame_failure(timings);
                return;
            }
        };
        if !packet.is_reply || packet.address != self.config.address {
            debug!(
                "PD[{}]: ignoring stray frame for address {}",
                self.index, packet.address
            );
            return;
        }
        let Some(sent) = self.sent else {
            return;
        };
        if packet.sequence != sent.sequence {
            warn!(
                "PD[{}]: sequence mismatch: sent {}, reply {}",
                self.index, sent.sequence, packet.sequence
            );
            if self.state == PdSessionState::Online {
                self.enter_resync("sequence mismatch");
            } else {
                self.frame_failure(timings);
            }
            return;
        }

        let mut payload = packet.data.clone();
        if self.sc.is_active() {
            let Some(scb) = &packet.scb else {
                warn!("PD[{}]: plaintext reply on secure session", self.index);
                self.frame_failure(timings);
                return;
            };
            if scb.scs_type != scs::REPLY_MAC && scb.scs_type != scs::REPLY_ENC {
                warn!(
                    "PD[{}]: unexpected SCS type 0x{:02X} on secure session",
                    self.index, scb.scs_type
                );
                self.frame_failure(timings);
                return;
            }
            let verified = Packet::mac_scope(frame)
                .and_then(|scope| self.sc.compute_mac(false, scope))
                .and_then(|mac| match packet.mac {
                    Some(wire) if wire == mac[..MAC_LEN] => Ok(mac),
                    _ => Err(OsdpError::Security("Reply MAC mismatch".to_string())),
                });
            let mac = match verified {
                Ok(mac) => mac,
                Err(err) => {
                    warn!("PD[{}]: {}", self.index, err);
                    self.frame_failure(timings);
                    return;
                }
            };
            self.sc.commit_mac(false, mac);
            if scb.is_encrypted() {
                payload = match self.sc.decrypt_payload(false, &payload) {
                    Ok(plain) => plain,
                    Err(err) => {
                        warn!("PD[{}]: reply decrypt failed: {}", self.index, err);
                        self.frame_failure(timings);
                        return;
                    }
                };
            }
        }

        let reply = match ReplyCode::from_u8(packet.id) {
            Ok(reply) => reply,
            Err(err) => {
                warn!("PD[{}]: {}", self.index, err);
                self.frame_failure(timings);
                return;
            }
        };
        self.dispatch_reply(sent, reply, &payload, queue, dispatcher, master_key, timings);
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_reply(
        &mut self,
        sent: SentFrame,
        reply: ReplyCode,
        payload: &[u8],
        queue: &mut CommandQueue,
        dispatcher: &mut EventDispatcher,
        master_key: Option<&MasterKey>,
        timings: &Timings,
    ) {
        match (self.state, reply) {
            (PdSessionState::Negotiating, ReplyCode::PdId) => match PdIdReport::decode(payload) {
                Ok(report) => {
                    info!(
                        "PD[{}]: identified: vendor {:02X}{:02X}{:02X} model {} serial {}",
                        self.index,
                        report.vendor_code[0],
                        report.vendor_code[1],
                        report.vendor_code[2],
                        report.model,
                        report.serial
                    );
                    self.ident = Some(report);
                    self.complete_exchange();
                }
                Err(err) => {
                    warn!("PD[{}]: {}", self.index, err);
                    self.frame_failure(timings);
                }
            },
            (PdSessionState::Negotiating, ReplyCode::PdCap) => {
                self.capabilities = decode_capabilities(payload);
                self.complete_exchange();
                if master_key.is_some() {
                    self.sc_attempts = 0;
                    self.pending_scrypt = None;
                    self.transition(PdSessionState::SecureHandshake);
                } else if self.config.flags.enforce_secure_channel {
                    self.fail_device(queue, "secure channel required but no master key");
                } else {
                    self.go_online();
                }
            }
            (PdSessionState::SecureHandshake, ReplyCode::CCrypt) => {
                self.complete_exchange();
                let Some(key) = master_key else {
                    self.fail_device(queue, "secure handshake requires a master key");
                    return;
                };
                match self.sc.handle_ccrypt(key.as_bytes(), payload) {
                    Ok(cp_crypt) => self.pending_scrypt = Some(cp_crypt),
                    Err(err) => self.handshake_failure(queue, timings, &err.to_string()),
                }
            }
            (PdSessionState::SecureHandshake, ReplyCode::RMacI) => {
                self.complete_exchange();
                match self.sc.handle_rmac_i(payload) {
                    Ok(()) => {
                        info!("PD[{}]: secure channel established", self.index);
                        self.go_online();
                    }
                    Err(err) => self.handshake_failure(queue, timings, &err.to_string()),
                }
            }
            (PdSessionState::SecureHandshake, ReplyCode::Nak) => {
                self.complete_exchange();
                self.handshake_failure(queue, timings, "handshake refused by device");
            }
            (PdSessionState::Resync, reply)
                if reply == ReplyCode::Ack || reply.carries_event() =>
            {
                self.complete_exchange();
                if reply.carries_event() {
                    match decode_event(reply, payload) {
                        Ok(event) => dispatcher.dispatch(self.index, event),
                        Err(err) => warn!("PD[{}]: {}", self.index, err),
                    }
                }
                self.resync_attempts = 0;
                if master_key.is_some() {
                    // Session keys were wiped on resync; re-authenticate
                    self.sc_attempts = 0;
                    self.pending_scrypt = None;
                    self.transition(PdSessionState::SecureHandshake);
                } else {
                    info!("PD[{}]: resynchronized", self.index);
                    self.transition(PdSessionState::Online);
                }
            }
            (PdSessionState::Online, ReplyCode::Ack) => {
                self.complete_exchange();
                self.settle(sent, queue);
            }
            (PdSessionState::Online, ReplyCode::Com) => {
                self.complete_exchange();
                if payload.len() >= 5 {
                    info!(
                        "PD[{}]: comm parameters accepted: address {} baud {}",
                        self.index,
                        payload[0],
                        u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]])
                    );
                }
                self.settle(sent, queue);
            }
            (PdSessionState::Online, reply) if reply.carries_event() => {
                match decode_event(reply, payload) {
                    Ok(event) => {
                        self.complete_exchange();
                        dispatcher.dispatch(self.index, event);
                        self.settle(sent, queue);
                    }
                    Err(err) => {
                        warn!("PD[{}]: {}", self.index, err);
                        self.frame_failure(timings);
                    }
                }
            }
            (PdSessionState::Online, ReplyCode::Nak) => {
                self.complete_exchange();
                if payload.first() == Some(&nak::SEQ_NUM) {
                    self.enter_resync("device reports sequence error");
                } else {
                    warn!(
                        "PD[{}]: command 0x{:02X} refused, NAK reason {:?}",
                        self.index,
                        sent.code.as_u8(),
                        payload.first()
                    );
                    self.settle(sent, queue);
                }
            }
            (state, reply) => {
                warn!(
                    "PD[{}]: unexpected reply 0x{:02X} in state {}",
                    self.index,
                    reply.as_u8(),
                    state.as_str()
                );
                self.frame_failure(timings);
            }
        }
    }

    /// Close out an accepted exchange
    fn complete_exchange(&mut self) {
        self.phase = Phase::Idle;
        self.sent = None;
        self.retry_count = 0;
        self.frame_errors = 0;
    }

    /// Post-completion bookkeeping: pop acknowledged commands, pace polls
    fn settle(&mut self, sent: SentFrame, queue: &mut CommandQueue) {
        if is_app_command(sent.code) {
            if let Some(done) = queue.complete_front() {
                debug!("PD[{}]: {} acknowledged", self.index, done.name());
            }
        } else if sent.code == CommandCode::Poll {
            self.last_poll = Some(Instant::now());
        }
    }

    /// A received frame failed validation; the reply timeout drives the retry
    fn frame_failure(&mut self, timings: &Timings) {
        self.frame_errors = self.frame_errors.saturating_add(1);
        if self.state == PdSessionState::Online
            && self.frame_errors >= timings.frame_error_resync_threshold
        {
            self.enter_resync("repeated frame errors");
        }
    }

    fn handle_timeout(
        &mut self,
        channel: &mut dyn Channel,
        queue: &mut CommandQueue,
        timings: &Timings,
    ) {
        if self.state == PdSessionState::Resync {
            self.resync_attempts += 1;
            if self.resync_attempts >= timings.resync_max_attempts {
                self.fail_device(queue, "resynchronization failed");
            } else {
                self.seq_zero_pending = true;
                self.phase = Phase::Idle;
                self.sent = None;
            }
            return;
        }

        self.retry_count += 1;
        if self.retry_count > timings.max_retries {
            self.fail_device(queue, "reply timeout, retries exhausted");
            return;
        }
        // Retransmit the identical frame: the device recognizes the repeated
        // sequence number and replays its cached reply instead of acting on
        // the command a second time.
        debug!(
            "PD[{}]: reply timeout, retransmit {} of {}",
            self.index, self.retry_count, timings.max_retries
        );
        match channel.write(&self.last_tx) {
            Ok(n) if n == self.last_tx.len() => {
                self.phase = Phase::Awaiting {
                    sent_at: Instant::now(),
                };
            }
            Ok(n) => {
                warn!(
                    "PD[{}]: short write on retransmit: {} of {} bytes",
                    self.index,
                    n,
                    self.last_tx.len()
                );
                self.fail_device(queue, "short write");
            }
            Err(err) => {
                warn!("PD[{}]: channel write failed: {}", self.index, err);
                self.fail_device(queue, "channel error");
            }
        }
    }

    /// A handshake leg failed; retry, fall back to plaintext, or go offline
    fn handshake_failure(&mut self, queue: &mut CommandQueue, timings: &Timings, reason: &str) {
        warn!("PD[{}]: secure handshake failed: {}", self.index, reason);
        self.sc.reset();
        self.pending_scrypt = None;
        self.sc_attempts += 1;
        if self.sc_attempts <= timings.sc_max_retries {
            return;
        }
        if self.config.flags.enforce_secure_channel {
            self.fail_device(queue, "secure channel required but unavailable");
        } else {
            warn!("PD[{}]: falling back to plaintext operation", self.index);
            self.go_online();
        }
    }

    fn go_online(&mut self) {
        info!(
            "PD[{}]: online ({})",
            self.index,
            if self.sc.is_active() { "secure" } else { "plain" }
        );
        self.transition(PdSessionState::Online);
        self.retry_count = 0;
        self.frame_errors = 0;
        self.resync_attempts = 0;
        self.last_poll = None;
        self.offline_since = None;
    }

    /// Sequence or integrity anomaly while online: restart communication
    ///
    /// Session keys cannot survive a broken MAC chain, so the secure channel
    /// is torn down and re-established after the sequence reset.
    fn enter_resync(&mut self, reason: &str) {
        warn!("PD[{}]: resynchronizing: {}", self.index, reason);
        self.transition(PdSessionState::Resync);
        self.sc.reset();
        self.pending_scrypt = None;
        self.phase = Phase::Idle;
        self.sent = None;
        self.retry_count = 0;
        self.frame_errors = 0;
        self.resync_attempts = 0;
        self.seq_zero_pending = true;
        self.rx.clear();
    }

    /// Take the device offline and discard its pending work
    fn fail_device(&mut self, queue: &mut CommandQueue, reason: &str) {
        warn!("PD[{}]: offline: {}", self.index, reason);
        self.transition(PdSessionState::Offline);
        self.sc.reset();
        self.pending_scrypt = None;
        self.phase = Phase::Idle;
        self.sent = None;
        self.retry_count = 0;
        self.frame_errors = 0;
        self.resync_attempts = 0;
        self.sc_attempts = 0;
        self.seq = 0;
        self.seq_zero_pending = true;
        self.rx.clear();
        self.last_tx.clear();
        self.last_poll = None;
        self.offline_since = Some(Instant::now());
        let dropped = queue.clear();
        if dropped > 0 {
            warn!(
                "PD[{}]: {} queued commands dropped",
                self.index, dropped
            );
        }
    }

    fn transition(&mut self, next: PdSessionState) {
        match self.state.validate_transition(next) {
            Ok(()) => {
                debug!(
                    "PD[{}]: state {} -> {}",
                    self.index,
                    self.state.as_str(),
                    next.as_str()
                );
                self.state = next;
            }
            Err(err) => warn!("PD[{}]: {}", self.index, err),
        }
    }
}

fn is_app_command(code: CommandCode) -> bool {
    matches!(
        code,
        CommandCode::Output | CommandCode::Led | CommandCode::Buzzer | CommandCode::ComSet
    )
}

fn command_code(command: &OsdpCommand) -> CommandCode {
    match command {
        OsdpCommand::Led { .. } => CommandCode::Led,
        OsdpCommand::Buzzer { .. } => CommandCode::Buzzer,
        OsdpCommand::Output { .. } => CommandCode::Output,
        OsdpCommand::ComSet { .. } => CommandCode::ComSet,
    }
}
