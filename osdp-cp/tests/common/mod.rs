//! Simulated peripheral device for engine integration tests
//!
//! Speaks the PD side of the protocol over the loopback end of a
//! `MemoryChannel::pair()`: identification, capability report, the secure
//! channel handshake, reply caching for retransmitted sequence numbers, and
//! a handful of fault-injection knobs.

#![allow(dead_code)]

use bytes::BytesMut;
use osdp_cp::Timings;
use osdp_security::{compute_scbk, initial_rmac, pd_cryptogram, SecureChannel};
use osdp_session::{
    extract_frame, nak, scs, CommandCode, Packet, ReplyCode, Scb, MAC_LEN,
};
use osdp_transport::{Channel, MemoryChannel};
use std::time::Duration;

pub const PD_ADDRESS: u8 = 1;
pub const MASTER_KEY: [u8; 16] = *b"0123456789abcdef";
pub const CUID: [u8; 8] = [0xC0, 1, 2, 3, 4, 5, 6, 7];
const RND_B: [u8; 8] = [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6, 0xB7];

/// Timings for tests where replies arrive within the same iteration
pub fn patient_timings() -> Timings {
    Timings {
        reply_timeout: Duration::from_secs(5),
        poll_interval: Duration::ZERO,
        offline_retry_interval: Duration::ZERO,
        ..Timings::default()
    }
}

/// Timings where every missed reply times out on the next refresh
pub fn instant_timeout_timings() -> Timings {
    Timings {
        reply_timeout: Duration::ZERO,
        poll_interval: Duration::ZERO,
        offline_retry_interval: Duration::ZERO,
        ..Timings::default()
    }
}

pub struct SimulatedPd {
    channel: MemoryChannel,
    address: u8,
    master_key: Option<[u8; 16]>,
    sc: SecureChannel,
    rx: BytesMut,
    last_seq: Option<u8>,
    last_reply: Vec<u8>,
    pending_event: Option<(ReplyCode, Vec<u8>)>,
    nak_next_reason: Option<u8>,
    /// Swallow all traffic without replying
    pub unresponsive: bool,
    /// Corrupt one byte of the next transmitted reply
    pub corrupt_next: bool,
    /// Every sequence number seen, in arrival order
    pub seen_seqs: Vec<u8>,
    /// Every accepted command: (code, decrypted payload)
    pub received: Vec<(u8, Vec<u8>)>,
    /// SCS types observed on secure-session commands
    pub secure_scs_seen: Vec<u8>,
}

impl SimulatedPd {
    pub fn new(channel: MemoryChannel, address: u8) -> Self {
        Self {
            channel,
            address,
            master_key: None,
            sc: SecureChannel::new(),
            rx: BytesMut::new(),
            last_seq: None,
            last_reply: Vec::new(),
            pending_event: None,
            nak_next_reason: None,
            unresponsive: false,
            corrupt_next: false,
            seen_seqs: Vec::new(),
            received: Vec::new(),
            secure_scs_seen: Vec::new(),
        }
    }

    pub fn with_master_key(mut self, key: [u8; 16]) -> Self {
        self.master_key = Some(key);
        self
    }

    pub fn sc_active(&self) -> bool {
        self.sc.is_active()
    }

    /// Deliver this event payload in place of the next poll acknowledge
    pub fn queue_event(&mut self, code: ReplyCode, payload: Vec<u8>) {
        self.pending_event = Some((code, payload));
    }

    /// Answer the next command with a NAK carrying this reason
    pub fn nak_next(&mut self, reason: u8) {
        self.nak_next_reason = Some(reason);
    }

    /// Write raw bytes toward the panel, bypassing the protocol
    pub fn inject(&mut self, bytes: &[u8]) {
        self.channel.write(bytes).unwrap();
    }

    /// Drain the channel and answer every complete frame
    pub fn process(&mut self) {
        let mut chunk = [0u8; 256];
        loop {
            let n = self.channel.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            if !self.unresponsive {
                self.rx.extend_from_slice(&chunk[..n]);
            }
        }
        while let Some(frame) = extract_frame(&mut self.rx) {
            self.handle(&frame);
        }
    }

    fn handle(&mut self, frame: &[u8]) {
        let Ok(packet) = Packet::decode(frame) else {
            return;
        };
        if packet.is_reply || packet.address != self.address {
            return;
        }
        self.seen_seqs.push(packet.sequence);

        // A repeated sequence number is a retransmit: replay the cached
        // reply instead of acting on the command again
        if packet.sequence != 0 && self.last_seq == Some(packet.sequence) {
            let cached = self.last_reply.clone();
            self.transmit(cached);
            return;
        }
        if packet.sequence == 0 {
            self.last_seq = None;
            self.sc.reset();
        }

        let mut payload = packet.data.clone();
        let secure = self.sc.is_active();
        if secure {
            let Some(scb) = packet.scb.clone() else {
                return;
            };
            let Ok(scope) = Packet::mac_scope(frame) else {
                return;
            };
            let Ok(mac) = self.sc.compute_mac(true, scope) else {
                return;
            };
            match packet.mac {
                Some(wire) if wire == mac[..MAC_LEN] => {}
                _ => return,
            }
            self.sc.commit_mac(true, mac);
            if scb.is_encrypted() {
                let Ok(plain) = self.sc.decrypt_payload(true, &payload) else {
                    return;
                };
                payload = plain;
            }
            self.secure_scs_seen.push(scb.scs_type);
        }

        let Ok(code) = CommandCode::from_u8(packet.id) else {
            self.reply(
                packet.sequence,
                ReplyCode::Nak,
                vec![nak::CMD_UNKNOWN],
                None,
                secure,
            );
            return;
        };
        self.received.push((packet.id, payload.clone()));

        if let Some(reason) = self.nak_next_reason.take() {
            self.reply(packet.sequence, ReplyCode::Nak, vec![reason], None, secure);
            return;
        }

        match code {
            CommandCode::Poll => match self.pending_event.take() {
                Some((reply_code, data)) => {
                    self.reply(packet.sequence, reply_code, data, None, secure)
                }
                None => self.reply(packet.sequence, ReplyCode::Ack, vec![], None, secure),
            },
            CommandCode::Id => self.reply(
                packet.sequence,
                ReplyCode::PdId,
                vec![
                    0x0A, 0x0B, 0x0C, // vendor
                    1,    // model
                    1,    // version
                    0x78, 0x56, 0x34, 0x12, // serial LE
                    1, 0, 0, // firmware
                ],
                None,
                secure,
            ),
            CommandCode::Cap => {
                self.reply(packet.sequence, ReplyCode::PdCap, vec![4, 1, 8], None, secure)
            }
            CommandCode::LocalStatus => self.reply(
                packet.sequence,
                ReplyCode::LocalStatus,
                vec![0, 0],
                None,
                secure,
            ),
            CommandCode::Led | CommandCode::Buzzer | CommandCode::Output => {
                self.reply(packet.sequence, ReplyCode::Ack, vec![], None, secure)
            }
            CommandCode::ComSet => {
                self.reply(packet.sequence, ReplyCode::Com, payload, None, secure)
            }
            CommandCode::Challenge => self.handle_challenge(packet.sequence, &payload),
            CommandCode::SCrypt => self.handle_scrypt(packet.sequence, &payload),
        }
    }

    fn handle_challenge(&mut self, sequence: u8, payload: &[u8]) {
        let Some(master_key) = self.master_key else {
            self.reply(sequence, ReplyCode::Nak, vec![nak::SC_UNSUP], None, false);
            return;
        };
        if payload.len() < 8 {
            return;
        }
        let mut cp_random = [0u8; 8];
        cp_random.copy_from_slice(&payload[..8]);

        let scbk = compute_scbk(&master_key, &CUID);
        self.sc.install(&scbk, cp_random, RND_B);
        let keys = self.sc.keys().unwrap().clone();

        let mut body = CUID.to_vec();
        body.extend_from_slice(&RND_B);
        body.extend_from_slice(&pd_cryptogram(&keys, &cp_random, &RND_B));
        self.reply(
            sequence,
            ReplyCode::CCrypt,
            body,
            Some(Scb::with_data(scs::CCRYPT, vec![1])),
            false,
        );
    }

    fn handle_scrypt(&mut self, sequence: u8, payload: &[u8]) {
        let Some(keys) = self.sc.keys().cloned() else {
            return;
        };
        if payload.len() < 16 {
            return;
        }
        let mut cp_crypt = [0u8; 16];
        cp_crypt.copy_from_slice(&payload[..16]);
        let rmac_i = initial_rmac(&keys, &cp_crypt);
        self.reply(
            sequence,
            ReplyCode::RMacI,
            rmac_i.to_vec(),
            Some(Scb::with_data(scs::RMAC_I, vec![1])),
            false,
        );
        self.sc.activate(rmac_i);
    }

    fn reply(
        &mut self,
        sequence: u8,
        code: ReplyCode,
        data: Vec<u8>,
        scb: Option<Scb>,
        secure: bool,
    ) {
        let mut packet = Packet::reply(self.address, sequence, code.as_u8(), data);
        let bytes = if secure {
            if packet.data.is_empty() {
                packet.scb = Some(Scb::new(scs::REPLY_MAC));
            } else {
                packet.data = self.sc.encrypt_payload(false, &packet.data).unwrap();
                packet.scb = Some(Scb::new(scs::REPLY_ENC));
            }
            let unsealed = packet.encode_unsealed().unwrap();
            let mac = self.sc.compute_mac(false, &unsealed).unwrap();
            self.sc.commit_mac(false, mac);
            Packet::seal(unsealed, Some(mac), true)
        } else {
            packet.scb = scb;
            packet.encode().unwrap()
        };
        self.last_seq = Some(sequence);
        self.last_reply = bytes.clone();
        self.transmit(bytes);
    }

    fn transmit(&mut self, mut bytes: Vec<u8>) {
        if self.corrupt_next {
            let last = bytes.len() - 1;
            bytes[last] ^= 0xFF;
            self.corrupt_next = false;
        }
        self.channel.write(&bytes).unwrap();
    }
}
