//! End-to-end engine tests against a simulated peripheral device
//!
//! Panel and device are joined by an in-memory channel pair; each test
//! iteration runs one `refresh()` followed by one device `process()`.

mod common;

use common::{instant_timeout_timings, patient_timings, SimulatedPd, MASTER_KEY, PD_ADDRESS};
use osdp_cp::{ControlPanel, EnqueueOutcome, Timings};
use osdp_core::{CardFormat, MasterKey, OsdpCommand, OsdpEvent, PdConfig, PdFlags};
use osdp_session::{nak, next_sequence, scs, CommandCode, Packet, ReplyCode};
use osdp_transport::MemoryChannel;
use std::sync::{Arc, Mutex};

fn run(panel: &mut ControlPanel, pd: &mut SimulatedPd, iterations: usize) {
    for _ in 0..iterations {
        panel.refresh();
        pd.process();
    }
}

fn plain_setup(timings: Timings) -> (ControlPanel, SimulatedPd) {
    let (cp_end, pd_end) = MemoryChannel::pair();
    let panel = ControlPanel::builder()
        .channel(Box::new(cp_end))
        .device(PdConfig::new(PD_ADDRESS, 0, 9600))
        .timings(timings)
        .build()
        .unwrap();
    (panel, SimulatedPd::new(pd_end, PD_ADDRESS))
}

fn secure_setup(
    panel_key: [u8; 16],
    pd_key: [u8; 16],
    enforce: bool,
    timings: Timings,
) -> (ControlPanel, SimulatedPd) {
    let (cp_end, pd_end) = MemoryChannel::pair();
    let mut config = PdConfig::new(PD_ADDRESS, 0, 9600);
    config.flags = PdFlags {
        enforce_secure_channel: enforce,
    };
    let panel = ControlPanel::builder()
        .channel(Box::new(cp_end))
        .device(config)
        .master_key(MasterKey::from_bytes(&panel_key).unwrap())
        .timings(timings)
        .build()
        .unwrap();
    (panel, SimulatedPd::new(pd_end, PD_ADDRESS).with_master_key(pd_key))
}

fn capture_events(panel: &mut ControlPanel) -> Arc<Mutex<Vec<(usize, OsdpEvent)>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    panel.set_event_callback(Box::new(move |device, event| {
        sink.lock().unwrap().push((device, event));
    }));
    events
}

fn buzzer(rep_count: u8) -> OsdpCommand {
    OsdpCommand::Buzzer {
        reader: 0,
        control_code: 2,
        on_count: 10,
        off_count: 10,
        rep_count,
    }
}

#[test]
fn test_plain_device_comes_online() {
    let (mut panel, mut pd) = plain_setup(patient_timings());
    run(&mut panel, &mut pd, 10);

    assert!(panel.is_online(0).unwrap());
    assert!(!panel.sc_active(0).unwrap());
    assert_eq!(panel.online_mask(), 0b1);
    assert_eq!(panel.sc_active_mask(), 0);

    let report = panel.device(0).unwrap().ident().cloned().unwrap();
    assert_eq!(report.vendor_code, [0x0A, 0x0B, 0x0C]);
    assert_eq!(report.serial, 0x12345678);
    assert!(!panel.device(0).unwrap().capabilities().is_empty());
}

#[test]
fn test_secure_device_comes_online() {
    let (mut panel, mut pd) = secure_setup(MASTER_KEY, MASTER_KEY, true, patient_timings());
    run(&mut panel, &mut pd, 20);

    assert!(panel.is_online(0).unwrap());
    assert!(panel.sc_active(0).unwrap());
    assert!(pd.sc_active());
    assert_eq!(panel.sc_active_mask(), 0b1);
}

#[test]
fn test_wrong_master_key_falls_back_to_plaintext() {
    let (mut panel, mut pd) = secure_setup(MASTER_KEY, [0xEE; 16], false, patient_timings());
    run(&mut panel, &mut pd, 40);

    assert!(panel.is_online(0).unwrap());
    assert!(!panel.sc_active(0).unwrap());
    assert!(!pd.sc_active());
}

#[test]
fn test_wrong_master_key_enforced_never_online() {
    let (mut panel, mut pd) = secure_setup(MASTER_KEY, [0xEE; 16], true, patient_timings());
    run(&mut panel, &mut pd, 60);

    assert!(!panel.is_online(0).unwrap());
    assert!(!panel.sc_active(0).unwrap());
    assert!(!pd.sc_active());
}

#[test]
fn test_sequence_numbers_cycle_without_repeats() {
    let (mut panel, mut pd) = plain_setup(patient_timings());
    run(&mut panel, &mut pd, 40);
    assert!(panel.is_online(0).unwrap());

    let seqs = &pd.seen_seqs;
    assert!(seqs.len() > 10);
    // One communication reset at startup, never again
    assert_eq!(seqs[0], 0);
    assert!(!seqs[1..].contains(&0));
    // Every subsequent number advances through the 1-2-3 cycle
    for pair in seqs.windows(2) {
        assert_eq!(pair[1], next_sequence(pair[0]));
    }
}

#[test]
fn test_polling_produces_no_spurious_events() {
    let (mut panel, mut pd) = plain_setup(patient_timings());
    let events = capture_events(&mut panel);
    run(&mut panel, &mut pd, 30);

    let polls = pd
        .received
        .iter()
        .filter(|(code, _)| *code == CommandCode::Poll.as_u8())
        .count();
    assert!(polls > 5);
    assert!(events.lock().unwrap().is_empty());
}

#[test]
fn test_card_read_event_delivered() {
    let (mut panel, mut pd) = plain_setup(patient_timings());
    let events = capture_events(&mut panel);
    run(&mut panel, &mut pd, 10);
    assert!(panel.is_online(0).unwrap());

    // reader 0, Wiegand, 26 bits
    pd.queue_event(ReplyCode::Raw, vec![0, 1, 26, 0, 0xAB, 0xCD, 0xEF, 0x80]);
    run(&mut panel, &mut pd, 5);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0],
        (
            0,
            OsdpEvent::CardRead {
                reader: 0,
                format: CardFormat::Wiegand,
                bit_count: 26,
                data: vec![0xAB, 0xCD, 0xEF, 0x80],
            }
        )
    );
}

#[test]
fn test_command_queued_offline_dispatched_after_online() {
    let (mut panel, mut pd) = plain_setup(patient_timings());
    assert_eq!(
        panel.send_command(0, buzzer(1)).unwrap(),
        EnqueueOutcome::Queued
    );
    run(&mut panel, &mut pd, 20);

    assert!(panel.is_online(0).unwrap());
    let delivered: Vec<_> = pd
        .received
        .iter()
        .filter(|(code, _)| *code == CommandCode::Buzzer.as_u8())
        .collect();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].1, buzzer(1).wire_data());
}

#[test]
fn test_corrupted_reply_retransmits_same_sequence() {
    let (mut panel, mut pd) = plain_setup(instant_timeout_timings());
    let events = capture_events(&mut panel);
    run(&mut panel, &mut pd, 10);
    assert!(panel.is_online(0).unwrap());

    panel.send_command(0, buzzer(3)).unwrap();
    pd.corrupt_next = true;
    run(&mut panel, &mut pd, 6);

    // The device acted on the command exactly once; the second delivery of
    // the same sequence number was answered from its reply cache
    let delivered = pd
        .received
        .iter()
        .filter(|(code, _)| *code == CommandCode::Buzzer.as_u8())
        .count();
    assert_eq!(delivered, 1);

    // The retransmit reused the sequence number of the corrupted exchange
    let repeated = pd
        .seen_seqs
        .windows(2)
        .any(|pair| pair[0] != 0 && pair[0] == pair[1]);
    assert!(repeated);
    assert!(events.lock().unwrap().is_empty());
    assert!(panel.is_online(0).unwrap());
}

#[test]
fn test_dead_device_does_not_starve_healthy_one() {
    // Two devices share one half-duplex channel; only address 1 answers
    let (cp_end, pd_end) = MemoryChannel::pair();
    let mut panel = ControlPanel::builder()
        .channel(Box::new(cp_end))
        .device(PdConfig::new(PD_ADDRESS, 0, 9600))
        .device(PdConfig::new(2, 0, 9600))
        .timings(instant_timeout_timings())
        .build()
        .unwrap();
    let mut pd = SimulatedPd::new(pd_end, PD_ADDRESS);

    run(&mut panel, &mut pd, 60);

    assert!(panel.is_online(0).unwrap());
    assert!(!panel.is_online(1).unwrap());
}

#[test]
fn test_queue_overflow_executes_newest_command() {
    let (cp_end, pd_end) = MemoryChannel::pair();
    let mut panel = ControlPanel::builder()
        .channel(Box::new(cp_end))
        .device(PdConfig::new(PD_ADDRESS, 0, 9600))
        .timings(patient_timings())
        .queue_depth(1)
        .build()
        .unwrap();
    let mut pd = SimulatedPd::new(pd_end, PD_ADDRESS);

    assert_eq!(
        panel.send_command(0, buzzer(1)).unwrap(),
        EnqueueOutcome::Queued
    );
    assert_eq!(
        panel.send_command(0, buzzer(2)).unwrap(),
        EnqueueOutcome::QueuedDroppedOldest(buzzer(1))
    );
    run(&mut panel, &mut pd, 20);

    let delivered: Vec<_> = pd
        .received
        .iter()
        .filter(|(code, _)| *code == CommandCode::Buzzer.as_u8())
        .collect();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].1, buzzer(2).wire_data());
}

#[test]
fn test_sequence_nak_triggers_resync() {
    let (mut panel, mut pd) = plain_setup(patient_timings());
    let events = capture_events(&mut panel);
    run(&mut panel, &mut pd, 10);
    assert!(panel.is_online(0).unwrap());

    pd.nak_next(nak::SEQ_NUM);
    run(&mut panel, &mut pd, 10);

    assert!(panel.is_online(0).unwrap());
    // Startup reset plus the resynchronization reset
    let resets = pd.seen_seqs.iter().filter(|&&s| s == 0).count();
    assert_eq!(resets, 2);
    assert!(events.lock().unwrap().is_empty());
}

#[test]
fn test_resync_reestablishes_secure_channel() {
    let (mut panel, mut pd) = secure_setup(MASTER_KEY, MASTER_KEY, true, patient_timings());
    run(&mut panel, &mut pd, 20);
    assert!(panel.sc_active(0).unwrap());

    pd.nak_next(nak::SEQ_NUM);
    run(&mut panel, &mut pd, 20);

    // The sequence reset wiped the session; a fresh handshake followed
    assert!(panel.is_online(0).unwrap());
    assert!(panel.sc_active(0).unwrap());
    assert!(pd.sc_active());
    assert_eq!(pd.seen_seqs.iter().filter(|&&s| s == 0).count(), 2);
}

#[test]
fn test_secure_commands_are_encrypted() {
    let (mut panel, mut pd) = secure_setup(MASTER_KEY, MASTER_KEY, true, patient_timings());
    run(&mut panel, &mut pd, 20);
    assert!(panel.sc_active(0).unwrap());

    panel.send_command(0, buzzer(1)).unwrap();
    run(&mut panel, &mut pd, 5);

    // Polls travel MAC-only, command bodies travel encrypted
    assert!(pd.secure_scs_seen.contains(&scs::CMD_MAC));
    assert!(pd.secure_scs_seen.contains(&scs::CMD_ENC));
    let delivered: Vec<_> = pd
        .received
        .iter()
        .filter(|(code, _)| *code == CommandCode::Buzzer.as_u8())
        .collect();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].1, buzzer(1).wire_data());
}

#[test]
fn test_invalid_frame_flood_does_not_break_session() {
    let (mut panel, mut pd) = plain_setup(patient_timings());
    // First refresh puts the identification exchange in flight
    panel.refresh();

    // Flood the reply direction with well-framed but corrupt packets
    let mut bad = Packet::reply(PD_ADDRESS, 1, ReplyCode::Ack.as_u8(), vec![])
        .encode()
        .unwrap();
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;
    for _ in 0..300 {
        pd.inject(&bad);
    }
    panel.refresh();

    // The genuine reply still settles the exchange afterwards
    pd.process();
    run(&mut panel, &mut pd, 10);
    assert!(panel.is_online(0).unwrap());
}

#[test]
fn test_stale_bytes_discarded_after_offline() {
    let (mut panel, mut pd) = plain_setup(instant_timeout_timings());
    run(&mut panel, &mut pd, 10);
    assert!(panel.is_online(0).unwrap());

    pd.unresponsive = true;
    run(&mut panel, &mut pd, 10);
    assert!(!panel.is_online(0).unwrap());

    // A late reply from the dead period surfaces just before recovery; it
    // must not be taken as the answer to the restarted exchange
    let stale = Packet::reply(PD_ADDRESS, 2, ReplyCode::Ack.as_u8(), vec![])
        .encode()
        .unwrap();
    pd.inject(&stale);
    pd.unresponsive = false;
    run(&mut panel, &mut pd, 15);
    assert!(panel.is_online(0).unwrap());
}

#[test]
fn test_unresponsive_device_goes_offline_and_recovers() {
    let (mut panel, mut pd) = plain_setup(instant_timeout_timings());
    run(&mut panel, &mut pd, 10);
    assert!(panel.is_online(0).unwrap());

    pd.unresponsive = true;
    run(&mut panel, &mut pd, 10);
    assert!(!panel.is_online(0).unwrap());

    pd.unresponsive = false;
    run(&mut panel, &mut pd, 10);
    assert!(panel.is_online(0).unwrap());
}

#[test]
fn test_events_reach_callback_with_secure_session() {
    let (mut panel, mut pd) = secure_setup(MASTER_KEY, MASTER_KEY, true, patient_timings());
    let events = capture_events(&mut panel);
    run(&mut panel, &mut pd, 20);
    assert!(panel.sc_active(0).unwrap());

    pd.queue_event(ReplyCode::Keypad, vec![1, 3, b'4', b'5', b'6']);
    run(&mut panel, &mut pd, 5);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0],
        (
            0,
            OsdpEvent::KeyPress {
                reader: 1,
                digits: vec![b'4', b'5', b'6'],
            }
        )
    );
}
