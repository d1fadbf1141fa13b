mod common;

use std::time::Instant;

use wiimote_rw::infrastructure::wiimote::protocol::{
    RPT_SPEAKER_DATA, RPT_SPEAKER_ENABLE, RPT_SPEAKER_MUTE, RPT_WRITE,
};
use wiimote_rw::infrastructure::wiimote::speaker::{BEEP_REPORT, BEEP_REPORTS, SPEAKER_REPORT_PERIOD};
use wiimote_rw::infrastructure::wiimote::Pacer;
use wiimote_rw::WiimoteError;

/// Fixed clock that records every deadline instead of sleeping
struct RecordingPacer {
    start: Instant,
    deadlines: Vec<Instant>,
}

impl RecordingPacer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            deadlines: Vec::new(),
        }
    }
}

impl Pacer for RecordingPacer {
    fn now(&mut self) -> Instant {
        self.start
    }

    fn wait_until(&mut self, deadline: Instant) {
        self.deadlines.push(deadline);
    }
}

const ENABLE_IDS: [u8; 7] = [
    RPT_SPEAKER_ENABLE,
    RPT_SPEAKER_MUTE,
    RPT_WRITE,
    RPT_WRITE,
    RPT_WRITE,
    RPT_WRITE,
    RPT_SPEAKER_MUTE,
];
const DISABLE_IDS: [u8; 2] = [RPT_SPEAKER_MUTE, RPT_SPEAKER_ENABLE];

#[test]
fn test_beep_streams_paced_reports() {
    let emu = common::connect(2);
    let mut pacer = RecordingPacer::new();
    emu.wiimote.beep_with(&mut pacer, BEEP_REPORTS).unwrap();

    let state = emu.state();
    let ids = state.report_ids();
    assert_eq!(ids.len(), ENABLE_IDS.len() + BEEP_REPORTS + DISABLE_IDS.len());
    assert_eq!(&ids[..7], &ENABLE_IDS);
    assert!(ids[7..7 + BEEP_REPORTS].iter().all(|&id| id == RPT_SPEAKER_DATA));
    assert_eq!(&ids[7 + BEEP_REPORTS..], &DISABLE_IDS);

    let data = state.frames_of(RPT_SPEAKER_DATA);
    assert_eq!(&data[0][2..], &BEEP_REPORT);

    assert_eq!(pacer.deadlines.len(), BEEP_REPORTS);
    for (i, deadline) in pacer.deadlines.iter().enumerate() {
        assert_eq!(*deadline, pacer.start + SPEAKER_REPORT_PERIOD * (i as u32 + 1));
    }
}

#[test]
fn test_speaker_configuration_writes() {
    let emu = common::connect(2);
    emu.wiimote.speaker_enable().unwrap();

    let state = emu.state();
    assert_eq!(state.registers.get(&0xA20009), Some(&0x01));
    assert_eq!(state.registers.get(&0xA20008), Some(&0x01));
    // 0x08 first, then overwritten by the PCM configuration block
    let config: Vec<u8> = (0xA20001..0xA20008).map(|a| state.registers[&a]).collect();
    assert_eq!(config, vec![0x00, 0x00, 0x00, 0x0C, 0x40, 0x00, 0x00]);

    let sent = &state.sent;
    assert_eq!(sent[0], vec![0x52, RPT_SPEAKER_ENABLE, 0x04]);
    assert_eq!(sent[1], vec![0x52, RPT_SPEAKER_MUTE, 0x04]);
    assert_eq!(sent[6], vec![0x52, RPT_SPEAKER_MUTE, 0x00]);
}

#[test]
fn test_beep_disables_after_stream_failure() {
    let emu = common::connect(2);
    emu.state().fail_report = Some((RPT_SPEAKER_DATA, 5));

    let mut pacer = RecordingPacer::new();
    let res = emu.wiimote.beep_with(&mut pacer, BEEP_REPORTS);
    assert!(res.is_err());
    assert_eq!(pacer.deadlines.len(), 5);

    let state = emu.state();
    assert_eq!(state.frames_of(RPT_SPEAKER_DATA).len(), 5);
    let tail: Vec<Vec<u8>> = state.sent[state.sent.len() - 2..].to_vec();
    assert_eq!(
        tail,
        vec![vec![0x52, RPT_SPEAKER_MUTE, 0x04], vec![0x52, RPT_SPEAKER_ENABLE, 0x00]]
    );
}

#[test]
fn test_beep_streams_even_when_enable_fails() {
    let emu = common::connect(2);
    emu.state().handshake_script.push_back(0x03);

    let mut pacer = RecordingPacer::new();
    let res = emu.wiimote.beep_with(&mut pacer, BEEP_REPORTS);
    assert!(
        matches!(res, Err(WiimoteError::HandshakeFailed(0x03))),
        "the enable failure is the one returned"
    );
    assert_eq!(pacer.deadlines.len(), BEEP_REPORTS);

    let state = emu.state();
    let ids = state.report_ids();
    assert_eq!(ids[0], RPT_SPEAKER_ENABLE, "enable stops at its failed first report");
    assert!(ids[1..1 + BEEP_REPORTS].iter().all(|&id| id == RPT_SPEAKER_DATA));
    assert_eq!(&ids[1 + BEEP_REPORTS..], &DISABLE_IDS);
}
