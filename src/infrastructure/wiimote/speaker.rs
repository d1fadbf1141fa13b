//! Speaker Control
//!
//! Turning the speaker on and off is a fixed script of reports and register
//! writes. Audio is streamed as speaker data reports, one every
//! [`SPEAKER_REPORT_PERIOD`].

use super::protocol::{self, RwFlags};
use super::sequence::WriteStep;
use super::{ControlChannel, Wiimote, WiimoteError};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Speaker sample rate used by the beep stream
pub const SPEAKER_SAMPLE_RATE_HZ: u64 = 1960;

/// Samples carried by one speaker data report
pub const SAMPLES_PER_REPORT: usize = 20;

/// Time covered by one speaker data report (10.204081 ms)
pub const SPEAKER_REPORT_PERIOD: Duration =
    Duration::from_nanos(SAMPLES_PER_REPORT as u64 * 1_000_000_000 / SPEAKER_SAMPLE_RATE_HZ);

/// Reports sent by one beep
pub const BEEP_REPORTS: usize = 100;

/// Header byte (sample count << 3) followed by the samples
pub const BEEP_REPORT: [u8; SAMPLES_PER_REPORT + 1] = {
    let mut buf = [0xC3u8; SAMPLES_PER_REPORT + 1];
    buf[0] = (SAMPLES_PER_REPORT as u8) << 3;
    buf
};

pub const SPEAKER_ENABLE_SEQUENCE: &[WriteStep<'static>] = &[
    WriteStep::RawReport {
        report_id: protocol::RPT_SPEAKER_ENABLE,
        flags: 0,
        payload: &[0x04],
    },
    WriteStep::RawReport {
        report_id: protocol::RPT_SPEAKER_MUTE,
        flags: 0,
        payload: &[0x04],
    },
    WriteStep::MemoryWrite {
        offset: 0xA20009,
        payload: &[0x01],
        flags: RwFlags::REGISTER,
    },
    WriteStep::MemoryWrite {
        offset: 0xA20001,
        payload: &[0x08],
        flags: RwFlags::REGISTER,
    },
    // 8-bit PCM configuration
    WriteStep::MemoryWrite {
        offset: 0xA20001,
        payload: &[0x00, 0x00, 0x00, 0x0C, 0x40, 0x00, 0x00],
        flags: RwFlags::REGISTER,
    },
    WriteStep::MemoryWrite {
        offset: 0xA20008,
        payload: &[0x01],
        flags: RwFlags::REGISTER,
    },
    WriteStep::RawReport {
        report_id: protocol::RPT_SPEAKER_MUTE,
        flags: 0,
        payload: &[0x00],
    },
];

pub const SPEAKER_DISABLE_SEQUENCE: &[WriteStep<'static>] = &[
    WriteStep::RawReport {
        report_id: protocol::RPT_SPEAKER_MUTE,
        flags: 0,
        payload: &[0x04],
    },
    WriteStep::RawReport {
        report_id: protocol::RPT_SPEAKER_ENABLE,
        flags: 0,
        payload: &[0x00],
    },
];

/// Clock and sleep used to pace the audio stream
pub trait Pacer {
    fn now(&mut self) -> Instant;

    /// Return once `deadline` has passed
    fn wait_until(&mut self, deadline: Instant);
}

/// Real-time pacer backed by `thread::sleep`
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepPacer;

impl Pacer for SleepPacer {
    fn now(&mut self) -> Instant {
        Instant::now()
    }

    fn wait_until(&mut self, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
    }
}

impl<C: ControlChannel> Wiimote<C> {
    pub fn speaker_enable(&self) -> Result<(), WiimoteError> {
        self.execute(SPEAKER_ENABLE_SEQUENCE).inspect_err(|_| {
            self.report_error("Error on speaker enable");
        })
    }

    pub fn speaker_disable(&self) -> Result<(), WiimoteError> {
        self.execute(SPEAKER_DISABLE_SEQUENCE).inspect_err(|_| {
            self.report_error("Error on speaker disable");
        })
    }

    /// Play a short tone of [`BEEP_REPORTS`] speaker reports
    pub fn beep(&self) -> Result<(), WiimoteError> {
        self.beep_with(&mut SleepPacer, BEEP_REPORTS)
    }

    /// Play `reports` speaker reports paced by `pacer`
    ///
    /// Deadlines are absolute (start + n periods) so a late wake-up does
    /// not push back every following report. A failed enable is remembered
    /// but the stream still runs; only a failed speaker data report cuts it
    /// short. The speaker is disabled afterwards in every case and the first
    /// error is returned.
    pub fn beep_with<P: Pacer>(&self, pacer: &mut P, reports: usize) -> Result<(), WiimoteError> {
        info!(device = self.id, reports, "Beep");

        let enabled = self.speaker_enable();

        let mut deadline = pacer.now();
        let mut streamed = Ok(());
        for i in 0..reports {
            deadline += SPEAKER_REPORT_PERIOD;
            if let Err(e) = self.send_report(0, protocol::RPT_SPEAKER_DATA, &BEEP_REPORT) {
                warn!(device = self.id, report = i, "Speaker stream aborted");
                self.report_error("Error on speaker data");
                streamed = Err(e);
                break;
            }
            pacer.wait_until(deadline);
        }

        let disabled = self.speaker_disable();
        enabled.and(streamed).and(disabled)
    }
}
