use crate::device::{DeviceHandle, DeviceStatus};
use crate::pipeline::{CorrectionChain, PipelineResult, PipelineState};
use crate::retry::Sleeper;
use crate::transport::BusTransport;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_CADENCE: Duration = Duration::from_millis(100);
pub const DEFAULT_SUMMARY_EVERY: u64 = 50;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PollStats {
    pub ticks: u64,
    pub summaries: u64,
}

/// Services both receivers at a fixed cadence once setup has finished.
#[derive(Debug, Clone)]
pub struct PollLoop {
    cadence: Duration,
    summary_every: u64,
    stats: PollStats,
}

impl PollLoop {
    pub fn new(cadence: Duration) -> Self {
        Self {
            cadence,
            summary_every: DEFAULT_SUMMARY_EVERY,
            stats: PollStats::default(),
        }
    }

    /// Log a status summary every `ticks` ticks; zero disables it.
    pub fn with_summary_every(mut self, ticks: u64) -> Self {
        self.summary_every = ticks;
        self
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    pub fn stats(&self) -> &PollStats {
        &self.stats
    }

    /// Polling is only meaningful once setup has reached `Ready`.
    pub fn may_start(setup: &PipelineResult) -> bool {
        setup.state == PipelineState::Ready
    }

    /// One cadence tick: correction receiver first, then position receiver.
    ///
    /// Callers are expected to have checked [`PollLoop::may_start`]. Ticking an
    /// unconfigured chain is harmless but only drains whatever the devices send.
    pub fn tick<B: BusTransport, H: DeviceHandle>(&mut self, chain: &mut CorrectionChain<B, H>) {
        chain.correction.poll(&mut chain.bus);
        chain.position.poll(&mut chain.bus);

        self.stats.ticks = self.stats.ticks.wrapping_add(1);
        if self.summary_every > 0 && self.stats.ticks % self.summary_every == 0 {
            self.stats.summaries += 1;
            info!(
                "steady state: correction [{}] position [{}]",
                summarize(chain.correction.status()),
                summarize(chain.position.status())
            );
        }
    }

    /// Tick forever, or `limit` times when given, sleeping one cadence between ticks.
    /// Does not check setup; see [`PollLoop::run_after`].
    pub fn run<B, H, S>(&mut self, chain: &mut CorrectionChain<B, H>, sleeper: &mut S, limit: Option<u64>)
    where
        B: BusTransport,
        H: DeviceHandle,
        S: Sleeper,
    {
        debug!("poll loop running every {:?}", self.cadence);
        let mut remaining = limit;
        loop {
            if remaining == Some(0) {
                break;
            }
            self.tick(chain);
            remaining = remaining.map(|n| n - 1);
            sleeper.sleep(self.cadence);
        }
    }

    /// Like [`PollLoop::run`], but only once `setup` ended in `Ready`.
    /// Returns whether the loop ran.
    pub fn run_after<B, H, S>(
        &mut self,
        setup: &PipelineResult,
        chain: &mut CorrectionChain<B, H>,
        sleeper: &mut S,
        limit: Option<u64>,
    ) -> bool
    where
        B: BusTransport,
        H: DeviceHandle,
        S: Sleeper,
    {
        if !Self::may_start(setup) {
            warn!("setup ended in {:?}, not starting the poll loop", setup.state);
            return false;
        }
        self.run(chain, sleeper, limit);
        true
    }
}

impl Default for PollLoop {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_CADENCE)
    }
}

/// One-line summary of a device's last known state.
pub fn summarize(status: &DeviceStatus) -> String {
    let mut parts = Vec::new();

    if let Some(pmp) = status.last_pmp {
        parts.push(format!(
            "lband {} {:.1} dB",
            if pmp.locked { "locked" } else { "searching" },
            pmp.ebno_db
        ));
    }
    if let Some(fix) = status.last_fix {
        parts.push(format!("fix {:?}/{:?} sv {}", fix.fix_type, fix.carrier, fix.satellites));
    }
    if let Some(correction) = status.last_correction {
        parts.push(format!(
            "corrections {}{}",
            if correction.decrypted { "decrypted" } else { "encrypted" },
            if correction.used { " used" } else { "" }
        ));
    }
    if status.keys_confirmed {
        parts.push("keys confirmed".to_string());
    }
    if parts.is_empty() {
        parts.push("no reports".to_string());
    }
    parts.push(format!("frames {}", status.frames_drained));

    parts.join(", ")
}
