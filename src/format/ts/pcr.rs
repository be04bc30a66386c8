use super::packet::TsPacket;
use super::types::{pcr_delta, PidSet, PCR_HZ, TS_PACKET_BITS};
use std::collections::{HashMap, VecDeque};

/// Number of clock references kept per PID.
pub const PCR_WINDOW: usize = 64;

pub const DEFAULT_MIN_PIDS: usize = 1;
pub const DEFAULT_MIN_PCRS: usize = 4;

#[derive(Debug, Clone, Copy)]
struct ClockReference {
    pcr: u64,
    packet_index: u64,
}

/// Transport bitrate estimator driven by PCR values.
///
/// For every watched PID the analyzer keeps the last [`PCR_WINDOW`] clock
/// references together with the packet index at which each was seen. The
/// bitrate of one PID is the number of packets between its oldest and newest
/// reference divided by the 27 MHz time between them; the reported bitrate
/// is the average over all PIDs that hold at least `min_pcrs` references.
#[derive(Debug, Clone)]
pub struct PcrAnalyzer {
    min_pids: usize,
    min_pcrs: usize,
    filter: PidSet,
    windows: HashMap<u16, VecDeque<ClockReference>>,
    packets: u64,
}

impl Default for PcrAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_PIDS, DEFAULT_MIN_PCRS)
    }
}

impl PcrAnalyzer {
    pub fn new(min_pids: usize, min_pcrs: usize) -> Self {
        Self {
            min_pids: min_pids.max(1),
            min_pcrs: min_pcrs.max(2),
            filter: PidSet::all(),
            windows: HashMap::new(),
            packets: 0,
        }
    }

    /// Restricts clock reference collection to `pids`.
    pub fn with_filter(mut self, pids: PidSet) -> Self {
        self.filter = pids;
        self
    }

    /// Total packets fed since creation or the last reset.
    pub fn packet_count(&self) -> u64 {
        self.packets
    }

    pub fn reset(&mut self) {
        self.windows.clear();
        self.packets = 0;
    }

    pub fn feed(&mut self, packet: &TsPacket) {
        let index = self.packets;
        self.packets += 1;

        let pid = packet.pid();
        if !self.filter.contains(pid) {
            return;
        }
        let Some(pcr) = packet.pcr() else {
            return;
        };

        let window = self.windows.entry(pid).or_default();
        if packet.discontinuity_indicator() {
            window.clear();
        }
        window.push_back(ClockReference {
            pcr,
            packet_index: index,
        });
        while window.len() > PCR_WINDOW {
            window.pop_front();
        }
    }

    pub fn bitrate_valid(&self) -> bool {
        self.bitrate().is_some()
    }

    /// Average transport bitrate in bits/s, once enough references were seen.
    pub fn bitrate(&self) -> Option<u64> {
        let (sum, count) = self
            .windows
            .values()
            .filter(|window| window.len() >= self.min_pcrs)
            .filter_map(window_bitrate)
            .fold((0u64, 0usize), |(sum, count), rate| (sum + rate, count + 1));

        if count == 0 || count < self.min_pids {
            return None;
        }
        Some(sum / count as u64)
    }
}

fn window_bitrate(window: &VecDeque<ClockReference>) -> Option<u64> {
    let first = window.front()?;
    let last = window.back()?;
    // Summing consecutive deltas handles a wrap anywhere in the window.
    let ticks: u64 = window
        .iter()
        .zip(window.iter().skip(1))
        .map(|(a, b)| pcr_delta(a.pcr, b.pcr))
        .sum();
    if ticks == 0 {
        return None;
    }
    let packets = last.packet_index - first.packet_index;
    Some((packets as u128 * TS_PACKET_BITS as u128 * PCR_HZ as u128 / ticks as u128) as u64)
}
