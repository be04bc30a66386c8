use super::packet::TsPacket;
use super::types::{PidSet, PID_NULL};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the regulator treats packets on regulated PIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CcMode {
    /// Rewrite the counter so that every regulated PID has a gapless sequence.
    Generate,
    /// Leave packets untouched and report counters that break the sequence.
    Validate,
}

/// Outcome of feeding one packet to the regulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcStatus {
    /// Counter is the expected one (or the first seen on this PID).
    Ok,
    /// PID is neither regulated nor reported.
    Untracked,
    /// Repeat of the previous packet on this PID, allowed once.
    Duplicate,
    /// Generation mode rewrote the counter.
    Corrected { from: u8, to: u8 },
    /// Counter does not follow the previous one. Never corrected.
    Discontinuity { expected: u8, found: u8 },
}

impl CcStatus {
    pub fn is_discontinuity(&self) -> bool {
        matches!(self, CcStatus::Discontinuity { .. })
    }
}

#[derive(Debug, Clone)]
struct PidState {
    /// Previous input packet; `None` after an inserted packet.
    last_input: Option<TsPacket>,
    last_output_cc: u8,
    duplicates: u8,
}

/// Per-PID continuity counter bookkeeping.
///
/// State is owned by a single stage; nothing here is shared across tasks.
#[derive(Debug, Clone)]
pub struct ContinuityRegulator {
    mode: CcMode,
    pids: PidSet,
    report_unwatched: bool,
    states: HashMap<u16, PidState>,
    discontinuities: u64,
}

impl ContinuityRegulator {
    pub fn new(mode: CcMode) -> Self {
        Self {
            mode,
            pids: PidSet::new(),
            report_unwatched: false,
            states: HashMap::new(),
            discontinuities: 0,
        }
    }

    pub fn with_pids(mut self, pids: PidSet) -> Self {
        self.pids = pids;
        self
    }

    /// Also track PIDs outside the regulated set and report their discontinuities.
    pub fn report_unwatched(mut self, report: bool) -> Self {
        self.report_unwatched = report;
        self
    }

    pub fn mode(&self) -> CcMode {
        self.mode
    }

    pub fn pids(&self) -> &PidSet {
        &self.pids
    }

    pub fn add_pid(&mut self, pid: u16) {
        self.pids.insert(pid);
    }

    pub fn remove_pid(&mut self, pid: u16) {
        self.pids.remove(pid);
        self.states.remove(&pid);
    }

    /// Number of discontinuities reported since creation or the last reset.
    pub fn discontinuity_count(&self) -> u64 {
        self.discontinuities
    }

    pub fn reset(&mut self) {
        self.states.clear();
        self.discontinuities = 0;
    }

    /// Processes one packet, rewriting its counter in generation mode.
    pub fn feed(&mut self, packet: &mut TsPacket) -> CcStatus {
        self.regulate(packet, false)
    }

    /// Processes a packet synthesized into the stream, such as a repeated
    /// table at the head of a segment.
    ///
    /// An inserted packet is never a duplicate, and the next input packet on
    /// the PID is never taken as a duplicate of it.
    pub fn feed_inserted(&mut self, packet: &mut TsPacket) -> CcStatus {
        self.regulate(packet, true)
    }

    fn regulate(&mut self, packet: &mut TsPacket, inserted: bool) -> CcStatus {
        let pid = packet.pid();
        if pid == PID_NULL {
            return CcStatus::Untracked;
        }
        let regulated = self.pids.contains(pid);
        if !regulated && !self.report_unwatched {
            return CcStatus::Untracked;
        }
        let generate = regulated && self.mode == CcMode::Generate;
        let input = *packet;

        let state = match self.states.get_mut(&pid) {
            Some(state) => state,
            None => {
                self.states.insert(
                    pid,
                    PidState {
                        last_input: (!inserted).then_some(input),
                        last_output_cc: input.cc(),
                        duplicates: 0,
                    },
                );
                return CcStatus::Ok;
            }
        };

        let found = input.cc();
        let previous_output = state.last_output_cc;
        let duplicate = !inserted
            && input.has_payload()
            && state.last_input == Some(input)
            && state.duplicates == 0;

        let status = if duplicate {
            state.duplicates += 1;
            if generate {
                packet.set_cc(previous_output);
            }
            CcStatus::Duplicate
        } else {
            state.duplicates = 0;
            let expected = if input.has_payload() {
                (previous_output + 1) & 0x0F
            } else {
                previous_output
            };
            if generate {
                packet.set_cc(expected);
                if found == expected {
                    CcStatus::Ok
                } else {
                    CcStatus::Corrected { from: found, to: expected }
                }
            } else if found == expected || input.discontinuity_indicator() {
                CcStatus::Ok
            } else {
                CcStatus::Discontinuity { expected, found }
            }
        };

        state.last_input = (!inserted).then_some(input);
        state.last_output_cc = packet.cc();
        if status.is_discontinuity() {
            self.discontinuities += 1;
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::types::TSHeader;
    use quickcheck_macros::quickcheck;

    fn packet(pid: u16, cc: u8, payload: &[u8]) -> TsPacket {
        TsPacket::build(&TSHeader::new(pid).with_cc(cc), None, payload).unwrap()
    }

    #[test]
    fn test_generate_fills_gaps() {
        let mut regulator =
            ContinuityRegulator::new(CcMode::Generate).with_pids([0x100].into_iter().collect());

        let mut first = packet(0x100, 5, &[1]);
        assert_eq!(regulator.feed(&mut first), CcStatus::Ok);

        let mut jumped = packet(0x100, 9, &[2]);
        assert_eq!(
            regulator.feed(&mut jumped),
            CcStatus::Corrected { from: 9, to: 6 }
        );
        assert_eq!(jumped.cc(), 6);

        let mut next = packet(0x100, 10, &[3]);
        regulator.feed(&mut next);
        assert_eq!(next.cc(), 7);
    }

    #[test]
    fn test_no_payload_keeps_counter() {
        let mut regulator =
            ContinuityRegulator::new(CcMode::Validate).with_pids([0x100].into_iter().collect());
        regulator.feed(&mut packet(0x100, 3, &[1]));
        assert_eq!(regulator.feed(&mut packet(0x100, 3, &[])), CcStatus::Ok);
        assert_eq!(regulator.feed(&mut packet(0x100, 4, &[2])), CcStatus::Ok);
    }

    #[test]
    fn test_validate_reports_without_rewriting() {
        let mut regulator =
            ContinuityRegulator::new(CcMode::Validate).with_pids([0x100].into_iter().collect());
        regulator.feed(&mut packet(0x100, 0, &[1]));

        let mut bad = packet(0x100, 7, &[2]);
        assert_eq!(
            regulator.feed(&mut bad),
            CcStatus::Discontinuity { expected: 1, found: 7 }
        );
        assert_eq!(bad.cc(), 7);
        assert_eq!(regulator.discontinuity_count(), 1);
    }

    #[test]
    fn test_duplicate_allowed_once() {
        let mut regulator =
            ContinuityRegulator::new(CcMode::Validate).with_pids([0x100].into_iter().collect());
        let original = packet(0x100, 2, &[9, 9]);
        regulator.feed(&mut original.clone());
        assert_eq!(regulator.feed(&mut original.clone()), CcStatus::Duplicate);
        assert!(regulator.feed(&mut original.clone()).is_discontinuity());
    }

    #[test]
    fn test_inserted_packets_never_match_as_duplicates() {
        let mut regulator =
            ContinuityRegulator::new(CcMode::Generate).with_pids([0x00].into_iter().collect());
        let table = packet(0x00, 0, &[0xAB; 8]);

        let mut source = table;
        regulator.feed(&mut source);
        let mut head = table;
        assert_eq!(
            regulator.feed_inserted(&mut head),
            CcStatus::Corrected { from: 0, to: 1 }
        );
        // byte-identical to the inserted copy, still a new packet
        let mut source = table;
        assert_eq!(
            regulator.feed(&mut source),
            CcStatus::Corrected { from: 0, to: 2 }
        );
        let mut repeat = table;
        assert_eq!(regulator.feed(&mut repeat), CcStatus::Duplicate);
        assert_eq!(repeat.cc(), 2);
    }

    #[test]
    fn test_unwatched_pids_are_reported_not_corrected() {
        let mut regulator = ContinuityRegulator::new(CcMode::Generate)
            .with_pids([0x100].into_iter().collect())
            .report_unwatched(true);

        regulator.feed(&mut packet(0x200, 0, &[1]));
        let mut bad = packet(0x200, 4, &[2]);
        assert!(regulator.feed(&mut bad).is_discontinuity());
        assert_eq!(bad.cc(), 4);

        let mut quiet = ContinuityRegulator::new(CcMode::Generate);
        assert_eq!(quiet.feed(&mut packet(0x200, 0, &[1])), CcStatus::Untracked);
    }

    #[test]
    fn test_null_pid_ignored() {
        let mut regulator =
            ContinuityRegulator::new(CcMode::Generate).with_pids(PidSet::all());
        let mut null = TsPacket::null();
        assert_eq!(regulator.feed(&mut null), CcStatus::Untracked);
    }

    #[quickcheck]
    fn prop_generated_counters_have_no_gaps(input: Vec<(bool, u8, bool, u8)>) -> bool {
        let mut regulator = ContinuityRegulator::new(CcMode::Generate)
            .with_pids([0x100, 0x101].into_iter().collect());
        let mut last: HashMap<u16, u8> = HashMap::new();

        for (second_pid, cc, with_payload, byte) in input {
            let pid = if second_pid { 0x101 } else { 0x100 };
            let payload: &[u8] = if with_payload { &[byte] } else { &[] };
            let mut p = packet(pid, cc, payload);
            let status = regulator.feed(&mut p);

            if let Some(&previous) = last.get(&pid) {
                let expected = if status == CcStatus::Duplicate || !p.has_payload() {
                    previous
                } else {
                    (previous + 1) & 0x0F
                };
                if p.cc() != expected {
                    return false;
                }
            }
            last.insert(pid, p.cc());
        }
        true
    }
}
