use super::packet::{PacketMetadata, TsPacket};
use super::types::{packet_bitrate, packet_interval, LabelSet};
use crate::codec::find_intra_image;
use crate::error::{Result, TsError};
use std::time::Duration;

/// Elementary stream on which cuts are aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceStream {
    pub pid: u16,
    pub stream_type: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryConfig {
    pub target_duration: Duration,
    /// Cut unconditionally once a unit holds this many packets.
    pub max_unit_packets: Option<u64>,
    pub close_labels: LabelSet,
    /// Only cut on a reference PUSI that starts an intra picture.
    pub intra_close: bool,
    /// How long past the target an intra boundary is waited for.
    pub max_extra_duration: Duration,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            target_duration: Duration::from_secs(10),
            max_unit_packets: None,
            close_labels: LabelSet::new(),
            intra_close: false,
            max_extra_duration: Duration::from_secs(2),
        }
    }
}

impl BoundaryConfig {
    pub fn validate(&self) -> Result<()> {
        match self.max_unit_packets {
            Some(0) => {
                return Err(TsError::Config("max_unit_packets must be positive".into()));
            }
            Some(_) if !self.close_labels.is_empty() => {
                return Err(TsError::Config(
                    "max_unit_packets and close_labels are mutually exclusive".into(),
                ));
            }
            _ => {}
        }
        if self.max_unit_packets.is_none() && self.target_duration.is_zero() {
            return Err(TsError::Config("target duration must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Open,
    ClosePending,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseTrigger {
    Label,
    Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutReason {
    FixedSize,
    /// Reference stream PUSI, no intra requirement or payload scrambled.
    Boundary,
    IntraBoundary,
    /// No intra picture within the allowed extra duration.
    ExtraDurationExceeded,
    /// No reference stream known: cut right away.
    NoReferenceStream,
}

/// What to do with the packet just presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Append to the current unit.
    Continue,
    /// Close the current unit; the packet opens the next one.
    Cut(CutReason),
}

/// Measured or estimated timing of a closed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitTiming {
    pub packets: u64,
    pub duration: Duration,
    pub bitrate: u64,
}

/// Decides, packet by packet, when the current output unit must end.
///
/// A close trigger (packet count, label, or duration) moves the unit from
/// `Open` to `ClosePending`; the cut itself waits for a payload unit start
/// on the reference stream. The caller appends packets with
/// [`add_packets`](Self::add_packets) and drives [`close_unit`](Self::close_unit)
/// and [`open_unit`](Self::open_unit) when a cut is returned.
#[derive(Debug, Clone)]
pub struct BoundaryPolicy {
    config: BoundaryConfig,
    state: UnitState,
    trigger: Option<CloseTrigger>,
    unit_packets: u64,
    previous_bitrate: Option<u64>,
}

impl BoundaryPolicy {
    pub fn new(config: BoundaryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: UnitState::Open,
            trigger: None,
            unit_packets: 0,
            previous_bitrate: None,
        })
    }

    pub fn config(&self) -> &BoundaryConfig {
        &self.config
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn trigger(&self) -> Option<CloseTrigger> {
        self.trigger
    }

    pub fn unit_packets(&self) -> u64 {
        self.unit_packets
    }

    pub fn add_packets(&mut self, count: u64) {
        self.unit_packets += count;
    }

    /// Duration of the current unit at `bitrate`; `None` while the bitrate
    /// of the unit is unknown.
    pub fn unit_duration(&self, bitrate: Option<u64>) -> Option<Duration> {
        bitrate
            .filter(|&rate| rate > 0)
            .map(|rate| packet_interval(rate, self.unit_packets))
    }

    /// Evaluates `packet` before it is appended to the current unit.
    pub fn decide(
        &mut self,
        packet: &TsPacket,
        metadata: &PacketMetadata,
        reference: Option<ReferenceStream>,
        bitrate: Option<u64>,
    ) -> Decision {
        if self.state == UnitState::Closed {
            return Decision::Continue;
        }

        if let Some(max) = self.config.max_unit_packets {
            return if self.unit_packets >= max {
                Decision::Cut(CutReason::FixedSize)
            } else {
                Decision::Continue
            };
        }

        let duration = self.unit_duration(bitrate);
        if self.state == UnitState::Open {
            if metadata.has_any_label(&self.config.close_labels) {
                self.set_pending(CloseTrigger::Label);
            } else if matches!(duration, Some(d) if d >= self.config.target_duration) {
                self.set_pending(CloseTrigger::Duration);
            }
        }
        if self.state != UnitState::ClosePending {
            return Decision::Continue;
        }

        let Some(reference) = reference else {
            return Decision::Cut(CutReason::NoReferenceStream);
        };
        if packet.pid() != reference.pid || !packet.pusi() {
            return Decision::Continue;
        }
        if !self.config.intra_close || !packet.is_clear() {
            return Decision::Cut(CutReason::Boundary);
        }
        if find_intra_image(packet.payload(), reference.stream_type).is_some() {
            return Decision::Cut(CutReason::IntraBoundary);
        }
        let limit = self.config.target_duration + self.config.max_extra_duration;
        if matches!(duration, Some(d) if d >= limit) {
            return Decision::Cut(CutReason::ExtraDurationExceeded);
        }
        Decision::Continue
    }

    fn set_pending(&mut self, trigger: CloseTrigger) {
        log::debug!(
            "unit close pending ({:?}) after {} packets",
            trigger,
            self.unit_packets
        );
        self.state = UnitState::ClosePending;
        self.trigger = Some(trigger);
    }

    /// Ends the current unit and computes its timing.
    ///
    /// Without a measured bitrate the previous unit's bitrate is used, and
    /// failing that the target duration is assumed.
    pub fn close_unit(&mut self, bitrate: Option<u64>) -> UnitTiming {
        let packets = self.unit_packets;
        let measured = bitrate.filter(|&rate| rate > 0);
        let timing = match measured.or(self.previous_bitrate) {
            Some(rate) => UnitTiming {
                packets,
                duration: packet_interval(rate, packets),
                bitrate: rate,
            },
            None => UnitTiming {
                packets,
                duration: self.config.target_duration,
                bitrate: packet_bitrate(packets, self.config.target_duration),
            },
        };
        if measured.is_some() {
            self.previous_bitrate = measured;
        }
        self.state = UnitState::Closed;
        self.trigger = None;
        timing
    }

    pub fn open_unit(&mut self) {
        self.state = UnitState::Open;
        self.trigger = None;
        self.unit_packets = 0;
    }
}
