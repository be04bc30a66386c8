use crate::error::Result;
use bitvec::prelude::*;
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::time::Duration;

// Packet geometry
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_HEADER_SIZE: usize = 4;
pub const TS_PACKET_BITS: u64 = TS_PACKET_SIZE as u64 * 8;
pub const SYNC_BYTE: u8 = 0x47;

// PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_CAT: u16 = 0x0001;
pub const PID_NULL: u16 = 0x1FFF;
pub const PID_MAX: usize = 0x2000;

// Table IDs
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_CAT: u8 = 0x01;
pub const TABLE_ID_PMT: u8 = 0x02;

// Section sizes, header and CRC included
pub const MAX_PSI_SECTION_SIZE: usize = 1024;
pub const MAX_PRIVATE_SECTION_SIZE: usize = 4096;
pub const LONG_SECTION_HEADER_SIZE: usize = 8;
pub const SHORT_SECTION_HEADER_SIZE: usize = 3;
pub const SECTION_CRC_SIZE: usize = 4;

// Elementary stream types
pub const STREAM_TYPE_MPEG1_VIDEO: u8 = 0x01;
pub const STREAM_TYPE_MPEG2_VIDEO: u8 = 0x02;
pub const STREAM_TYPE_MPEG4_VIDEO: u8 = 0x10;
pub const STREAM_TYPE_AAC: u8 = 0x0f;
pub const STREAM_TYPE_H264: u8 = 0x1b;
pub const STREAM_TYPE_H265: u8 = 0x24;

// Clocks
pub const PTS_HZ: u64 = 90_000;
pub const PCR_HZ: u64 = 27_000_000;
/// PCR values wrap at 2^33 * 300 ticks of the 27 MHz clock.
pub const PCR_SCALE: u64 = (1 << 33) * 300;

/// Highest packet label value.
pub const LABEL_MAX: u8 = 31;

/// A set of PIDs, one bit per possible PID value.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PidSet(BitArray<[u64; PID_MAX / 64], Lsb0>);

impl PidSet {
    /// An empty set.
    pub fn new() -> Self {
        PidSet(BitArray::new([0; PID_MAX / 64]))
    }

    /// A set containing every PID.
    pub fn all() -> Self {
        PidSet(BitArray::new([u64::MAX; PID_MAX / 64]))
    }

    pub fn insert(&mut self, pid: u16) {
        if (pid as usize) < PID_MAX {
            self.0.set(pid as usize, true);
        }
    }

    pub fn remove(&mut self, pid: u16) {
        if (pid as usize) < PID_MAX {
            self.0.set(pid as usize, false);
        }
    }

    pub fn contains(&self, pid: u16) -> bool {
        (pid as usize) < PID_MAX && self.0[pid as usize]
    }

    pub fn clear(&mut self) {
        self.0.fill(false);
    }

    pub fn len(&self) -> usize {
        self.0.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.0.not_any()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter_ones().map(|pid| pid as u16)
    }
}

impl Default for PidSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<u16> for PidSet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        let mut set = PidSet::new();
        for pid in iter {
            set.insert(pid);
        }
        set
    }
}

impl fmt::Debug for PidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// A small set of packet labels (0 to [`LABEL_MAX`]).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LabelSet(BitArray<[u32; 1], Lsb0>);

impl LabelSet {
    pub fn new() -> Self {
        LabelSet(BitArray::new([0]))
    }

    pub fn insert(&mut self, label: u8) {
        if label <= LABEL_MAX {
            self.0.set(label as usize, true);
        }
    }

    pub fn remove(&mut self, label: u8) {
        if label <= LABEL_MAX {
            self.0.set(label as usize, false);
        }
    }

    pub fn contains(&self, label: u8) -> bool {
        label <= LABEL_MAX && self.0[label as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.0.not_any()
    }

    /// True when at least one label is present in both sets.
    pub fn intersects(&self, other: &LabelSet) -> bool {
        self.0.iter_ones().any(|label| other.0[label])
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter_ones().map(|label| label as u8)
    }
}

impl Default for LabelSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<u8> for LabelSet {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        let mut set = LabelSet::new();
        for label in iter {
            set.insert(label);
        }
        set
    }
}

impl fmt::Debug for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdaptationField {
    pub length: usize,
    pub discontinuity: bool,
    pub random_access: bool,
    pub es_priority: bool,
    pub pcr: Option<u64>,
    pub opcr: Option<u64>,
    pub splice_countdown: Option<i8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TSHeader {
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub transport_priority: bool,
    pub pid: u16,
    pub scrambling_control: u8,
    pub adaptation_field_exists: bool,
    pub contains_payload: bool,
    pub continuity_counter: u8,
}

impl Default for TSHeader {
    fn default() -> Self {
        Self {
            transport_error: false,
            payload_unit_start: false,
            transport_priority: false,
            pid: 0,
            scrambling_control: 0,
            adaptation_field_exists: false,
            contains_payload: true,
            continuity_counter: 0,
        }
    }
}

impl TSHeader {
    pub fn new(pid: u16) -> Self {
        Self {
            pid,
            ..Self::default()
        }
    }

    pub fn with_pusi(mut self, pusi: bool) -> Self {
        self.payload_unit_start = pusi;
        self
    }

    pub fn with_cc(mut self, cc: u8) -> Self {
        self.continuity_counter = cc & 0x0f;
        self
    }

    /// The four header bytes, sync byte included.
    pub fn to_bytes(&self) -> [u8; TS_HEADER_SIZE] {
        let mut b1 = ((self.pid >> 8) & 0x1f) as u8;
        if self.transport_error {
            b1 |= 0x80;
        }
        if self.payload_unit_start {
            b1 |= 0x40;
        }
        if self.transport_priority {
            b1 |= 0x20;
        }

        let mut b3 = (self.scrambling_control & 0x03) << 6;
        if self.adaptation_field_exists {
            b3 |= 0x20;
        }
        if self.contains_payload {
            b3 |= 0x10;
        }
        b3 |= self.continuity_counter & 0x0f;

        [SYNC_BYTE, b1, (self.pid & 0xff) as u8, b3]
    }

    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_slice(&self.to_bytes());
        Ok(())
    }
}

/// Distance in 27 MHz ticks from `earlier` to `later`, accounting for one wrap.
pub fn pcr_delta(earlier: u64, later: u64) -> u64 {
    if later >= earlier {
        later - earlier
    } else {
        later + PCR_SCALE - earlier
    }
}

pub fn pcr_to_duration(ticks: u64) -> Duration {
    Duration::from_nanos((ticks as u128 * 1_000_000_000 / PCR_HZ as u128) as u64)
}

pub fn duration_to_pcr(duration: Duration) -> u64 {
    (duration.as_nanos() * PCR_HZ as u128 / 1_000_000_000) as u64
}

pub fn pts_to_duration(pts: u64) -> Duration {
    Duration::from_nanos((pts as u128 * 1_000_000_000 / PTS_HZ as u128) as u64)
}

/// Time needed to transmit `packets` at `bitrate` bits/s. Zero when the bitrate is unknown.
pub fn packet_interval(bitrate: u64, packets: u64) -> Duration {
    if bitrate == 0 {
        return Duration::ZERO;
    }
    let micros = packets as u128 * TS_PACKET_BITS as u128 * 1_000_000 / bitrate as u128;
    Duration::from_micros(micros as u64)
}

/// Bitrate in bits/s of `packets` sent over `duration`. Zero for an empty duration.
pub fn packet_bitrate(packets: u64, duration: Duration) -> u64 {
    let micros = duration.as_micros();
    if micros == 0 {
        return 0;
    }
    (packets as u128 * TS_PACKET_BITS as u128 * 1_000_000 / micros) as u64
}
