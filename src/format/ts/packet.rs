use super::types::*;
use crate::error::{Result, TsError};
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::time::Duration;

/// One 188-byte transport packet, stored exactly as on the wire.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct TsPacket([u8; TS_PACKET_SIZE]);

const _: () = assert!(std::mem::size_of::<TsPacket>() == TS_PACKET_SIZE);

impl TsPacket {
    pub fn new(bytes: [u8; TS_PACKET_SIZE]) -> Self {
        TsPacket(bytes)
    }

    /// Copies a packet out of `data`, rejecting wrong sizes and lost sync.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let bytes: [u8; TS_PACKET_SIZE] = data.try_into().map_err(|_| {
            TsError::InvalidData(format!(
                "transport packet must be {} bytes, got {}",
                TS_PACKET_SIZE,
                data.len()
            ))
        })?;
        let packet = TsPacket(bytes);
        if !packet.has_valid_sync() {
            return Err(TsError::InvalidData(format!(
                "invalid sync byte 0x{:02X}",
                bytes[0]
            )));
        }
        Ok(packet)
    }

    /// A null packet (PID 0x1FFF) filled with stuffing.
    pub fn null() -> Self {
        let mut bytes = [0xFF; TS_PACKET_SIZE];
        bytes[..TS_HEADER_SIZE].copy_from_slice(&[SYNC_BYTE, 0x1F, 0xFF, 0x10]);
        TsPacket(bytes)
    }

    /// Builds a packet from a header, an optional PCR and a payload.
    ///
    /// The payload must fit in what the header and adaptation field leave;
    /// any remaining room is filled with adaptation field stuffing so the
    /// payload ends exactly at the packet boundary.
    pub fn build(header: &TSHeader, pcr: Option<u64>, payload: &[u8]) -> Result<Self> {
        let pcr_len = if pcr.is_some() { 6 } else { 0 };
        let room_without_af = TS_PACKET_SIZE - TS_HEADER_SIZE;
        let need_af = pcr.is_some() || payload.len() < room_without_af;

        // adaptation_field_length byte + flags byte + optional PCR
        let af_min = if need_af { 2 + pcr_len } else { 0 };
        if payload.len() + af_min > room_without_af && !(payload.len() == room_without_af - 1 && pcr.is_none()) {
            return Err(TsError::InvalidData(format!(
                "payload of {} bytes does not fit in a transport packet",
                payload.len()
            )));
        }

        let mut header = header.clone();
        header.adaptation_field_exists = need_af;
        header.contains_payload = !payload.is_empty();

        let mut buf = BytesMut::with_capacity(TS_PACKET_SIZE);
        header.write_to(&mut buf)?;

        if need_af {
            let af_total = room_without_af - payload.len();
            // af_total counts the length byte itself
            buf.put_u8((af_total - 1) as u8);
            if af_total > 1 {
                buf.put_u8(if pcr.is_some() { 0x10 } else { 0x00 });
                let mut used = 1;
                if let Some(pcr) = pcr {
                    let base = (pcr / 300) & 0x1_FFFF_FFFF;
                    let ext = pcr % 300;
                    buf.put_u32((base >> 1) as u32);
                    buf.put_u8((((base & 1) << 7) as u8) | 0x7E | ((ext >> 8) as u8 & 0x01));
                    buf.put_u8((ext & 0xFF) as u8);
                    used += 6;
                }
                buf.put_bytes(0xFF, af_total - 1 - used);
            }
        }
        buf.put_slice(payload);

        let mut bytes = [0u8; TS_PACKET_SIZE];
        bytes.copy_from_slice(&buf);
        Ok(TsPacket(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; TS_PACKET_SIZE] {
        &self.0
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; TS_PACKET_SIZE] {
        &mut self.0
    }

    pub fn has_valid_sync(&self) -> bool {
        self.0[0] == SYNC_BYTE
    }

    pub fn pid(&self) -> u16 {
        (((self.0[1] & 0x1F) as u16) << 8) | self.0[2] as u16
    }

    pub fn set_pid(&mut self, pid: u16) {
        self.0[1] = (self.0[1] & 0xE0) | ((pid >> 8) as u8 & 0x1F);
        self.0[2] = (pid & 0xFF) as u8;
    }

    pub fn transport_error(&self) -> bool {
        self.0[1] & 0x80 != 0
    }

    pub fn pusi(&self) -> bool {
        self.0[1] & 0x40 != 0
    }

    pub fn scrambling(&self) -> u8 {
        self.0[3] >> 6
    }

    /// True when the payload is not scrambled.
    pub fn is_clear(&self) -> bool {
        self.scrambling() == 0
    }

    pub fn has_adaptation_field(&self) -> bool {
        self.0[3] & 0x20 != 0
    }

    pub fn has_payload(&self) -> bool {
        self.0[3] & 0x10 != 0
    }

    pub fn cc(&self) -> u8 {
        self.0[3] & 0x0F
    }

    pub fn set_cc(&mut self, cc: u8) {
        self.0[3] = (self.0[3] & 0xF0) | (cc & 0x0F);
    }

    pub fn header(&self) -> TSHeader {
        TSHeader {
            transport_error: self.transport_error(),
            payload_unit_start: self.pusi(),
            transport_priority: self.0[1] & 0x20 != 0,
            pid: self.pid(),
            scrambling_control: self.scrambling(),
            adaptation_field_exists: self.has_adaptation_field(),
            contains_payload: self.has_payload(),
            continuity_counter: self.cc(),
        }
    }

    fn adaptation_field_length(&self) -> usize {
        if self.has_adaptation_field() {
            self.0[4] as usize
        } else {
            0
        }
    }

    fn payload_offset(&self) -> usize {
        if self.has_adaptation_field() {
            (TS_HEADER_SIZE + 1 + self.adaptation_field_length()).min(TS_PACKET_SIZE)
        } else {
            TS_HEADER_SIZE
        }
    }

    /// The payload bytes, empty when the packet carries none.
    pub fn payload(&self) -> &[u8] {
        if self.has_payload() {
            &self.0[self.payload_offset()..]
        } else {
            &[]
        }
    }

    pub fn discontinuity_indicator(&self) -> bool {
        self.adaptation_field_length() > 0 && self.0[5] & 0x80 != 0
    }

    pub fn random_access_indicator(&self) -> bool {
        self.adaptation_field_length() > 0 && self.0[5] & 0x40 != 0
    }

    /// The 27 MHz program clock reference, if this packet carries one.
    pub fn pcr(&self) -> Option<u64> {
        if self.adaptation_field_length() < 7 || self.0[5] & 0x10 == 0 {
            return None;
        }
        Some(read_clock_reference(&self.0[6..12]))
    }

    /// Full adaptation field decode. Returns `Ok(None)` when absent or empty.
    pub fn adaptation_field(&self) -> Result<Option<AdaptationField>> {
        let length = self.adaptation_field_length();
        if length == 0 {
            return Ok(None);
        }
        if TS_HEADER_SIZE + 1 + length > TS_PACKET_SIZE {
            return Err(TsError::InvalidData("adaptation field overflows packet".into()));
        }

        let end = TS_HEADER_SIZE + 1 + length;
        let flags = self.0[5];
        let mut field = AdaptationField {
            length,
            discontinuity: flags & 0x80 != 0,
            random_access: flags & 0x40 != 0,
            es_priority: flags & 0x20 != 0,
            ..AdaptationField::default()
        };

        let mut pos = 6;
        if flags & 0x10 != 0 {
            if pos + 6 > end {
                return Err(TsError::InvalidData("PCR data too short".into()));
            }
            field.pcr = Some(read_clock_reference(&self.0[pos..pos + 6]));
            pos += 6;
        }
        if flags & 0x08 != 0 {
            if pos + 6 > end {
                return Err(TsError::InvalidData("OPCR data too short".into()));
            }
            field.opcr = Some(read_clock_reference(&self.0[pos..pos + 6]));
            pos += 6;
        }
        if flags & 0x04 != 0 {
            if pos + 1 > end {
                return Err(TsError::InvalidData("splice countdown too short".into()));
            }
            field.splice_countdown = Some(self.0[pos] as i8);
        }
        Ok(Some(field))
    }
}

fn read_clock_reference(data: &[u8]) -> u64 {
    let base = ((data[0] as u64) << 25)
        | ((data[1] as u64) << 17)
        | ((data[2] as u64) << 9)
        | ((data[3] as u64) << 1)
        | ((data[4] as u64) >> 7);
    let ext = (((data[4] & 0x01) as u64) << 8) | data[5] as u64;
    base * 300 + ext
}

impl fmt::Debug for TsPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsPacket")
            .field("pid", &self.pid())
            .field("pusi", &self.pusi())
            .field("cc", &self.cc())
            .field("payload_len", &self.payload().len())
            .finish()
    }
}

/// Per-packet information that travels alongside a packet but never on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketMetadata {
    pub labels: LabelSet,
    /// Arrival time relative to the start of the pipeline, set by the source.
    pub input_timestamp: Option<Duration>,
}

impl PacketMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: u8) -> Self {
        self.labels.insert(label);
        self
    }

    pub fn with_input_timestamp(mut self, timestamp: Duration) -> Self {
        self.input_timestamp = Some(timestamp);
        self
    }

    pub fn has_any_label(&self, labels: &LabelSet) -> bool {
        self.labels.intersects(labels)
    }
}

/// A bounded batch of packets with their parallel metadata.
///
/// Batches are what stages exchange. Packets and metadata always stay
/// index-aligned, including after [`PacketBatch::retain`].
#[derive(Debug, Clone)]
pub struct PacketBatch {
    packets: Vec<TsPacket>,
    metadata: Vec<PacketMetadata>,
    capacity: usize,
}

impl PacketBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            packets: Vec::with_capacity(capacity),
            metadata: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.packets.len() >= self.capacity
    }

    /// Appends a packet. Fails once the batch holds `capacity` packets.
    pub fn push(&mut self, packet: TsPacket, metadata: PacketMetadata) -> Result<()> {
        if self.is_full() {
            return Err(TsError::InvalidData(format!(
                "packet batch full ({} packets)",
                self.capacity
            )));
        }
        self.packets.push(packet);
        self.metadata.push(metadata);
        Ok(())
    }

    pub fn packets(&self) -> &[TsPacket] {
        &self.packets
    }

    pub fn metadata(&self) -> &[PacketMetadata] {
        &self.metadata
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TsPacket, &PacketMetadata)> {
        self.packets.iter().zip(self.metadata.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&mut TsPacket, &mut PacketMetadata)> {
        self.packets.iter_mut().zip(self.metadata.iter_mut())
    }

    /// Keeps only the packets for which `keep` returns true.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&TsPacket, &PacketMetadata) -> bool,
    {
        let mask: Vec<bool> = self.iter().map(|(packet, metadata)| keep(packet, metadata)).collect();
        // Vec::retain visits elements once, in order
        let mut flags = mask.iter().copied();
        self.packets.retain(|_| flags.next().unwrap_or(false));
        let mut flags = mask.iter().copied();
        self.metadata.retain(|_| flags.next().unwrap_or(false));
    }

    pub fn clear(&mut self) {
        self.packets.clear();
        self.metadata.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_slice_checks_size_and_sync() {
        let null = TsPacket::null();
        assert!(TsPacket::from_slice(null.as_bytes()).is_ok());
        assert!(TsPacket::from_slice(&null.as_bytes()[..187]).is_err());

        let mut bad = *null.as_bytes();
        bad[0] = 0x48;
        assert!(TsPacket::from_slice(&bad).is_err());
    }

    #[test]
    fn test_header_fields() {
        let mut packet = TsPacket::build(
            &TSHeader::new(0x1001).with_pusi(true).with_cc(9),
            None,
            &[1, 2, 3],
        )
        .unwrap();
        assert_eq!(packet.pid(), 0x1001);
        assert!(packet.pusi());
        assert_eq!(packet.cc(), 9);
        assert!(packet.is_clear());
        assert_eq!(packet.payload(), &[1, 2, 3]);

        packet.set_cc(0x1F);
        assert_eq!(packet.cc(), 0x0F);
        packet.set_pid(0x0100);
        assert_eq!(packet.pid(), 0x0100);
        assert!(packet.pusi());
    }

    #[test]
    fn test_pcr_round_trip() {
        let pcr = 123_456_789_012u64;
        let packet = TsPacket::build(&TSHeader::new(0x100), Some(pcr), &[]).unwrap();
        assert_eq!(packet.pcr(), Some(pcr));
        assert!(!packet.has_payload());

        let field = packet.adaptation_field().unwrap().unwrap();
        assert_eq!(field.pcr, Some(pcr));
        assert!(!field.discontinuity);
    }

    #[test]
    fn test_full_payload_has_no_adaptation_field() {
        let payload = [0xAB; TS_PACKET_SIZE - TS_HEADER_SIZE];
        let packet = TsPacket::build(&TSHeader::new(0x42), None, &payload).unwrap();
        assert!(!packet.has_adaptation_field());
        assert_eq!(packet.payload().len(), 184);
        assert!(TsPacket::build(&TSHeader::new(0x42), Some(0), &payload).is_err());
    }

    #[test]
    fn test_batch_retain_keeps_metadata_aligned() {
        let mut batch = PacketBatch::with_capacity(4);
        for pid in [1u16, 2, 3] {
            let mut packet = TsPacket::null();
            packet.set_pid(pid);
            batch
                .push(packet, PacketMetadata::new().with_label(pid as u8))
                .unwrap();
        }
        batch.retain(|packet, _| packet.pid() != 2);

        let pids: Vec<u16> = batch.packets().iter().map(TsPacket::pid).collect();
        assert_eq!(pids, vec![1, 3]);
        assert!(batch.metadata()[1].labels.contains(3));
    }

    #[test]
    fn test_batch_retain_drops_every_other_packet() {
        let mut batch = PacketBatch::with_capacity(64);
        for pid in 0..64u16 {
            let mut packet = TsPacket::null();
            packet.set_pid(pid);
            batch
                .push(packet, PacketMetadata::new().with_label((pid % 32) as u8))
                .unwrap();
        }
        batch.retain(|packet, _| packet.pid() % 2 == 1);

        assert_eq!(batch.len(), 32);
        for (packet, metadata) in batch.iter() {
            assert_eq!(packet.pid() % 2, 1);
            assert!(metadata.labels.contains((packet.pid() % 32) as u8));
        }
    }

    #[test]
    fn test_batch_capacity() {
        let mut batch = PacketBatch::with_capacity(1);
        batch.push(TsPacket::null(), PacketMetadata::new()).unwrap();
        assert!(batch.is_full());
        assert!(batch.push(TsPacket::null(), PacketMetadata::new()).is_err());
    }
}
