use super::demuxer::{BinaryTable, Section};
use super::packet::TsPacket;
use super::types::{TSHeader, TS_HEADER_SIZE, TS_PACKET_SIZE};

const PAYLOAD_SIZE: usize = TS_PACKET_SIZE - TS_HEADER_SIZE;

/// Turns sections into transport packets on one PID.
///
/// Sections are packed back to back; a packet in which a section starts
/// carries a PUSI and a pointer field, and the tail of the last packet is
/// filled with 0xFF stuffing. The continuity counter carries over from one
/// call to the next.
#[derive(Debug, Clone)]
pub struct Packetizer {
    pid: u16,
    next_cc: u8,
}

impl Packetizer {
    pub fn new(pid: u16) -> Self {
        Self { pid, next_cc: 0 }
    }

    pub fn pid(&self) -> u16 {
        self.pid
    }

    /// Continuity counter of the next packet produced.
    pub fn next_cc(&self) -> u8 {
        self.next_cc
    }

    pub fn set_next_cc(&mut self, cc: u8) {
        self.next_cc = cc & 0x0F;
    }

    pub fn packetize_table(&mut self, table: &BinaryTable) -> Vec<TsPacket> {
        self.packetize(table.sections())
    }

    pub fn packetize(&mut self, sections: &[Section]) -> Vec<TsPacket> {
        let mut data = Vec::new();
        let mut starts = Vec::with_capacity(sections.len());
        for section in sections {
            starts.push(data.len());
            data.extend_from_slice(section.as_bytes());
        }

        let mut packets = Vec::new();
        let mut pos = 0;
        let mut next_start = starts.iter().copied().peekable();
        while pos < data.len() {
            while next_start.next_if(|&start| start < pos).is_some() {}

            let pointer = next_start
                .peek()
                .map(|&start| start - pos)
                .filter(|&offset| offset < PAYLOAD_SIZE - 1);
            let mut payload = Vec::with_capacity(PAYLOAD_SIZE);
            let room = match (pointer, next_start.peek()) {
                (Some(offset), _) => {
                    payload.push(offset as u8);
                    PAYLOAD_SIZE - 1
                }
                // The next section starts on the last byte: stop short so it
                // can open the following packet.
                (None, Some(&start)) => (start - pos).min(PAYLOAD_SIZE),
                (None, None) => PAYLOAD_SIZE,
            };
            let take = room.min(data.len() - pos);
            payload.extend_from_slice(&data[pos..pos + take]);
            pos += take;

            let mut header = TSHeader::new(self.pid)
                .with_pusi(pointer.is_some())
                .with_cc(self.next_cc);
            self.next_cc = (self.next_cc + 1) & 0x0F;

            // Remaining bytes stay 0xFF stuffing.
            let mut bytes = [0xFF; TS_PACKET_SIZE];
            let mut offset = TS_HEADER_SIZE;
            if room < PAYLOAD_SIZE && pointer.is_none() {
                header.adaptation_field_exists = true;
                bytes[offset] = 0;
                offset += 1;
            }
            bytes[..TS_HEADER_SIZE].copy_from_slice(&header.to_bytes());
            bytes[offset..offset + payload.len()].copy_from_slice(&payload);
            packets.push(TsPacket::new(bytes));
        }
        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::types::PID_PAT;

    #[test]
    fn test_small_section_fits_one_packet() {
        let section = Section::new_long(0, 1, 0, true, 0, 0, &[0, 1, 0xE1, 0]).unwrap();
        let mut packetizer = Packetizer::new(PID_PAT);
        let packets = packetizer.packetize(&[section.clone()]);

        assert_eq!(packets.len(), 1);
        let packet = &packets[0];
        assert!(packet.pusi());
        assert_eq!(packet.pid(), PID_PAT);
        assert_eq!(packet.payload()[0], 0);
        assert_eq!(&packet.payload()[1..1 + section.len()], section.as_bytes());
        assert!(packet.payload()[1 + section.len()..].iter().all(|&b| b == 0xFF));
        assert_eq!(packetizer.next_cc(), 1);
    }

    #[test]
    fn test_pointer_field_for_packed_sections() {
        let first = Section::new_long(0x42, 1, 0, true, 0, 1, &[0xAA; 250]).unwrap();
        let second = Section::new_long(0x42, 1, 0, true, 1, 1, &[0xBB; 10]).unwrap();
        let packets = Packetizer::new(0x30).packetize(&[first, second]);

        assert_eq!(packets.len(), 2);
        assert!(packets[1].pusi());
        // 262 bytes of the first section, 183 of them in packet 0
        assert_eq!(packets[1].payload()[0], 79);
        assert_eq!(packets[1].cc(), 1);
    }

    #[test]
    fn test_section_starting_on_last_byte() {
        // 183 bytes in packet 0, then exactly 183 more: the second section
        // would begin on the last byte of packet 1.
        let first = Section::new_long(0x42, 1, 0, true, 0, 1, &[0xAA; 354]).unwrap();
        let second = Section::new_long(0x42, 1, 0, true, 1, 1, &[0xBB; 4]).unwrap();
        assert_eq!(first.len(), 366);
        let packets = Packetizer::new(0x30).packetize(&[first, second]);

        assert_eq!(packets.len(), 3);
        assert!(!packets[1].pusi());
        assert!(packets[1].has_adaptation_field());
        assert_eq!(packets[1].payload().len(), 183);
        assert!(packets[2].pusi());
        assert_eq!(packets[2].payload()[0], 0);
    }

    #[test]
    fn test_counter_wraps_across_calls() {
        let section = Section::new_short(0x70, &[0; 5]).unwrap();
        let mut packetizer = Packetizer::new(0x14);
        packetizer.set_next_cc(15);
        let first = packetizer.packetize(&[section.clone()]);
        let second = packetizer.packetize(&[section]);
        assert_eq!(first[0].cc(), 15);
        assert_eq!(second[0].cc(), 0);
    }
}
