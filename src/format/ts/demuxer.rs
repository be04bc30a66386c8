use super::packet::TsPacket;
use super::types::*;
use crate::error::{Result, TsError};
use crate::utils::crc::Crc32Mpeg2;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

/// One complete PSI/SI section, header and CRC included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    data: Bytes,
}

impl Section {
    /// Wraps raw section bytes after checking the declared length.
    ///
    /// Long sections must also carry a valid CRC32.
    pub fn from_bytes(data: Bytes) -> Result<Self> {
        if data.len() < SHORT_SECTION_HEADER_SIZE {
            return Err(TsError::InvalidData("section shorter than its header".into()));
        }
        let declared = SHORT_SECTION_HEADER_SIZE + section_length(&data);
        if declared != data.len() {
            return Err(TsError::InvalidData(format!(
                "section declares {} bytes but holds {}",
                declared,
                data.len()
            )));
        }
        let section = Section { data };
        if section.is_long() {
            if section.data.len() < LONG_SECTION_HEADER_SIZE + SECTION_CRC_SIZE {
                return Err(TsError::InvalidData("long section too short".into()));
            }
            if !Crc32Mpeg2::verify_section(&section.data) {
                return Err(TsError::InvalidData("section CRC mismatch".into()));
            }
        }
        Ok(section)
    }

    /// Builds a long section and appends its CRC32.
    pub fn new_long(
        table_id: u8,
        table_id_extension: u16,
        version: u8,
        current: bool,
        section_number: u8,
        last_section_number: u8,
        payload: &[u8],
    ) -> Result<Self> {
        let total = LONG_SECTION_HEADER_SIZE + payload.len() + SECTION_CRC_SIZE;
        if total > MAX_PRIVATE_SECTION_SIZE {
            return Err(TsError::InvalidData(format!(
                "section payload of {} bytes is too large",
                payload.len()
            )));
        }
        let length = (total - SHORT_SECTION_HEADER_SIZE) as u16;

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u8(table_id);
        // section_syntax_indicator, private bit, reserved
        buf.put_u16(0xB000 | length);
        buf.put_u16(table_id_extension);
        buf.put_u8(0xC0 | ((version & 0x1F) << 1) | current as u8);
        buf.put_u8(section_number);
        buf.put_u8(last_section_number);
        buf.put_slice(payload);
        let crc = Crc32Mpeg2::calculate(&buf);
        buf.put_u32(crc);

        Ok(Section { data: buf.freeze() })
    }

    /// Builds a short section (no extension header, no CRC).
    pub fn new_short(table_id: u8, payload: &[u8]) -> Result<Self> {
        let total = SHORT_SECTION_HEADER_SIZE + payload.len();
        if total > MAX_PRIVATE_SECTION_SIZE {
            return Err(TsError::InvalidData(format!(
                "section payload of {} bytes is too large",
                payload.len()
            )));
        }
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u8(table_id);
        buf.put_u16(0x7000 | payload.len() as u16);
        buf.put_slice(payload);
        Ok(Section { data: buf.freeze() })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn table_id(&self) -> u8 {
        self.data[0]
    }

    /// True when the section_syntax_indicator is set.
    pub fn is_long(&self) -> bool {
        self.data[1] & 0x80 != 0
    }

    pub fn table_id_extension(&self) -> u16 {
        if self.is_long() {
            u16::from_be_bytes([self.data[3], self.data[4]])
        } else {
            0
        }
    }

    pub fn version(&self) -> u8 {
        if self.is_long() {
            (self.data[5] >> 1) & 0x1F
        } else {
            0
        }
    }

    pub fn is_current(&self) -> bool {
        !self.is_long() || self.data[5] & 0x01 != 0
    }

    pub fn section_number(&self) -> u8 {
        if self.is_long() {
            self.data[6]
        } else {
            0
        }
    }

    pub fn last_section_number(&self) -> u8 {
        if self.is_long() {
            self.data[7]
        } else {
            0
        }
    }

    /// Table body: after the header, before the CRC for long sections.
    pub fn payload(&self) -> &[u8] {
        if self.is_long() {
            &self.data[LONG_SECTION_HEADER_SIZE..self.data.len() - SECTION_CRC_SIZE]
        } else {
            &self.data[SHORT_SECTION_HEADER_SIZE..]
        }
    }
}

fn section_length(header: &[u8]) -> usize {
    (((header[1] & 0x0F) as usize) << 8) | header[2] as usize
}

/// A complete table: every section of one version, in section order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryTable {
    pid: u16,
    sections: Vec<Section>,
}

impl BinaryTable {
    /// Groups `sections` into a table. They must share the table id and
    /// extension and be numbered `0..=last_section_number`.
    pub fn new(pid: u16, sections: Vec<Section>) -> Result<Self> {
        let first = sections
            .first()
            .ok_or_else(|| TsError::InvalidData("table without sections".into()))?;
        let consistent = sections.iter().enumerate().all(|(index, section)| {
            section.table_id() == first.table_id()
                && section.table_id_extension() == first.table_id_extension()
                && section.section_number() as usize == index
                && section.last_section_number() as usize == sections.len() - 1
        });
        if !consistent {
            return Err(TsError::InvalidData("inconsistent table sections".into()));
        }
        Ok(Self { pid, sections })
    }

    pub fn pid(&self) -> u16 {
        self.pid
    }

    pub fn table_id(&self) -> u8 {
        self.sections[0].table_id()
    }

    pub fn table_id_extension(&self) -> u16 {
        self.sections[0].table_id_extension()
    }

    pub fn version(&self) -> u8 {
        self.sections[0].version()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }
}

/// Receives every table the demux completes.
pub trait TableHandler {
    fn handle_table(&mut self, table: &BinaryTable);
}

impl<F> TableHandler for F
where
    F: FnMut(&BinaryTable),
{
    fn handle_table(&mut self, table: &BinaryTable) {
        self(table)
    }
}

/// Counters kept by [`SectionDemux`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub sections: u64,
    pub tables: u64,
    pub crc_errors: u64,
    /// Incomplete, oversized or malformed sections thrown away.
    pub discarded: u64,
}

#[derive(Debug, Default)]
struct TableContext {
    version: u8,
    sections: Vec<Option<Section>>,
    delivered: bool,
}

impl TableContext {
    fn complete(&self) -> Option<Vec<Section>> {
        self.sections.iter().cloned().collect()
    }
}

#[derive(Debug, Default)]
struct PidContext {
    continuity: Option<u8>,
    /// Set after a PUSI; cleared on discontinuity or stuffing.
    synchronized: bool,
    buffer: BytesMut,
    tables: HashMap<(u8, u16), TableContext>,
    short_sections: HashMap<u8, Section>,
}

impl PidContext {
    fn lose_sync(&mut self, stats: &mut DemuxStats) {
        if !self.buffer.is_empty() {
            stats.discarded += 1;
        }
        self.buffer.clear();
        self.synchronized = false;
    }

    /// Extracts every complete section from the buffer.
    fn drain_sections<H>(&mut self, pid: u16, stats: &mut DemuxStats, handler: &mut H)
    where
        H: TableHandler + ?Sized,
    {
        loop {
            if self.buffer.is_empty() {
                return;
            }
            if self.buffer[0] == 0xFF {
                // Stuffing: the rest of the payload carries no section.
                self.buffer.clear();
                self.synchronized = false;
                return;
            }
            if self.buffer.len() < SHORT_SECTION_HEADER_SIZE {
                return;
            }
            let total = SHORT_SECTION_HEADER_SIZE + section_length(&self.buffer);
            if total > MAX_PRIVATE_SECTION_SIZE {
                log::warn!("PID 0x{:04X}: oversized section ({} bytes)", pid, total);
                self.lose_sync(stats);
                return;
            }
            if self.buffer.len() < total {
                return;
            }
            let data = self.buffer.split_to(total).freeze();
            self.process_section(pid, data, stats, handler);
        }
    }

    fn process_section<H>(&mut self, pid: u16, data: Bytes, stats: &mut DemuxStats, handler: &mut H)
    where
        H: TableHandler + ?Sized,
    {
        if data[1] & 0x80 != 0 && !Crc32Mpeg2::verify_section(&data) {
            stats.crc_errors += 1;
            log::warn!("PID 0x{:04X}: section CRC error, table id 0x{:02X}", pid, data[0]);
            return;
        }
        let section = match Section::from_bytes(data) {
            Ok(section) => section,
            Err(e) => {
                stats.discarded += 1;
                log::warn!("PID 0x{:04X}: dropping section: {}", pid, e);
                return;
            }
        };
        stats.sections += 1;

        if !section.is_long() {
            if self.short_sections.get(&section.table_id()) == Some(&section) {
                return;
            }
            self.short_sections.insert(section.table_id(), section.clone());
            if let Ok(table) = BinaryTable::new(pid, vec![section]) {
                stats.tables += 1;
                handler.handle_table(&table);
            }
            return;
        }

        if !section.is_current() {
            return;
        }

        let key = (section.table_id(), section.table_id_extension());
        let slots = section.last_section_number() as usize + 1;
        let context = self.tables.entry(key).or_default();
        if context.sections.is_empty()
            || context.version != section.version()
            || context.sections.len() != slots
        {
            *context = TableContext {
                version: section.version(),
                sections: vec![None; slots],
                delivered: false,
            };
        }
        if context.delivered {
            return;
        }

        let number = section.section_number() as usize;
        if number >= slots {
            stats.discarded += 1;
            return;
        }
        if context.sections[number].is_none() {
            context.sections[number] = Some(section);
        }

        if let Some(sections) = context.complete() {
            context.delivered = true;
            match BinaryTable::new(pid, sections) {
                Ok(table) => {
                    stats.tables += 1;
                    handler.handle_table(&table);
                }
                Err(e) => log::warn!("PID 0x{:04X}: {}", pid, e),
            }
        }
    }
}

/// Reassembles sections from transport packets and delivers complete tables.
///
/// Each watched PID runs its own small state machine: packets are ignored
/// until a payload unit start, bytes are then accumulated until a declared
/// section length is reached, and a continuity break throws away whatever
/// was being collected. Every distinct table version is delivered once.
#[derive(Debug, Default)]
pub struct SectionDemux {
    pids: PidSet,
    contexts: HashMap<u16, PidContext>,
    stats: DemuxStats,
}

impl SectionDemux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pids(pids: PidSet) -> Self {
        Self {
            pids,
            ..Self::default()
        }
    }

    pub fn add_pid(&mut self, pid: u16) {
        self.pids.insert(pid);
    }

    pub fn remove_pid(&mut self, pid: u16) {
        self.pids.remove(pid);
        self.contexts.remove(&pid);
    }

    pub fn has_pid(&self, pid: u16) -> bool {
        self.pids.contains(pid)
    }

    /// Forgets all collected sections and delivered versions. Watched PIDs are kept.
    pub fn reset(&mut self) {
        self.contexts.clear();
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    pub fn feed_packet<H>(&mut self, packet: &TsPacket, handler: &mut H)
    where
        H: TableHandler + ?Sized,
    {
        let pid = packet.pid();
        if !self.pids.contains(pid)
            || packet.transport_error()
            || !packet.is_clear()
            || !packet.has_payload()
        {
            return;
        }

        let stats = &mut self.stats;
        let context = self.contexts.entry(pid).or_default();

        let cc = packet.cc();
        match context.continuity {
            Some(last) if last == cc => return,
            Some(last) if (last + 1) & 0x0F != cc => context.lose_sync(stats),
            _ => {}
        }
        context.continuity = Some(cc);

        let payload = packet.payload();
        if packet.pusi() {
            let Some((&pointer, rest)) = payload.split_first() else {
                return;
            };
            let pointer = pointer as usize;
            if pointer > rest.len() {
                context.lose_sync(stats);
                return;
            }
            if context.synchronized {
                context.buffer.extend_from_slice(&rest[..pointer]);
                context.drain_sections(pid, stats, handler);
            }
            // A section never continues across a payload unit start.
            context.lose_sync(stats);
            context.synchronized = true;
            context.buffer.extend_from_slice(&rest[pointer..]);
            context.drain_sections(pid, stats, handler);
        } else if context.synchronized {
            context.buffer.extend_from_slice(payload);
            context.drain_sections(pid, stats, handler);
        }
    }
}
