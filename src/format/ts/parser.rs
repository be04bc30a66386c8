use super::demuxer::{BinaryTable, Section};
use super::types::*;
use crate::error::{Result, TsError};
use bytes::{BufMut, BytesMut};

/// A raw descriptor, tag and body. Descriptor contents are not decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub tag: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub program_map_pid: u16,
}

/// Program Association Table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pat {
    pub transport_stream_id: u16,
    pub version: u8,
    /// PID of the NIT, from program number 0.
    pub network_pid: Option<u16>,
    pub programs: Vec<PatEntry>,
}

impl Pat {
    pub fn from_table(table: &BinaryTable) -> Result<Self> {
        if table.table_id() != TABLE_ID_PAT {
            return Err(TsError::Parser(format!(
                "table id 0x{:02X} is not a PAT",
                table.table_id()
            )));
        }
        let mut pat = Pat {
            transport_stream_id: table.table_id_extension(),
            version: table.version(),
            ..Pat::default()
        };
        for section in table.sections() {
            for entry in section.payload().chunks_exact(4) {
                let program_number = u16::from_be_bytes([entry[0], entry[1]]);
                let pid = u16::from_be_bytes([entry[2] & 0x1F, entry[3]]);
                if program_number == 0 {
                    pat.network_pid = Some(pid);
                } else {
                    pat.programs.push(PatEntry {
                        program_number,
                        program_map_pid: pid,
                    });
                }
            }
        }
        Ok(pat)
    }

    /// Serializes the PAT into one section.
    pub fn to_table(&self) -> Result<BinaryTable> {
        let mut payload = BytesMut::new();
        if let Some(pid) = self.network_pid {
            payload.put_u16(0);
            payload.put_u16(0xE000 | pid);
        }
        for entry in &self.programs {
            payload.put_u16(entry.program_number);
            payload.put_u16(0xE000 | entry.program_map_pid);
        }
        let section = Section::new_long(
            TABLE_ID_PAT,
            self.transport_stream_id,
            self.version,
            true,
            0,
            0,
            &payload,
        )?;
        BinaryTable::new(PID_PAT, vec![section])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type: u8,
    pub elementary_pid: u16,
    pub descriptors: Vec<Descriptor>,
}

impl PmtStream {
    pub fn is_video(&self) -> bool {
        is_video_stream_type(self.stream_type)
    }
}

/// Program Map Table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pmt {
    pub program_number: u16,
    pub version: u8,
    pub pcr_pid: u16,
    pub program_descriptors: Vec<Descriptor>,
    pub streams: Vec<PmtStream>,
}

impl Pmt {
    pub fn from_table(table: &BinaryTable) -> Result<Self> {
        if table.table_id() != TABLE_ID_PMT {
            return Err(TsError::Parser(format!(
                "table id 0x{:02X} is not a PMT",
                table.table_id()
            )));
        }
        let mut pmt = Pmt {
            program_number: table.table_id_extension(),
            version: table.version(),
            ..Pmt::default()
        };

        for section in table.sections() {
            let data = section.payload();
            if data.len() < 4 {
                return Err(TsError::Parser("PMT section too short".into()));
            }
            pmt.pcr_pid = u16::from_be_bytes([data[0] & 0x1F, data[1]]);
            let info_length = (((data[2] & 0x0F) as usize) << 8) | data[3] as usize;
            let mut pos = 4;
            if pos + info_length > data.len() {
                return Err(TsError::Parser("program info overflows PMT section".into()));
            }
            pmt.program_descriptors
                .extend(parse_descriptors(&data[pos..pos + info_length])?);
            pos += info_length;

            while pos + 5 <= data.len() {
                let stream_type = data[pos];
                let elementary_pid = u16::from_be_bytes([data[pos + 1] & 0x1F, data[pos + 2]]);
                let es_info_length =
                    (((data[pos + 3] & 0x0F) as usize) << 8) | data[pos + 4] as usize;
                pos += 5;
                if pos + es_info_length > data.len() {
                    return Err(TsError::Parser("ES info overflows PMT section".into()));
                }
                let descriptors = parse_descriptors(&data[pos..pos + es_info_length])?;
                pos += es_info_length;

                pmt.streams.push(PmtStream {
                    stream_type,
                    elementary_pid,
                    descriptors,
                });
            }
        }
        Ok(pmt)
    }

    /// Serializes the PMT into one section for `pid`.
    pub fn to_table(&self, pid: u16) -> Result<BinaryTable> {
        let mut payload = BytesMut::new();
        payload.put_u16(0xE000 | self.pcr_pid);
        let info = serialize_descriptors(&self.program_descriptors);
        payload.put_u16(0xF000 | info.len() as u16);
        payload.put_slice(&info);
        for stream in &self.streams {
            let info = serialize_descriptors(&stream.descriptors);
            payload.put_u8(stream.stream_type);
            payload.put_u16(0xE000 | stream.elementary_pid);
            payload.put_u16(0xF000 | info.len() as u16);
            payload.put_slice(&info);
        }
        let section = Section::new_long(
            TABLE_ID_PMT,
            self.program_number,
            self.version,
            true,
            0,
            0,
            &payload,
        )?;
        BinaryTable::new(pid, vec![section])
    }

    /// First video component, in PMT order.
    pub fn first_video(&self) -> Option<&PmtStream> {
        self.streams.iter().find(|stream| stream.is_video())
    }
}

pub fn is_video_stream_type(stream_type: u8) -> bool {
    matches!(
        stream_type,
        STREAM_TYPE_MPEG1_VIDEO
            | STREAM_TYPE_MPEG2_VIDEO
            | STREAM_TYPE_MPEG4_VIDEO
            | STREAM_TYPE_H264
            | STREAM_TYPE_H265
    )
}

fn parse_descriptors(data: &[u8]) -> Result<Vec<Descriptor>> {
    let mut descriptors = Vec::new();
    let mut pos = 0;

    while pos + 2 <= data.len() {
        let tag = data[pos];
        let length = data[pos + 1] as usize;
        pos += 2;

        if pos + length > data.len() {
            return Err(TsError::Parser("descriptor data too short".into()));
        }

        descriptors.push(Descriptor {
            tag,
            data: data[pos..pos + length].to_vec(),
        });
        pos += length;
    }

    Ok(descriptors)
}

fn serialize_descriptors(descriptors: &[Descriptor]) -> Vec<u8> {
    let mut out = Vec::new();
    for descriptor in descriptors {
        out.push(descriptor.tag);
        out.push(descriptor.data.len() as u8);
        out.extend_from_slice(&descriptor.data);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::demuxer::SectionDemux;
    use crate::format::ts::packetizer::Packetizer;
    use pretty_assertions::assert_eq;

    fn sample_pmt() -> Pmt {
        Pmt {
            program_number: 1,
            version: 4,
            pcr_pid: 0x100,
            program_descriptors: vec![],
            streams: vec![
                PmtStream {
                    stream_type: STREAM_TYPE_AAC,
                    elementary_pid: 0x101,
                    descriptors: vec![Descriptor {
                        tag: 0x0A,
                        data: b"eng\0".to_vec(),
                    }],
                },
                PmtStream {
                    stream_type: STREAM_TYPE_H264,
                    elementary_pid: 0x100,
                    descriptors: vec![],
                },
            ],
        }
    }

    #[test]
    fn test_parse_pat() {
        let section =
            Section::new_long(TABLE_ID_PAT, 7, 0, true, 0, 0, &[0x00, 0x00, 0xE0, 0x10, 0x00, 0x01, 0xE1, 0x00])
                .unwrap();
        let table = BinaryTable::new(PID_PAT, vec![section]).unwrap();
        let pat = Pat::from_table(&table).unwrap();

        assert_eq!(pat.transport_stream_id, 7);
        assert_eq!(pat.network_pid, Some(0x10));
        assert_eq!(
            pat.programs,
            vec![PatEntry {
                program_number: 1,
                program_map_pid: 0x100
            }]
        );
    }

    #[test]
    fn test_pmt_first_video() {
        let pmt = sample_pmt();
        let video = pmt.first_video().unwrap();
        assert_eq!(video.elementary_pid, 0x100);
        assert_eq!(video.stream_type, STREAM_TYPE_H264);
    }

    #[test]
    fn test_pmt_through_demux_is_identical() {
        let original = sample_pmt();
        let table = original.to_table(0x1000).unwrap();
        let packets = Packetizer::new(0x1000).packetize_table(&table);

        let mut decoded = Vec::new();
        let mut demux = SectionDemux::with_pids([0x1000].into_iter().collect());
        for packet in &packets {
            demux.feed_packet(packet, &mut |table: &BinaryTable| {
                decoded.push(Pmt::from_table(table).unwrap());
            });
        }
        assert_eq!(decoded, vec![original]);
    }

    #[test]
    fn test_wrong_table_id() {
        let table = sample_pmt().to_table(0x1000).unwrap();
        assert!(Pat::from_table(&table).is_err());
    }
}
