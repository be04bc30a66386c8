#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tspipe::format::ts::{
    Packetizer, Pat, PatEntry, Pmt, PmtStream, TSHeader, TsPacket, PID_PAT, STREAM_TYPE_H264,
    TS_PACKET_SIZE,
};

pub const PMT_PID: u16 = 0x100;
pub const VIDEO_PID: u16 = 0x101;

/// 100 packets per second: 150400 b/s.
pub const PACKETS_PER_SECOND: u64 = 100;
pub const TICKS_PER_PACKET: u64 = 27_000_000 / PACKETS_PER_SECOND;

/// Tables repeat every 50 packets, video access units start every 25 and
/// every fourth one (once per second) is an IDR picture.
pub const TABLE_INTERVAL: u64 = 50;
pub const ACCESS_UNIT_INTERVAL: u64 = 25;
pub const IDR_INTERVAL: u64 = 100;

const PES_HEADER: [u8; 9] = [0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0x00, 0x00];
const IDR_SLICE: [u8; 7] = [0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84];
const P_SLICE: [u8; 7] = [0x00, 0x00, 0x00, 0x01, 0x41, 0xC0, 0x00];

pub fn pat() -> Pat {
    Pat {
        transport_stream_id: 1,
        version: 0,
        network_pid: None,
        programs: vec![PatEntry {
            program_number: 1,
            program_map_pid: PMT_PID,
        }],
    }
}

pub fn pmt() -> Pmt {
    Pmt {
        program_number: 1,
        version: 0,
        pcr_pid: VIDEO_PID,
        program_descriptors: Vec::new(),
        streams: vec![PmtStream {
            stream_type: STREAM_TYPE_H264,
            elementary_pid: VIDEO_PID,
            descriptors: Vec::new(),
        }],
    }
}

/// A constant bitrate single-program stream with one H.264 video PID.
pub fn synthetic_stream(seconds: u64) -> Vec<TsPacket> {
    let pat_table = pat().to_table().unwrap();
    let pmt_table = pmt().to_table(PMT_PID).unwrap();
    let mut pat_packetizer = Packetizer::new(PID_PAT);
    let mut pmt_packetizer = Packetizer::new(PMT_PID);
    let mut video_cc = 0u8;

    (0..seconds * PACKETS_PER_SECOND)
        .map(|index| match index % TABLE_INTERVAL {
            0 => pat_packetizer.packetize_table(&pat_table).remove(0),
            1 => pmt_packetizer.packetize_table(&pmt_table).remove(0),
            _ => {
                let packet = video_packet(index, video_cc);
                video_cc = (video_cc + 1) & 0x0F;
                packet
            }
        })
        .collect()
}

pub fn is_access_unit_start(index: u64) -> bool {
    index % ACCESS_UNIT_INTERVAL == 2
}

fn video_packet(index: u64, cc: u8) -> TsPacket {
    let pusi = is_access_unit_start(index);
    let pcr = (index % 10 == 3).then_some(index * TICKS_PER_PACKET);
    let mut payload = Vec::new();
    if pusi {
        payload.extend_from_slice(&PES_HEADER);
        if index % IDR_INTERVAL == 2 {
            payload.extend_from_slice(&IDR_SLICE);
        } else {
            payload.extend_from_slice(&P_SLICE);
        }
    }
    payload.resize(170, 0xAA);
    let header = TSHeader::new(VIDEO_PID).with_pusi(pusi).with_cc(cc);
    TsPacket::build(&header, pcr, &payload).unwrap()
}

pub fn write_stream(path: &Path, packets: &[TsPacket]) {
    let data: Vec<u8> = packets.iter().flat_map(|p| p.as_bytes().iter().copied()).collect();
    std::fs::write(path, data).unwrap();
}

pub fn read_stream(path: &Path) -> Vec<TsPacket> {
    let data = std::fs::read(path).unwrap();
    assert_eq!(data.len() % TS_PACKET_SIZE, 0, "{} is not packet aligned", path.display());
    data.chunks(TS_PACKET_SIZE)
        .map(|chunk| TsPacket::from_slice(chunk).unwrap())
        .collect()
}

/// A fresh, empty directory under the system temp dir.
pub fn test_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tspipe-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Segment files in `dir`, sorted by name.
pub fn segment_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "ts"))
        .filter(|path| path.file_name().is_some_and(|name| name.to_string_lossy().starts_with("seg")))
        .collect();
    files.sort();
    files
}
