//! # MPEG Transport Stream processing
//!
//! Everything that looks inside transport packets lives here:
//!
//! - Packet access and batching ([`TsPacket`], [`PacketBatch`])
//! - Continuity counter regulation ([`ContinuityRegulator`])
//! - PCR based bitrate estimation ([`PcrAnalyzer`])
//! - Section reassembly and table delivery ([`SectionDemux`])
//! - PAT/PMT decoding and re-packetization
//! - Segment cutting, retention and HLS playlists
//!
//! ## Example
//!
//! ```rust
//! use tspipe::format::ts::{BinaryTable, Packetizer, Pat, PatEntry, SectionDemux, PID_PAT};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pat = Pat {
//!     transport_stream_id: 1,
//!     programs: vec![PatEntry { program_number: 1, program_map_pid: 0x100 }],
//!     ..Pat::default()
//! };
//! let packets = Packetizer::new(PID_PAT).packetize_table(&pat.to_table()?);
//!
//! let mut demux = SectionDemux::new();
//! demux.add_pid(PID_PAT);
//! let mut found = Vec::new();
//! for packet in &packets {
//!     demux.feed_packet(packet, &mut |table: &BinaryTable| found.push(Pat::from_table(table)));
//! }
//! assert_eq!(found.len(), 1);
//! # Ok(())
//! # }
//! ```

/// Continuity counter regulation
pub mod continuity;

/// Section reassembly and table delivery
pub mod demuxer;

/// HLS segmenting and playlist generation
pub mod hls;

/// Transport packets, metadata and batches
pub mod packet;

/// Section to packet conversion
pub mod packetizer;

/// PAT/PMT decoding
pub mod parser;

/// PCR based bitrate estimation
pub mod pcr;

/// Sliding window of live output units
pub mod retention;

/// Segment boundary decisions
pub mod segment;

/// Core TS types and constants
pub mod types;

pub use continuity::{CcMode, CcStatus, ContinuityRegulator};
pub use demuxer::{BinaryTable, DemuxStats, Section, SectionDemux, TableHandler};
pub use hls::{HLSConfig, HLSPlaylist, HLSSegment, HLSSegmenter, SegmentNamer};
pub use packet::{PacketBatch, PacketMetadata, TsPacket};
pub use packetizer::Packetizer;
pub use parser::{Descriptor, Pat, PatEntry, Pmt, PmtStream};
pub use pcr::PcrAnalyzer;
pub use retention::RetentionWindow;
pub use segment::{BoundaryConfig, BoundaryPolicy, CutReason, Decision, ReferenceStream, UnitTiming};
pub use types::{
    LabelSet, PidSet, TSHeader, LABEL_MAX, PID_MAX, PID_NULL, PID_PAT, STREAM_TYPE_AAC,
    STREAM_TYPE_H264, STREAM_TYPE_H265, STREAM_TYPE_MPEG2_VIDEO, TS_PACKET_SIZE,
};
