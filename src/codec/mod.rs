//! # Video access unit inspection
//!
//! The segmenter only needs to answer one question about video: does this
//! PES payload start an intra-coded picture? [`find_intra_image`] answers it
//! for MPEG-1/2 video, AVC and HEVC by walking the start codes of the
//! elementary stream data that follows the PES header.
//!
//! ```rust
//! use tspipe::codec::find_intra_image;
//! use tspipe::format::ts::STREAM_TYPE_H264;
//!
//! // PES header (no optional fields), then an AVC IDR slice
//! let payload = [
//!     0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0x00, 0x00,
//!     0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84,
//! ];
//! assert_eq!(find_intra_image(&payload, STREAM_TYPE_H264), Some(9));
//! ```

/// H.264/AVC NAL unit classification
pub mod h264;

/// H.265/HEVC NAL unit classification
pub mod h265;

/// MPEG-1/2 video start codes
pub mod mpeg2;

use crate::format::ts::types::{
    STREAM_TYPE_H264, STREAM_TYPE_H265, STREAM_TYPE_MPEG1_VIDEO, STREAM_TYPE_MPEG2_VIDEO,
};

const PES_FIXED_HEADER_SIZE: usize = 9;

/// Offset of the elementary stream data in a PES packet, if `payload` starts one.
pub fn pes_payload_offset(payload: &[u8]) -> Option<usize> {
    if payload.len() < PES_FIXED_HEADER_SIZE || payload[..3] != [0x00, 0x00, 0x01] {
        return None;
    }
    let stream_id = payload[3];
    // Streams without the optional PES header
    if matches!(stream_id, 0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xF2 | 0xF8 | 0xFF) {
        return Some(6);
    }
    let offset = PES_FIXED_HEADER_SIZE + payload[8] as usize;
    (offset <= payload.len()).then_some(offset)
}

/// Iterates over `(start_code_offset, unit)` where `unit` begins after a
/// 00 00 01 prefix and runs to the next prefix or the end of `data`.
///
/// Offsets point at the first zero of the prefix; a four-byte prefix
/// (00 00 00 01) is reported from its leading zero.
pub fn start_codes(data: &[u8]) -> impl Iterator<Item = (usize, &[u8])> + '_ {
    let mut prefixes = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            prefixes.push((start, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let ends: Vec<usize> = prefixes
        .iter()
        .skip(1)
        .map(|&(start, _)| start)
        .chain(std::iter::once(data.len()))
        .collect();

    prefixes
        .into_iter()
        .zip(ends)
        .map(move |((start, body), end)| (start, &data[body..end.max(body)]))
}

/// Finds the start of an intra-coded picture in the PES payload of a
/// payload-unit-start packet.
///
/// Returns the offset in `payload` of the start code that opens the intra
/// picture (or the parameter set preceding it), or `None` when nothing
/// intra is found or the stream type is not inspected.
pub fn find_intra_image(payload: &[u8], stream_type: u8) -> Option<usize> {
    let es_offset = pes_payload_offset(payload)?;
    let es = &payload[es_offset..];

    let found = match stream_type {
        STREAM_TYPE_MPEG1_VIDEO | STREAM_TYPE_MPEG2_VIDEO => start_codes(es)
            .find(|(_, unit)| mpeg2::is_intra_unit(unit))
            .map(|(offset, _)| offset),
        STREAM_TYPE_H264 => start_codes(es)
            .find(|(_, unit)| h264::is_intra_nal(unit))
            .map(|(offset, _)| offset),
        STREAM_TYPE_H265 => start_codes(es)
            .find(|(_, unit)| h265::is_intra_nal(unit))
            .map(|(offset, _)| offset),
        _ => None,
    };
    found.map(|offset| es_offset + offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::types::STREAM_TYPE_AAC;

    const PES_HEADER: [u8; 9] = [0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0x00, 0x00];

    fn pes(es: &[u8]) -> Vec<u8> {
        let mut data = PES_HEADER.to_vec();
        data.extend_from_slice(es);
        data
    }

    #[test]
    fn test_pes_payload_offset() {
        let mut data = PES_HEADER.to_vec();
        data[8] = 5;
        data.extend_from_slice(&[0xFF; 5]);
        assert_eq!(pes_payload_offset(&data), Some(14));
        assert_eq!(pes_payload_offset(&[0x47, 0x00, 0x01]), None);
    }

    #[test]
    fn test_start_codes() {
        let data = [0x00, 0x00, 0x01, 0x09, 0xF0, 0x00, 0x00, 0x00, 0x01, 0x67, 0x42];
        let units: Vec<(usize, &[u8])> = start_codes(&data).collect();
        assert_eq!(units, vec![(0, &[0x09, 0xF0][..]), (5, &[0x67, 0x42][..])]);
    }

    #[test]
    fn test_avc_non_intra_then_idr() {
        // access unit delimiter, P slice, then IDR
        let es = [
            0x00, 0x00, 0x00, 0x01, 0x09, 0x30, //
            0x00, 0x00, 0x01, 0x41, 0x9A, 0x00, //
            0x00, 0x00, 0x01, 0x65, 0x88,
        ];
        // the zero ending the P slice makes a four-byte prefix at es offset 11
        assert_eq!(find_intra_image(&pes(&es), STREAM_TYPE_H264), Some(9 + 11));
        assert_eq!(find_intra_image(&pes(&es[..12]), STREAM_TYPE_H264), None);
    }

    #[test]
    fn test_hevc_irap() {
        // IDR_W_RADL (19): header byte (19 << 1) = 0x26
        let es = [0x00, 0x00, 0x01, 0x26, 0x01, 0xAF];
        assert_eq!(find_intra_image(&pes(&es), STREAM_TYPE_H265), Some(9));
        // TRAIL_R (1)
        let es = [0x00, 0x00, 0x01, 0x02, 0x01, 0xD0];
        assert_eq!(find_intra_image(&pes(&es), STREAM_TYPE_H265), None);
    }

    #[test]
    fn test_mpeg2_sequence_header() {
        let es = [0x00, 0x00, 0x01, 0xB3, 0x16, 0x00, 0xF0];
        assert_eq!(find_intra_image(&pes(&es), STREAM_TYPE_MPEG2_VIDEO), Some(9));
    }

    #[test]
    fn test_audio_not_inspected() {
        let es = [0x00, 0x00, 0x01, 0x65];
        assert_eq!(find_intra_image(&pes(&es), STREAM_TYPE_AAC), None);
    }
}
