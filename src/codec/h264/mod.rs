use crate::error::Result;
use crate::utils::BitReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NALUnitType {
    CodedSliceNonIDR,
    CodedSliceDataPartitionA,
    CodedSliceIDR,
    SEI,
    SPS,
    PPS,
    AccessUnitDelimiter,
    Other(u8),
}

impl From<u8> for NALUnitType {
    fn from(value: u8) -> Self {
        match value & 0x1F {
            1 => NALUnitType::CodedSliceNonIDR,
            2 => NALUnitType::CodedSliceDataPartitionA,
            5 => NALUnitType::CodedSliceIDR,
            6 => NALUnitType::SEI,
            7 => NALUnitType::SPS,
            8 => NALUnitType::PPS,
            9 => NALUnitType::AccessUnitDelimiter,
            other => NALUnitType::Other(other),
        }
    }
}

/// Slice types 2 and 7 are I, 4 and 9 are SI.
fn is_intra_slice_type(slice_type: u32) -> bool {
    matches!(slice_type % 5, 2 | 4)
}

/// Reads `slice_type` from the start of a slice header (NAL header excluded).
pub fn slice_type(rbsp: &[u8]) -> Result<u32> {
    let mut reader = BitReader::new(rbsp);
    reader.read_golomb()?; // first_mb_in_slice
    reader.read_golomb()
}

/// Strips emulation prevention bytes (00 00 03 -> 00 00).
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &byte in data {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

/// True for a NAL unit that opens or announces an intra picture: an IDR
/// slice, a sequence parameter set, or an I/SI slice.
pub fn is_intra_nal(nal: &[u8]) -> bool {
    let Some(&header) = nal.first() else {
        return false;
    };
    match NALUnitType::from(header) {
        NALUnitType::CodedSliceIDR | NALUnitType::SPS => true,
        NALUnitType::CodedSliceNonIDR | NALUnitType::CodedSliceDataPartitionA => {
            // A few bytes are enough for two Exp-Golomb codes
            let head = &nal[1..nal.len().min(16)];
            slice_type(&remove_emulation_prevention(head))
                .map(is_intra_slice_type)
                .unwrap_or(false)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_emulation_prevention() {
        assert_eq!(
            remove_emulation_prevention(&[0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x02]),
            vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x02]
        );
        assert_eq!(remove_emulation_prevention(&[0x00, 0x01, 0x03]), vec![0x00, 0x01, 0x03]);
    }

    #[test]
    fn test_nal_classification() {
        assert!(is_intra_nal(&[0x65, 0x88]));
        assert!(is_intra_nal(&[0x67, 0x42, 0x00, 0x1E]));
        assert!(!is_intra_nal(&[0x68, 0xCE]));
        assert!(!is_intra_nal(&[]));
    }

    #[test]
    fn test_non_idr_slice_types() {
        // first_mb_in_slice = 0 ('1'), slice_type = 7 ('0001000')
        assert!(is_intra_nal(&[0x41, 0b1000_1000, 0x00]));
        // slice_type = 0 (P)
        assert!(!is_intra_nal(&[0x41, 0b1100_0000]));
        // slice_type = 4 (SI)
        assert!(is_intra_nal(&[0x41, 0b1001_0100]));
    }
}
