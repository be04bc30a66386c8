pub const SEQUENCE_HEADER_CODE: u8 = 0xB3;
pub const PICTURE_START_CODE: u8 = 0x00;
pub const GROUP_START_CODE: u8 = 0xB8;

/// Picture coding type of an I picture.
const PICTURE_TYPE_I: u8 = 1;

/// True for a sequence header, a GOP header, or an I picture header.
///
/// `unit` starts with the start code value that follows the 00 00 01 prefix.
pub fn is_intra_unit(unit: &[u8]) -> bool {
    match unit.first() {
        Some(&SEQUENCE_HEADER_CODE) | Some(&GROUP_START_CODE) => true,
        // temporal_reference (10 bits), picture_coding_type (3 bits)
        Some(&PICTURE_START_CODE) if unit.len() >= 3 => (unit[2] >> 3) & 0x07 == PICTURE_TYPE_I,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_picture_types() {
        assert!(is_intra_unit(&[0x00, 0x00, 0x08]));
        // P picture
        assert!(!is_intra_unit(&[0x00, 0x00, 0x10]));
        assert!(is_intra_unit(&[SEQUENCE_HEADER_CODE, 0x16]));
        assert!(!is_intra_unit(&[0x01, 0x00]));
    }
}
