#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NALUnitType {
    /// Trailing, sub-layer and leading pictures (0..=9)
    NonIrap(u8),
    BlaWLp,
    BlaWRadl,
    BlaNLp,
    IdrWRadl,
    IdrNLp,
    CraNut,
    /// Reserved IRAP types 22 and 23
    ReservedIrap(u8),
    Vps,
    Sps,
    Pps,
    Aud,
    Other(u8),
}

impl NALUnitType {
    /// Decodes the type from the first byte of the two-byte NAL header.
    pub fn from_header(byte: u8) -> Self {
        match (byte >> 1) & 0x3F {
            value @ 0..=9 => NALUnitType::NonIrap(value),
            16 => NALUnitType::BlaWLp,
            17 => NALUnitType::BlaWRadl,
            18 => NALUnitType::BlaNLp,
            19 => NALUnitType::IdrWRadl,
            20 => NALUnitType::IdrNLp,
            21 => NALUnitType::CraNut,
            value @ 22..=23 => NALUnitType::ReservedIrap(value),
            32 => NALUnitType::Vps,
            33 => NALUnitType::Sps,
            34 => NALUnitType::Pps,
            35 => NALUnitType::Aud,
            value => NALUnitType::Other(value),
        }
    }

    /// Intra random access point picture (types 16 to 23).
    pub fn is_irap(&self) -> bool {
        matches!(
            self,
            NALUnitType::BlaWLp
                | NALUnitType::BlaWRadl
                | NALUnitType::BlaNLp
                | NALUnitType::IdrWRadl
                | NALUnitType::IdrNLp
                | NALUnitType::CraNut
                | NALUnitType::ReservedIrap(_)
        )
    }
}

/// True for an IRAP picture or the VPS/SPS that precede one.
pub fn is_intra_nal(nal: &[u8]) -> bool {
    match nal.first().map(|&byte| NALUnitType::from_header(byte)) {
        Some(NALUnitType::Vps | NALUnitType::Sps) => true,
        Some(nal_type) => nal_type.is_irap(),
        None => false,
    }
}
