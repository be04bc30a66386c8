use crate::error::{Result, TsError};

/// A big-endian bit reader over a byte slice.
///
/// Used to walk slice headers when looking for intra-coded pictures; only the
/// handful of operations needed there are provided.
///
/// ```
/// use tspipe::utils::BitReader;
///
/// let data = [0b1011_0011];
/// let mut reader = BitReader::new(&data);
/// assert!(reader.read_bit().unwrap());
/// assert_eq!(reader.read_bits(3).unwrap(), 0b011);
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    /// Creates a reader positioned on the first bit of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        BitReader { data, position: 0 }
    }

    /// Reads one bit.
    pub fn read_bit(&mut self) -> Result<bool> {
        let byte = self
            .data
            .get(self.position / 8)
            .ok_or_else(|| TsError::Parser("bit reader exhausted".into()))?;
        let bit = (byte >> (7 - (self.position % 8))) & 1;
        self.position += 1;
        Ok(bit == 1)
    }

    /// Reads `n` bits (at most 32) as a big-endian unsigned value.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(TsError::Parser(format!("cannot read {} bits at once", n)));
        }
        if self.remaining_bits() < n as usize {
            return Err(TsError::Parser("bit reader exhausted".into()));
        }
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u32;
        }
        Ok(value)
    }

    /// Reads an unsigned Exp-Golomb code, ue(v).
    pub fn read_golomb(&mut self) -> Result<u32> {
        let mut leading_zeros = 0;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(TsError::Parser("invalid Exp-Golomb code".into()));
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let info = self.read_bits(leading_zeros)?;
        Ok((1u32 << leading_zeros) - 1 + info)
    }

    /// Skips `n` bits.
    pub fn skip_bits(&mut self, n: usize) -> Result<()> {
        if self.remaining_bits() < n {
            return Err(TsError::Parser("bit reader exhausted".into()));
        }
        self.position += n;
        Ok(())
    }

    /// Number of bits left to read.
    pub fn remaining_bits(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.position)
    }
}
