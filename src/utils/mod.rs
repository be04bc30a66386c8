//! # Utility Functions and Types
//!
//! Small building blocks shared by the transport stream code:
//!
//! - Bit-level reading for slice header inspection
//! - CRC32/MPEG-2 calculation and section validation
//!
//! ```rust
//! use tspipe::utils::{BitReader, Crc32Mpeg2};
//!
//! let mut reader = BitReader::new(&[0b1011_0011]);
//! assert_eq!(reader.read_bits(3).unwrap(), 0b101);
//!
//! let crc = Crc32Mpeg2::calculate(b"Hello, world!");
//! println!("CRC32: {:08x}", crc);
//! ```

/// Bitstream reading utilities
pub mod bits;

/// CRC calculation
pub mod crc;

pub use bits::BitReader;
pub use crc::Crc32Mpeg2;
