//! Container formats. Only MPEG transport streams are handled.

pub mod ts;
