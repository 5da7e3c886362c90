//! Record checksums.
//!
//! Two checksums are used on the wire:
//!
//! - [`xor_checksum`]: an 8-bit XOR fold, appended to location/alert records.
//! - [`crc32_checksum`]: a CRC-32 seeded with `0xFFFFFFFF`, appended to emergency records.
//!
//! Both are rendered as uppercase hex at their natural width, e.g. `"0"`, `"A"`, `"7F"`.
//! The CRC engine is provided by the `crc32` cargo feature; when it is compiled out
//! [`crc32_checksum`] reports [`ChecksumError::Unavailable`] so callers can send the
//! record without a checksum instead of failing.
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChecksumError {
    #[error("crc32 engine unavailable")]
    Unavailable,
}

/// XOR-folds every byte of `data` into an accumulator starting at zero.
pub fn xor_checksum(data: impl AsRef<[u8]>) -> String {
    let csum = data.as_ref().iter().fold(0u8, |acc, b| acc ^ b);
    format!("{csum:X}")
}

#[cfg(feature = "crc32")]
pub fn crc32_checksum(data: impl AsRef<[u8]>) -> Result<String, ChecksumError> {
    // Register starts at 0xFFFFFFFF. `new_with_initial` expects a finished CRC, not a seed.
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data.as_ref());
    Ok(format!("{:X}", hasher.finalize()))
}

#[cfg(not(feature = "crc32"))]
pub fn crc32_checksum(_data: impl AsRef<[u8]>) -> Result<String, ChecksumError> {
    Err(ChecksumError::Unavailable)
}
