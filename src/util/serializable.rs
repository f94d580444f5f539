use crate::util::error::{Error, Result};

/// Explicit little-endian encoding of an on-disk record.
pub trait ByteSerializable: Sized {
    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(bytes: &[u8]) -> Result<Self>;
}

/// Records with a fixed footprint. `to_bytes` always yields exactly
/// `size_on_disk()` bytes.
pub trait KnownSize: ByteSerializable {
    fn size_on_disk() -> usize;

    fn check_length(bytes: &[u8]) -> Result<()> {
        if bytes.len() < Self::size_on_disk() {
            return Err(Error::corrupted(format!(
                "record needs {} bytes, got {}",
                Self::size_on_disk(),
                bytes.len()
            )));
        }
        Ok(())
    }
}

pub(crate) fn u16_at(bytes: &[u8], at: usize) -> u16 {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&bytes[at..at + 2]);
    u16::from_le_bytes(raw)
}

pub(crate) fn u32_at(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

pub(crate) fn u64_at(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

pub(crate) fn put_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}
