use std::io;

pub mod file_drive;

/// Sector-addressed storage underneath the block layer. Implementations are
/// shared between concurrent filesystem calls, so every method takes `&self`.
pub trait DeviceDriver: Send + Sync {
    fn get_sector_count(&self) -> u64;
    fn get_sector_size(&self) -> usize;
    fn read_sector(&self, index: u64, buffer: &mut [u8]) -> io::Result<()>;
    fn write_sector(&self, index: u64, data: &[u8]) -> io::Result<()>;
    fn flush(&self) -> io::Result<()>;

    fn get_size(&self) -> u64 {
        self.get_sector_count() * self.get_sector_size() as u64
    }
}
