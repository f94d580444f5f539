use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::debug;

use crate::driver::DeviceDriver;

/// A disk image file posing as a sector device.
#[derive(Debug)]
pub struct FileDrive {
    file: File,
    path: PathBuf,
    sector_size: usize,
    sector_count: u64,
}

impl FileDrive {
    /// Creates (or truncates) the image and sizes it to `bytes`.
    pub fn create(path: impl AsRef<Path>, bytes: u64, sector_size: usize) -> io::Result<FileDrive> {
        check_sector_size(sector_size)?;
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(bytes)?;
        debug!("created image {} ({} bytes)", path.display(), bytes);
        Ok(FileDrive {
            file,
            path: path.to_path_buf(),
            sector_size,
            sector_count: bytes / sector_size as u64,
        })
    }

    /// Opens an existing image. A missing file comes back as
    /// `io::ErrorKind::NotFound`.
    pub fn open(path: impl AsRef<Path>, sector_size: usize) -> io::Result<FileDrive> {
        check_sector_size(sector_size)?;
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let bytes = file.metadata()?.len();
        debug!("opened image {} ({} bytes)", path.display(), bytes);
        Ok(FileDrive {
            file,
            path: path.to_path_buf(),
            sector_size,
            sector_count: bytes / sector_size as u64,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_access(&self, index: u64, length: usize) -> io::Result<()> {
        if length != self.sector_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("sector size mismatch - expected {}, got {}", self.sector_size, length),
            ));
        }
        if index >= self.sector_count {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("sector {} out of range (count {})", index, self.sector_count),
            ));
        }
        Ok(())
    }
}

fn check_sector_size(sector_size: usize) -> io::Result<()> {
    if sector_size == 0 || !sector_size.is_power_of_two() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("sector size {} is not a power of two", sector_size),
        ));
    }
    Ok(())
}

impl DeviceDriver for FileDrive {
    fn get_sector_count(&self) -> u64 {
        self.sector_count
    }

    fn get_sector_size(&self) -> usize {
        self.sector_size
    }

    fn read_sector(&self, index: u64, buffer: &mut [u8]) -> io::Result<()> {
        self.check_access(index, buffer.len())?;
        self.file.read_exact_at(buffer, index * self.sector_size as u64)
    }

    fn write_sector(&self, index: u64, data: &[u8]) -> io::Result<()> {
        self.check_access(index, data.len())?;
        self.file.write_all_at(data, index * self.sector_size as u64)
    }

    fn flush(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}
