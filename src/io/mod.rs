use crate::consts::BlockPointer;
use crate::driver::DeviceDriver;
use crate::util::error::{Error, Result};
use raw::{raw_read_block, raw_write_block};

mod raw;

/// Block-granular access to a device. Callers own their buffers; nothing here
/// is cached.
pub(crate) struct IO<A: DeviceDriver> {
    device: A,
    block_size: usize,
    block_count: u64,
}

impl<A: DeviceDriver> IO<A> {
    pub fn new(device: A, block_size: usize) -> Result<IO<A>> {
        let sector_size = device.get_sector_size();
        if block_size < sector_size || block_size % sector_size != 0 {
            return Err(Error::invalid(format!(
                "block size {} must be a multiple of the sector size {}",
                block_size, sector_size
            )));
        }
        let block_count = device.get_size() / block_size as u64;
        Ok(IO { device, block_size, block_count })
    }

    pub fn get_block_size(&self) -> usize {
        self.block_size
    }

    pub fn get_block_count(&self) -> u64 {
        self.block_count
    }

    pub fn empty_block(&self) -> Vec<u8> {
        vec![0; self.block_size]
    }

    pub fn read_block(&self, index: BlockPointer) -> Result<Vec<u8>> {
        let mut block = self.empty_block();
        self.read_block_into(index, &mut block)?;
        Ok(block)
    }

    pub fn read_block_into(&self, index: BlockPointer, block: &mut [u8]) -> Result<()> {
        self.check_access(index, block.len())?;
        raw_read_block(&self.device, self.block_size, block, index)?;
        Ok(())
    }

    pub fn write_block(&self, index: BlockPointer, block: &[u8]) -> Result<()> {
        self.check_access(index, block.len())?;
        raw_write_block(&self.device, self.block_size, block, index)?;
        Ok(())
    }

    pub fn zero_block(&self, index: BlockPointer) -> Result<()> {
        self.write_block(index, &self.empty_block())
    }

    pub fn flush(&self) -> Result<()> {
        self.device.flush()?;
        Ok(())
    }

    pub fn into_device(self) -> A {
        self.device
    }

    fn check_access(&self, index: BlockPointer, length: usize) -> Result<()> {
        if length != self.block_size {
            return Err(Error::invalid(format!(
                "block size mismatch - expected {}, got {}",
                self.block_size, length
            )));
        }
        if index as u64 >= self.block_count {
            return Err(Error::invalid(format!(
                "block index {} out of range (count {})",
                index, self.block_count
            )));
        }
        Ok(())
    }
}
