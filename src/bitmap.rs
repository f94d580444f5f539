use log::trace;

use crate::consts::BlockPointer;
use crate::driver::DeviceDriver;
use crate::io::IO;
use crate::util::error::{Error, Resource, Result};

/// One bit per inode or block, persisted in a single dedicated block.
/// Bit `i` is bit `i % 8` of byte `i / 8`; a set bit means allocated.
#[derive(Debug)]
pub struct Bitmap {
    block: BlockPointer,
    capacity: u32,
    resource: Resource,
    data: Vec<u8>,
}

impl Bitmap {
    pub fn new(
        block: BlockPointer,
        capacity: u32,
        resource: Resource,
        block_size: usize,
    ) -> Bitmap {
        debug_assert!(capacity as usize <= block_size * 8);
        Bitmap { block, capacity, resource, data: vec![0; block_size] }
    }

    pub fn read<A: DeviceDriver>(
        io: &IO<A>,
        block: BlockPointer,
        capacity: u32,
        resource: Resource,
    ) -> Result<Bitmap> {
        let data = io.read_block(block)?;
        Ok(Bitmap { block, capacity, resource, data })
    }

    pub fn write<A: DeviceDriver>(&self, io: &IO<A>) -> Result<()> {
        io.write_block(self.block, &self.data)
    }

    /// First clear bit from index 0, set and persisted.
    pub fn allocate<A: DeviceDriver>(&mut self, io: &IO<A>) -> Result<u32> {
        let index = (0..self.capacity)
            .find(|&index| self.is_free(index))
            .ok_or(Error::ResourceExhausted(self.resource))?;

        self.mark_used_mem(index);
        if let Err(e) = self.write(io) {
            self.mark_free_mem(index);
            return Err(e);
        }
        Ok(index)
    }

    pub fn free<A: DeviceDriver>(&mut self, io: &IO<A>, index: u32) -> Result<()> {
        self.check_range(index)?;
        if self.is_free(index) {
            return Err(Error::invalid(format!("{} {} is not allocated", self.resource, index)));
        }
        self.mark_free_mem(index);
        if let Err(e) = self.write(io) {
            self.mark_used_mem(index);
            return Err(e);
        }
        Ok(())
    }

    /// Marks without persisting; used while laying out a fresh image.
    pub(crate) fn reserve(&mut self, index: u32) -> Result<()> {
        self.check_range(index)?;
        self.mark_used_mem(index);
        Ok(())
    }

    pub fn is_used(&self, index: u32) -> bool {
        index < self.capacity && !self.is_free(index)
    }

    pub fn free_count(&self) -> u32 {
        (0..self.capacity).filter(|&index| self.is_free(index)).count() as u32
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn check_range(&self, index: u32) -> Result<()> {
        if index >= self.capacity {
            return Err(Error::invalid(format!(
                "{} index {} out of range (capacity {})",
                self.resource, index, self.capacity
            )));
        }
        Ok(())
    }

    fn is_free(&self, index: u32) -> bool {
        self.data[(index / 8) as usize] & (1 << (index % 8)) == 0
    }

    fn mark_used_mem(&mut self, index: u32) {
        trace!("marking {} {} used", self.resource, index);
        self.data[(index / 8) as usize] |= 1 << (index % 8);
    }

    fn mark_free_mem(&mut self, index: u32) {
        trace!("marking {} {} free", self.resource, index);
        self.data[(index / 8) as usize] &= !(1 << (index % 8));
    }
}
