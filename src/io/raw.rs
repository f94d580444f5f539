use std::io;

use log::trace;

use crate::consts::BlockPointer;
use crate::driver::DeviceDriver;

/// Writes one block as `block_size / sector_size` consecutive sectors.
pub(crate) fn raw_write_block<A: DeviceDriver>(
    drive: &A,
    block_size: usize,
    data: &[u8],
    index: BlockPointer,
) -> io::Result<()> {
    let sector_size = drive.get_sector_size();
    if block_size == sector_size {
        return drive.write_sector(index as u64, data);
    }

    let ratio = (block_size / sector_size) as u64;
    let start = index as u64 * ratio;
    for (i, chunk) in data.chunks(sector_size).enumerate() {
        trace!("writing sector {} of block {}", start + i as u64, index);
        drive.write_sector(start + i as u64, chunk)?;
    }
    Ok(())
}

pub(crate) fn raw_read_block<A: DeviceDriver>(
    drive: &A,
    block_size: usize,
    buffer: &mut [u8],
    index: BlockPointer,
) -> io::Result<()> {
    let sector_size = drive.get_sector_size();
    if block_size == sector_size {
        return drive.read_sector(index as u64, buffer);
    }

    let ratio = (block_size / sector_size) as u64;
    let start = index as u64 * ratio;
    for (i, chunk) in buffer.chunks_mut(sector_size).enumerate() {
        drive.read_sector(start + i as u64, chunk)?;
    }
    Ok(())
}
