use log::trace;

use crate::consts::{BlockPointer, DIRECT_POINTERS, INDIRECT_POINTERS, NULL_POINTER};
use crate::driver::DeviceDriver;
use crate::fs::FS;
use crate::inode::Inode;
use crate::util::error::{Error, Result};
use crate::util::serializable::{put_u32, u32_at};

const POINTER_SIZE: usize = std::mem::size_of::<BlockPointer>();

/// Blocks unmapped from an inode but still marked used in the bitmap.
#[derive(Debug, Default)]
pub(crate) struct Detached {
    pub(crate) data: Vec<BlockPointer>,
    pub(crate) indirect: Vec<BlockPointer>,
}

/// Mapping of logical content blocks onto the direct and indirect pointers of
/// an inode. Logical block `i < 16` lives in `direct[i]`; the rest are spread
/// over the indirect blocks in order, `pointers_per_block` each.
impl<A: DeviceDriver> FS<A> {
    /// Largest number of content blocks one inode can address.
    pub fn max_content_blocks(&self) -> usize {
        DIRECT_POINTERS + INDIRECT_POINTERS * self.superblock.pointers_per_block()
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_content_blocks() as u64 * self.block_size() as u64
    }

    fn indirect_position(&self, index: usize) -> (usize, usize) {
        let ppb = self.superblock.pointers_per_block();
        let m = index - DIRECT_POINTERS;
        (m / ppb, m % ppb)
    }

    /// Physical block behind logical block `index`, or `NULL_POINTER` when it
    /// was never allocated.
    pub(crate) fn block_for_index(&self, inode: &Inode, index: usize) -> Result<BlockPointer> {
        if index < DIRECT_POINTERS {
            return Ok(inode.direct[index]);
        }
        let (slot, entry) = self.indirect_position(index);
        if slot >= INDIRECT_POINTERS || inode.indirect[slot] == NULL_POINTER {
            return Ok(NULL_POINTER);
        }
        let pointers = self.io.read_block(inode.indirect[slot])?;
        Ok(u32_at(&pointers, entry * POINTER_SIZE))
    }

    /// Physical block holding byte `offset` of the inode's content.
    pub fn block_for_offset(&self, inode: &Inode, offset: u64) -> Result<BlockPointer> {
        self.block_for_index(inode, (offset / self.block_size() as u64) as usize)
    }

    /// Every content block in logical order.
    pub(crate) fn content_blocks(&self, inode: &Inode) -> Result<Vec<BlockPointer>> {
        let count = inode.content_blocks as usize;
        let mut blocks: Vec<BlockPointer> = inode
            .direct
            .iter()
            .take(count)
            .take_while(|&&block| block != NULL_POINTER)
            .copied()
            .collect();

        let ppb = self.superblock.pointers_per_block();
        for &indirect in inode.indirect.iter() {
            if blocks.len() >= count || indirect == NULL_POINTER {
                break;
            }
            let pointers = self.io.read_block(indirect)?;
            let wanted = (count - blocks.len()).min(ppb);
            let before = blocks.len();
            blocks.extend(
                pointers
                    .chunks_exact(POINTER_SIZE)
                    .take(wanted)
                    .map(|raw| u32_at(raw, 0))
                    .take_while(|&block| block != NULL_POINTER),
            );
            if blocks.len() - before < wanted {
                break;
            }
        }

        if blocks.len() != count {
            return Err(Error::corrupted(format!(
                "inode {} records {} content blocks but maps {}",
                inode.id,
                count,
                blocks.len()
            )));
        }
        Ok(blocks)
    }

    /// Overwrites the pointer of an already mapped logical block.
    pub(crate) fn set_pointer(
        &self,
        inode: &mut Inode,
        index: usize,
        block: BlockPointer,
    ) -> Result<()> {
        if index < DIRECT_POINTERS {
            inode.direct[index] = block;
            return Ok(());
        }
        let (slot, entry) = self.indirect_position(index);
        let indirect = inode.indirect[slot];
        if indirect == NULL_POINTER {
            return Err(Error::corrupted(format!(
                "inode {} has no indirect block for logical block {}",
                inode.id, index
            )));
        }
        let mut pointers = self.io.read_block(indirect)?;
        put_u32(&mut pointers, entry * POINTER_SIZE, block);
        self.io.write_block(indirect, &pointers)
    }

    /// Allocates a zeroed block and maps it as the next logical block. The
    /// caller persists the inode.
    pub(crate) fn append_block(&self, inode: &mut Inode) -> Result<BlockPointer> {
        let index = inode.content_blocks as usize;
        if index >= self.max_content_blocks() {
            return Err(Error::FileTooLarge);
        }
        let block = self.allocate_block()?;
        if let Err(e) = self.link_block(inode, index, block) {
            self.rollback(self.free_block(block));
            return Err(e);
        }
        inode.content_blocks += 1;
        trace!("inode {} logical block {} -> {}", inode.id, index, block);
        Ok(block)
    }

    fn link_block(&self, inode: &mut Inode, index: usize, block: BlockPointer) -> Result<()> {
        if index < DIRECT_POINTERS {
            inode.direct[index] = block;
            return Ok(());
        }
        let (slot, entry) = self.indirect_position(index);
        if inode.indirect[slot] != NULL_POINTER {
            return self.set_pointer(inode, index, block);
        }

        let indirect = self.allocate_block()?;
        let mut pointers = self.io.empty_block();
        put_u32(&mut pointers, entry * POINTER_SIZE, block);
        if let Err(e) = self.io.write_block(indirect, &pointers) {
            self.rollback(self.free_block(indirect));
            return Err(e);
        }
        inode.indirect[slot] = indirect;
        trace!("inode {} indirect slot {} -> {}", inode.id, slot, indirect);
        Ok(())
    }

    /// Unmaps logical blocks `[keep, content_blocks)` without freeing
    /// anything. The caller persists the inode before handing the detached
    /// blocks back to the bitmap.
    pub(crate) fn detach_blocks(&self, inode: &mut Inode, keep: usize) -> Result<Detached> {
        let count = inode.content_blocks as usize;
        let mut detached = Detached::default();
        if keep >= count {
            return Ok(detached);
        }

        for pointer in inode.direct.iter_mut().take(count).skip(keep) {
            detached.data.push(*pointer);
            *pointer = NULL_POINTER;
        }

        let ppb = self.superblock.pointers_per_block();
        for slot in 0..INDIRECT_POINTERS {
            let first = DIRECT_POINTERS + slot * ppb;
            if first >= count {
                break;
            }
            let last = (first + ppb).min(count);
            if keep >= last {
                continue;
            }
            let indirect = inode.indirect[slot];
            let mut pointers = self.io.read_block(indirect)?;
            let from = keep.saturating_sub(first);
            for entry in from..last - first {
                detached.data.push(u32_at(&pointers, entry * POINTER_SIZE));
                put_u32(&mut pointers, entry * POINTER_SIZE, NULL_POINTER);
            }
            if from == 0 {
                inode.indirect[slot] = NULL_POINTER;
                detached.indirect.push(indirect);
            } else {
                self.io.write_block(indirect, &pointers)?;
            }
        }

        inode.content_blocks = keep as u32;
        Ok(detached)
    }

    /// Shrinks the mapping to `keep` blocks and frees everything past it
    /// straight away. Undoes a failed growth before the inode is written back.
    pub(crate) fn release_blocks(&self, inode: &mut Inode, keep: usize) -> Result<()> {
        let detached = self.detach_blocks(inode, keep)?;
        self.free_detached(detached)
    }

    pub(crate) fn free_detached(&self, detached: Detached) -> Result<()> {
        for block in detached.data.into_iter().chain(detached.indirect) {
            self.free_block(block)?;
        }
        Ok(())
    }

    /// Reads up to `length` bytes at `offset`, clipped to the inode size.
    /// Ranges inside the size that were never allocated read as zeros.
    pub(crate) fn read_data(&self, inode: &Inode, offset: u64, length: usize) -> Result<Vec<u8>> {
        if offset >= inode.size || length == 0 {
            return Ok(Vec::new());
        }
        let end = inode.size.min(offset.saturating_add(length as u64));
        let block_size = self.block_size() as u64;
        let blocks = self.content_blocks(inode)?;

        let mut data = Vec::with_capacity((end - offset) as usize);
        let mut buffer = self.io.empty_block();
        let mut position = offset;
        while position < end {
            let index = (position / block_size) as usize;
            let within = (position % block_size) as usize;
            let chunk = (block_size - within as u64).min(end - position) as usize;
            match blocks.get(index) {
                Some(&block) => {
                    self.io.read_block_into(block, &mut buffer)?;
                    data.extend_from_slice(&buffer[within..within + chunk]);
                }
                None => data.resize(data.len() + chunk, 0),
            }
            position += chunk as u64;
        }
        Ok(data)
    }

    /// Writes `data` at `offset`, allocating every block up to the end of the
    /// write. Blocks allocated here are released again if any step fails.
    pub(crate) fn write_data(&self, inode: &mut Inode, offset: u64, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= self.max_file_size())
            .ok_or(Error::FileTooLarge)?;

        let original_blocks = inode.content_blocks as usize;
        let original_size = inode.size;
        if let Err(e) = self.write_blocks(inode, offset, end, data) {
            self.rollback(self.release_blocks(inode, original_blocks));
            inode.size = original_size;
            return Err(e);
        }
        Ok(data.len())
    }

    fn write_blocks(&self, inode: &mut Inode, offset: u64, end: u64, data: &[u8]) -> Result<()> {
        let block_size = self.block_size() as u64;
        let needed = end.div_ceil(block_size) as usize;
        while (inode.content_blocks as usize) < needed {
            self.append_block(inode)?;
        }
        let blocks = self.content_blocks(inode)?;

        let mut buffer = self.io.empty_block();
        let mut written = 0;
        while written < data.len() {
            let position = offset + written as u64;
            let index = (position / block_size) as usize;
            let within = (position % block_size) as usize;
            let chunk = (block_size as usize - within).min(data.len() - written);
            let block = blocks[index];
            if chunk < block_size as usize {
                self.io.read_block_into(block, &mut buffer)?;
            }
            buffer[within..within + chunk].copy_from_slice(&data[written..written + chunk]);
            self.io.write_block(block, &buffer)?;
            written += chunk;
        }

        inode.size = inode.size.max(end);
        inode.touch();
        self.write_inode(inode)
    }

    /// Sets the content size. Shrinking frees whole blocks past the new end
    /// and zeroes the tail of the last kept block, so a later grow reads
    /// zeros. Growing only moves the size.
    pub(crate) fn truncate_data(&self, inode: &mut Inode, size: u64) -> Result<()> {
        if size > self.max_file_size() {
            return Err(Error::FileTooLarge);
        }
        let mut detached = Detached::default();
        if size < inode.size {
            let block_size = self.block_size() as u64;
            detached = self.detach_blocks(inode, size.div_ceil(block_size) as usize)?;
            let tail = (size % block_size) as usize;
            if tail != 0 {
                let block = self.block_for_offset(inode, size)?;
                if block != NULL_POINTER {
                    let mut buffer = self.io.read_block(block)?;
                    buffer[tail..].fill(0);
                    self.io.write_block(block, &buffer)?;
                }
            }
        }
        inode.size = size;
        inode.touch();
        self.write_inode(inode)?;
        self.free_detached(detached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::ROOT_INODE;
    use crate::inode::Owner;
    use crate::superblock::Geometry;
    use crate::testing::{scratch_fs, small_geometry};
    use crate::util::error::Resource;

    fn new_file<A: DeviceDriver>(fs: &FS<A>, path: &str) -> Inode {
        let stat = fs.create(path, 0o644, Owner::default()).unwrap();
        fs.read_inode(stat.ino).unwrap()
    }

    fn pattern(length: usize) -> Vec<u8> {
        (0..length).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn write_then_read_back() {
        let (_dir, fs) = scratch_fs(small_geometry());
        let mut inode = new_file(&fs, "/data");
        let bytes = pattern(3 * 512 + 100);

        assert_eq!(fs.write_data(&mut inode, 0, &bytes).unwrap(), bytes.len());
        assert_eq!(inode.size, bytes.len() as u64);
        assert_eq!(inode.content_blocks, 4);
        assert_eq!(fs.read_data(&inode, 0, bytes.len()).unwrap(), bytes);
        // clipped at the size
        assert_eq!(fs.read_data(&inode, 1500, 4096).unwrap(), bytes[1500..].to_vec());
        assert!(fs.read_data(&inode, bytes.len() as u64, 10).unwrap().is_empty());

        // unaligned overwrite across a block boundary
        fs.write_data(&mut inode, 500, &[0xAA; 20]).unwrap();
        let mut expected = bytes.clone();
        expected[500..520].fill(0xAA);
        assert_eq!(fs.read_data(&inode, 0, expected.len()).unwrap(), expected);
        assert_eq!(fs.read_inode(inode.id).unwrap(), inode);
    }

    #[test]
    fn write_past_the_end_fills_gap_with_zeros() {
        let (_dir, fs) = scratch_fs(small_geometry());
        let block_size = fs.block_size() as u64;
        let mut inode = new_file(&fs, "/gap");

        fs.write_data(&mut inode, block_size, b"tail").unwrap();
        assert_eq!(inode.size, block_size + 4);
        assert_eq!(inode.content_blocks, 2);
        assert_ne!(fs.block_for_offset(&inode, 0).unwrap(), NULL_POINTER);

        let data = fs.read_data(&inode, 0, inode.size as usize).unwrap();
        assert!(data[..block_size as usize].iter().all(|b| *b == 0));
        assert_eq!(&data[block_size as usize..], b"tail");
    }

    #[test]
    fn grows_into_indirect_blocks() {
        let (_dir, fs) = scratch_fs(small_geometry());
        let block_size = fs.block_size() as usize;
        let mut inode = new_file(&fs, "/big");
        let bytes = pattern(20 * block_size);

        fs.write_data(&mut inode, 0, &bytes).unwrap();
        assert_eq!(inode.content_blocks, 20);
        assert_ne!(inode.indirect[0], NULL_POINTER);
        assert_eq!(inode.indirect[1], NULL_POINTER);

        let blocks = fs.content_blocks(&inode).unwrap();
        assert_eq!(blocks.len(), 20);
        for (index, block) in blocks.iter().enumerate() {
            assert_eq!(fs.block_for_index(&inode, index).unwrap(), *block);
        }
        assert_eq!(fs.block_for_index(&inode, 20).unwrap(), NULL_POINTER);
        assert_eq!(fs.read_data(&inode, 0, bytes.len()).unwrap(), bytes);
    }

    #[test]
    fn exhaustion_rolls_back_new_blocks() {
        let geometry = Geometry { block_size: 512, max_inodes: 16, max_blocks: 32 };
        let (_dir, fs) = scratch_fs(geometry);
        let mut inode = new_file(&fs, "/hog");
        fs.write_data(&mut inode, 0, b"keep").unwrap();
        let free_before = fs.bitmaps.lock().blocks.free_count();
        let before = fs.read_inode(inode.id).unwrap();

        let too_much = pattern(64 * 512);
        let err = fs.write_data(&mut inode, 0, &too_much).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(Resource::DataBlocks)));
        assert_eq!(fs.bitmaps.lock().blocks.free_count(), free_before);
        assert_eq!(inode.content_blocks, 1);
        assert_eq!(inode.size, 4);
        assert_eq!(inode.indirect, before.indirect);
        assert_eq!(fs.read_data(&before, 0, 4).unwrap(), b"keep");
    }

    #[test]
    fn rejects_writes_past_the_pointer_range() {
        let (_dir, fs) = scratch_fs(small_geometry());
        let mut inode = new_file(&fs, "/far");
        let beyond = fs.max_file_size();
        assert!(matches!(fs.write_data(&mut inode, beyond, b"x"), Err(Error::FileTooLarge)));
        assert!(matches!(fs.truncate_data(&mut inode, beyond + 1), Err(Error::FileTooLarge)));
        assert_eq!(inode.content_blocks, 0);
    }

    #[test]
    fn truncate_frees_and_zeroes_the_tail() {
        let (_dir, fs) = scratch_fs(small_geometry());
        let block_size = fs.block_size() as usize;
        let mut inode = new_file(&fs, "/shrink");
        let free_before = fs.bitmaps.lock().blocks.free_count();
        fs.write_data(&mut inode, 0, &pattern(18 * block_size)).unwrap();
        // 18 data blocks and one indirect block
        assert_eq!(fs.bitmaps.lock().blocks.free_count(), free_before - 19);

        fs.truncate_data(&mut inode, 100).unwrap();
        assert_eq!(inode.content_blocks, 1);
        assert_eq!(inode.indirect[0], NULL_POINTER);
        assert_eq!(fs.bitmaps.lock().blocks.free_count(), free_before - 1);

        fs.truncate_data(&mut inode, 300).unwrap();
        let data = fs.read_data(&inode, 0, 300).unwrap();
        assert_eq!(&data[..100], &pattern(100)[..]);
        assert!(data[100..].iter().all(|b| *b == 0));
    }

    #[test]
    fn detached_blocks_stay_allocated_until_freed() {
        let (_dir, fs) = scratch_fs(small_geometry());
        let mut inode = new_file(&fs, "/held");
        fs.write_data(&mut inode, 0, &pattern(18 * 512)).unwrap();
        let free_before = fs.bitmaps.lock().blocks.free_count();
        let indirect = inode.indirect[0];

        let detached = fs.detach_blocks(&mut inode, 2).unwrap();
        assert_eq!(detached.data.len(), 16);
        assert_eq!(detached.indirect, [indirect]);
        assert_eq!(inode.content_blocks, 2);
        assert_eq!(fs.bitmaps.lock().blocks.free_count(), free_before);
        assert!(fs.bitmaps.lock().blocks.is_used(indirect));

        fs.free_detached(detached).unwrap();
        assert_eq!(fs.bitmaps.lock().blocks.free_count(), free_before + 17);
    }

    #[test]
    fn release_returns_every_block() {
        let (_dir, fs) = scratch_fs(small_geometry());
        let mut inode = new_file(&fs, "/gone");
        let free_before = fs.bitmaps.lock().blocks.free_count();
        fs.write_data(&mut inode, 0, &pattern(17 * 512)).unwrap();

        fs.release_blocks(&mut inode, 0).unwrap();
        assert_eq!(inode.content_blocks, 0);
        assert_eq!(inode.direct, [NULL_POINTER; DIRECT_POINTERS]);
        assert_eq!(inode.indirect, [NULL_POINTER; INDIRECT_POINTERS]);
        assert_eq!(fs.bitmaps.lock().blocks.free_count(), free_before);
        assert!(fs.read_inode(ROOT_INODE).unwrap().valid);
    }
}
