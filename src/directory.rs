use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

use log::debug;

use crate::consts::{BlockPointer, InodePointer, DIRENT_SIZE, FILE_NAME_LENGTH};
use crate::driver::DeviceDriver;
use crate::fs::FS;
use crate::inode::Inode;
use crate::util::error::{Error, Result};
use crate::util::serializable::{put_u32, u32_at, ByteSerializable, KnownSize};

const VALID_OFFSET: usize = 4;
const NAME_OFFSET: usize = 8;

/// One 256-byte directory slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: InodePointer,
    pub valid: bool,
    pub name: OsString,
}

impl DirEntry {
    pub fn new(ino: InodePointer, name: &OsStr) -> DirEntry {
        DirEntry { ino, valid: true, name: name.to_os_string() }
    }

    fn matches(&self, name: &OsStr) -> bool {
        self.valid && self.name.as_os_str() == name
    }

    /// `.` or `..`
    pub fn is_dot(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

impl KnownSize for DirEntry {
    fn size_on_disk() -> usize {
        DIRENT_SIZE
    }
}

impl ByteSerializable for DirEntry {
    fn to_bytes(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let mut bytes = vec![0u8; Self::size_on_disk()];
        put_u32(&mut bytes, 0, self.ino);
        bytes[VALID_OFFSET] = self.valid as u8;
        bytes[VALID_OFFSET + 1] = name.len() as u8;
        bytes[NAME_OFFSET..NAME_OFFSET + name.len()].copy_from_slice(name);
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::check_length(bytes)?;
        let name_len = bytes[VALID_OFFSET + 1] as usize;
        if name_len > FILE_NAME_LENGTH {
            return Err(Error::corrupted(format!("directory entry name length {}", name_len)));
        }
        Ok(DirEntry {
            ino: u32_at(bytes, 0),
            valid: bytes[VALID_OFFSET] != 0,
            name: OsString::from_vec(bytes[NAME_OFFSET..NAME_OFFSET + name_len].to_vec()),
        })
    }
}

/// Rejects names that cannot be stored in a slot or would break path parsing.
pub fn check_name(name: &OsStr) -> Result<()> {
    let bytes = name.as_bytes();
    if bytes.len() > FILE_NAME_LENGTH {
        return Err(Error::NameTooLong);
    }
    if bytes.is_empty() || bytes.contains(&b'/') || bytes.contains(&0) {
        return Err(Error::invalid(format!("invalid entry name {:?}", name)));
    }
    Ok(())
}

fn slots(block: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    block.chunks_exact(DIRENT_SIZE).enumerate()
}

fn write_slot(block: &mut [u8], slot: usize, entry: &DirEntry) {
    block[slot * DIRENT_SIZE..(slot + 1) * DIRENT_SIZE].copy_from_slice(&entry.to_bytes());
}

fn clear_slot(block: &mut [u8], slot: usize) {
    block[slot * DIRENT_SIZE..(slot + 1) * DIRENT_SIZE].fill(0);
}

fn slot_in_use(raw: &[u8]) -> bool {
    raw[VALID_OFFSET] != 0
}

struct Located {
    logical: usize,
    block: BlockPointer,
    data: Vec<u8>,
    slot: usize,
}

enum Placement {
    Reused(Located),
    Appended { original_blocks: usize },
}

impl<A: DeviceDriver> FS<A> {
    fn check_directory(&self, dir: &Inode) -> Result<()> {
        if !dir.is_dir() {
            return Err(Error::NotADirectory);
        }
        Ok(())
    }

    /// Visits the directory's content blocks in logical order until `visit`
    /// returns something.
    fn scan<T>(
        &self,
        dir: &Inode,
        mut visit: impl FnMut(usize, BlockPointer, &[u8]) -> Result<Option<T>>,
    ) -> Result<Option<T>> {
        let mut buffer = self.io.empty_block();
        for (logical, block) in self.content_blocks(dir)?.into_iter().enumerate() {
            self.io.read_block_into(block, &mut buffer)?;
            if let Some(found) = visit(logical, block, &buffer)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn locate_entry(&self, dir: &Inode, name: &OsStr) -> Result<Option<(Located, DirEntry)>> {
        self.scan(dir, |logical, block, data| {
            for (slot, raw) in slots(data) {
                if !slot_in_use(raw) {
                    continue;
                }
                let entry = DirEntry::from_bytes(raw)?;
                if entry.matches(name) {
                    let located = Located { logical, block, data: data.to_vec(), slot };
                    return Ok(Some((located, entry)));
                }
            }
            Ok(None)
        })
    }

    pub fn find_entry(&self, dir: &Inode, name: &OsStr) -> Result<DirEntry> {
        self.check_directory(dir)?;
        self.locate_entry(dir, name)?
            .map(|(_, entry)| entry)
            .ok_or(Error::NotFound)
    }

    pub fn contains_entry(&self, dir: &Inode, name: &OsStr) -> Result<bool> {
        self.check_directory(dir)?;
        Ok(self.locate_entry(dir, name)?.is_some())
    }

    /// Live entries in slot order, `.` and `..` included.
    pub fn list_entries(&self, dir: &Inode) -> Result<Vec<DirEntry>> {
        self.check_directory(dir)?;
        let mut entries = Vec::new();
        self.scan::<()>(dir, |_, _, data| {
            for (_, raw) in slots(data) {
                if slot_in_use(raw) {
                    entries.push(DirEntry::from_bytes(raw)?);
                }
            }
            Ok(None)
        })?;
        Ok(entries)
    }

    /// Adds `name -> child`, reusing the first free slot or appending a block.
    /// The directory inode is persisted. A duplicate name fails before
    /// anything is allocated.
    pub fn insert_entry(&self, dir: &mut Inode, child: InodePointer, name: &OsStr) -> Result<()> {
        self.check_directory(dir)?;
        check_name(name)?;
        if self.contains_entry(dir, name)? {
            return Err(Error::AlreadyExists);
        }
        let entry = DirEntry::new(child, name);

        let free = self.scan(dir, |logical, block, data| {
            Ok(slots(data).find(|(_, raw)| !slot_in_use(raw)).map(|(slot, _)| Located {
                logical,
                block,
                data: data.to_vec(),
                slot,
            }))
        })?;

        let placement = match free {
            Some(mut located) => {
                write_slot(&mut located.data, located.slot, &entry);
                self.io.write_block(located.block, &located.data)?;
                Placement::Reused(located)
            }
            None => {
                let original_blocks = dir.content_blocks as usize;
                let block = self.append_block(dir)?;
                let mut data = self.io.empty_block();
                write_slot(&mut data, 0, &entry);
                if let Err(e) = self.io.write_block(block, &data) {
                    self.rollback(self.release_blocks(dir, original_blocks));
                    return Err(e);
                }
                dir.size = dir.content_blocks as u64 * self.block_size() as u64;
                debug!("directory {} grew to {} blocks", dir.id, dir.content_blocks);
                Placement::Appended { original_blocks }
            }
        };

        dir.entries += 1;
        dir.touch();
        if let Err(e) = self.write_inode(dir) {
            dir.entries -= 1;
            match placement {
                Placement::Reused(mut located) => {
                    clear_slot(&mut located.data, located.slot);
                    self.rollback(self.io.write_block(located.block, &located.data));
                }
                Placement::Appended { original_blocks } => {
                    self.rollback(self.release_blocks(dir, original_blocks));
                    dir.size = dir.content_blocks as u64 * self.block_size() as u64;
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Invalidates the entry for `name` and persists the directory inode.
    ///
    /// A content block other than the first that ends up with no live slots
    /// is released: the last content block's pointer takes its logical slot,
    /// so the mapping stays contiguous.
    pub fn remove_entry(&self, dir: &mut Inode, name: &OsStr) -> Result<DirEntry> {
        self.check_directory(dir)?;
        let (mut located, entry) = self.locate_entry(dir, name)?.ok_or(Error::NotFound)?;
        clear_slot(&mut located.data, located.slot);

        let emptied = located.logical != 0
            && !slots(&located.data).any(|(_, raw)| slot_in_use(raw));
        let mut released = Vec::new();
        if emptied {
            let last = dir.content_blocks as usize - 1;
            if located.logical != last {
                let moved = self.block_for_index(dir, last)?;
                self.set_pointer(dir, located.logical, moved)?;
            }
            // the last data pointer now lives at `located.logical`
            released = self.detach_blocks(dir, last)?.indirect;
            released.push(located.block);
            dir.size = dir.content_blocks as u64 * self.block_size() as u64;
            debug!(
                "directory {} released block {}, {} blocks left",
                dir.id, located.block, dir.content_blocks
            );
        } else {
            self.io.write_block(located.block, &located.data)?;
        }

        dir.entries = dir.entries.saturating_sub(1);
        dir.touch();
        self.write_inode(dir)?;
        for block in released {
            self.free_block(block)?;
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{NULL_POINTER, ROOT_INODE};
    use crate::superblock::Geometry;
    use crate::testing::{scratch_fs, small_geometry};

    fn os(name: &str) -> &OsStr {
        OsStr::new(name)
    }

    #[test]
    fn entry_layout() {
        let entry = DirEntry::new(9, os("notes.txt"));
        let bytes = entry.to_bytes();
        assert_eq!(bytes.len(), DIRENT_SIZE);
        assert_eq!(u32_at(&bytes, 0), 9);
        assert_eq!(bytes[VALID_OFFSET], 1);
        assert_eq!(bytes[VALID_OFFSET + 1], 9);
        assert_eq!(&bytes[NAME_OFFSET..NAME_OFFSET + 9], b"notes.txt");
        assert_eq!(DirEntry::from_bytes(&bytes).unwrap(), entry);

        let mut garbled = bytes;
        garbled[VALID_OFFSET + 1] = 255;
        assert!(matches!(DirEntry::from_bytes(&garbled), Err(Error::Corrupted(_))));
    }

    #[test]
    fn name_rules() {
        assert!(check_name(os("a")).is_ok());
        assert!(check_name(OsStr::from_bytes(&[b'x'; FILE_NAME_LENGTH])).is_ok());
        assert!(matches!(
            check_name(OsStr::from_bytes(&[b'x'; FILE_NAME_LENGTH + 1])),
            Err(Error::NameTooLong)
        ));
        assert!(matches!(check_name(os("")), Err(Error::InvalidArgument(_))));
        assert!(matches!(check_name(os("a/b")), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn insert_and_find() {
        let (_dir, fs) = scratch_fs(small_geometry());
        let mut root = fs.read_inode(ROOT_INODE).unwrap();
        fs.insert_entry(&mut root, 5, os("five")).unwrap();
        fs.insert_entry(&mut root, 6, os("six")).unwrap();

        assert_eq!(fs.find_entry(&root, os("five")).unwrap().ino, 5);
        assert_eq!(fs.find_entry(&root, os("six")).unwrap().ino, 6);
        assert!(matches!(fs.find_entry(&root, os("seven")), Err(Error::NotFound)));
        assert_eq!(root.entries, 4);
        assert_eq!(fs.read_inode(ROOT_INODE).unwrap(), root);

        let names: Vec<_> = fs.list_entries(&root).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, [".", "..", "five", "six"]);
    }

    #[test]
    fn duplicate_leaves_directory_untouched() {
        let (_dir, fs) = scratch_fs(small_geometry());
        let mut root = fs.read_inode(ROOT_INODE).unwrap();
        fs.insert_entry(&mut root, 3, os("twice")).unwrap();
        let before = fs.read_inode(ROOT_INODE).unwrap();
        let free_before = fs.bitmaps.lock().blocks.free_count();

        assert!(matches!(fs.insert_entry(&mut root, 4, os("twice")), Err(Error::AlreadyExists)));
        assert_eq!(fs.read_inode(ROOT_INODE).unwrap(), before);
        assert_eq!(fs.bitmaps.lock().blocks.free_count(), free_before);
        assert_eq!(fs.find_entry(&root, os("twice")).unwrap().ino, 3);
    }

    #[test]
    fn removal_frees_slot_for_reuse() {
        let (_dir, fs) = scratch_fs(small_geometry());
        let mut root = fs.read_inode(ROOT_INODE).unwrap();
        fs.insert_entry(&mut root, 3, os("a")).unwrap();
        fs.insert_entry(&mut root, 4, os("b")).unwrap();

        assert_eq!(fs.remove_entry(&mut root, os("a")).unwrap().ino, 3);
        assert!(!fs.contains_entry(&root, os("a")).unwrap());
        assert!(matches!(fs.remove_entry(&mut root, os("a")), Err(Error::NotFound)));

        fs.insert_entry(&mut root, 5, os("c")).unwrap();
        let names: Vec<_> = fs.list_entries(&root).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, [".", "..", "c", "b"]);
        // `.` and `..` fill block 0, so `a` and `b` went to a second block
        assert_eq!(root.content_blocks, 2);
    }

    #[test]
    fn listing_ignores_garbled_entry_counter() {
        let (_dir, fs) = scratch_fs(small_geometry());
        let mut root = fs.read_inode(ROOT_INODE).unwrap();
        root.entries = u32::MAX;
        fs.write_inode(&root).unwrap();

        let root = fs.read_inode(ROOT_INODE).unwrap();
        let names: Vec<_> = fs.list_entries(&root).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, [".", ".."]);
    }

    #[test]
    fn grows_past_direct_pointers_and_compacts() {
        // one slot per block
        let geometry = Geometry { block_size: 256, max_inodes: 64, max_blocks: 128 };
        let (_dir, fs) = scratch_fs(geometry);
        let free_before = fs.bitmaps.lock().blocks.free_count();
        let mut root = fs.read_inode(ROOT_INODE).unwrap();

        for i in 0..20 {
            fs.insert_entry(&mut root, i + 1, OsString::from(format!("f{}", i)).as_os_str())
                .unwrap();
        }
        assert_eq!(root.content_blocks, 22);
        assert_eq!(root.size, 22 * 256);
        assert_ne!(root.indirect[0], NULL_POINTER);
        // 20 blocks and the indirect block
        assert_eq!(fs.bitmaps.lock().blocks.free_count(), free_before - 21);
        for i in 0..20 {
            let name = OsString::from(format!("f{}", i));
            assert_eq!(fs.find_entry(&root, &name).unwrap().ino, i + 1);
        }

        // the emptied block takes the last block's pointer
        let last = fs.block_for_index(&root, 21).unwrap();
        fs.remove_entry(&mut root, os("f3")).unwrap();
        assert_eq!(root.content_blocks, 21);
        assert_eq!(fs.block_for_index(&root, 5).unwrap(), last);
        assert_eq!(fs.find_entry(&root, os("f19")).unwrap().ino, 20);

        for i in (0..20).filter(|i| *i != 3) {
            fs.remove_entry(&mut root, OsString::from(format!("f{}", i)).as_os_str()).unwrap();
        }
        assert_eq!(root.content_blocks, 2);
        assert_eq!(root.entries, 2);
        assert_eq!(root.indirect[0], NULL_POINTER);
        assert_eq!(fs.bitmaps.lock().blocks.free_count(), free_before);
        assert_eq!(fs.read_inode(ROOT_INODE).unwrap(), root);
    }

    #[test]
    fn rejects_non_directories() {
        let (_dir, fs) = scratch_fs(small_geometry());
        let stat = fs.create("/plain", 0o644, Default::default()).unwrap();
        let mut file = fs.read_inode(stat.ino).unwrap();
        assert!(matches!(fs.find_entry(&file, os("x")), Err(Error::NotADirectory)));
        assert!(matches!(fs.insert_entry(&mut file, 1, os("x")), Err(Error::NotADirectory)));
    }
}
