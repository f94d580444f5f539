use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::consts::{
    BlockPointer, DirectPointers, IndirectPointers, InodePointer, DIRECT_POINTERS,
    INDIRECT_POINTERS, INODE_SIZE, NULL_POINTER,
};
use crate::util::error::{Error, Result};
use crate::util::serializable::{put_u32, u16_at, u32_at, u64_at, ByteSerializable, KnownSize};

const DIRECT_OFFSET: usize = 60;
const INDIRECT_OFFSET: usize = DIRECT_OFFSET + DIRECT_POINTERS * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    File,
    Directory,
}

impl InodeKind {
    fn to_byte(self) -> u8 {
        match self {
            InodeKind::File => 0,
            InodeKind::Directory => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<InodeKind> {
        match byte {
            0 => Ok(InodeKind::File),
            1 => Ok(InodeKind::Directory),
            other => Err(Error::corrupted(format!("unknown inode kind {}", other))),
        }
    }
}

/// Owner recorded on new inodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

/// The fixed 256-byte inode record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub id: InodePointer,
    pub valid: bool,
    pub kind: InodeKind,
    pub permissions: u16,
    /// Bytes. Directories always hold `content_blocks * block_size`.
    pub size: u64,
    pub links: u32,
    pub owner: Owner,
    /// Logical content blocks in use; pointer slots `[0, content_blocks)` are
    /// populated, everything after is zero.
    pub content_blocks: u32,
    /// Valid slots in a directory, `.` and `..` included.
    pub entries: u32,
    pub accessed_at: SystemTime,
    pub modified_at: SystemTime,
    pub direct: DirectPointers,
    pub indirect: IndirectPointers,
}

impl Inode {
    pub fn new(id: InodePointer, kind: InodeKind, permissions: u16, owner: Owner) -> Inode {
        let now = SystemTime::now();
        Inode {
            id,
            valid: true,
            kind,
            permissions,
            size: 0,
            links: match kind {
                InodeKind::File => 1,
                InodeKind::Directory => 2,
            },
            owner,
            content_blocks: 0,
            entries: 0,
            accessed_at: now,
            modified_at: now,
            direct: [NULL_POINTER; DIRECT_POINTERS],
            indirect: [NULL_POINTER; INDIRECT_POINTERS],
        }
    }

    /// The record left behind once an inode is released.
    pub fn empty(id: InodePointer) -> Inode {
        Inode {
            valid: false,
            links: 0,
            accessed_at: UNIX_EPOCH,
            modified_at: UNIX_EPOCH,
            ..Inode::new(id, InodeKind::File, 0, Owner::default())
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    /// Blocks reported to `stat`: `ceil(size / block_size)`.
    pub fn block_count(&self, block_size: u32) -> u64 {
        self.size.div_ceil(block_size as u64)
    }

    pub fn touch(&mut self) {
        self.modified_at = SystemTime::now();
    }

    fn pointers_to_bytes(pointers: &[BlockPointer], bytes: &mut [u8], offset: usize) {
        for (i, pointer) in pointers.iter().enumerate() {
            put_u32(bytes, offset + i * 4, *pointer);
        }
    }

    fn bytes_to_pointers(bytes: &[u8], offset: usize, pointers: &mut [BlockPointer]) {
        for (i, pointer) in pointers.iter_mut().enumerate() {
            *pointer = u32_at(bytes, offset + i * 4);
        }
    }
}

fn time_to_bytes(time: SystemTime, bytes: &mut [u8], offset: usize) {
    let since_unix = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    bytes[offset..offset + 8].copy_from_slice(&since_unix.as_secs().to_le_bytes());
    put_u32(bytes, offset + 8, since_unix.subsec_nanos());
}

fn time_from_bytes(bytes: &[u8], offset: usize) -> Result<SystemTime> {
    let nanos = u32_at(bytes, offset + 8);
    if nanos >= 1_000_000_000 {
        return Err(Error::corrupted(format!("timestamp nanoseconds {} out of range", nanos)));
    }
    UNIX_EPOCH
        .checked_add(Duration::new(u64_at(bytes, offset), nanos))
        .ok_or_else(|| Error::corrupted("timestamp out of range"))
}

impl KnownSize for Inode {
    #[inline]
    fn size_on_disk() -> usize {
        INODE_SIZE
    }
}

impl ByteSerializable for Inode {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; Self::size_on_disk()];
        put_u32(&mut bytes, 0, self.id);
        bytes[4] = self.valid as u8;
        bytes[5] = self.kind.to_byte();
        bytes[6..8].copy_from_slice(&self.permissions.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.size.to_le_bytes());
        put_u32(&mut bytes, 16, self.links);
        put_u32(&mut bytes, 20, self.owner.uid);
        put_u32(&mut bytes, 24, self.owner.gid);
        put_u32(&mut bytes, 28, self.content_blocks);
        put_u32(&mut bytes, 32, self.entries);
        time_to_bytes(self.accessed_at, &mut bytes, 36);
        time_to_bytes(self.modified_at, &mut bytes, 48);
        Inode::pointers_to_bytes(&self.direct, &mut bytes, DIRECT_OFFSET);
        Inode::pointers_to_bytes(&self.indirect, &mut bytes, INDIRECT_OFFSET);
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::check_length(bytes)?;
        let mut direct = [NULL_POINTER; DIRECT_POINTERS];
        let mut indirect = [NULL_POINTER; INDIRECT_POINTERS];
        Inode::bytes_to_pointers(bytes, DIRECT_OFFSET, &mut direct);
        Inode::bytes_to_pointers(bytes, INDIRECT_OFFSET, &mut indirect);

        Ok(Inode {
            id: u32_at(bytes, 0),
            valid: bytes[4] != 0,
            kind: InodeKind::from_byte(bytes[5])?,
            permissions: u16_at(bytes, 6),
            size: u64_at(bytes, 8),
            links: u32_at(bytes, 16),
            owner: Owner { uid: u32_at(bytes, 20), gid: u32_at(bytes, 24) },
            content_blocks: u32_at(bytes, 28),
            entries: u32_at(bytes, 32),
            accessed_at: time_from_bytes(bytes, 36)?,
            modified_at: time_from_bytes(bytes, 48)?,
            direct,
            indirect,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Inode {
        let mut inode = Inode::new(42, InodeKind::File, 0o644, Owner { uid: 1000, gid: 100 });
        inode.size = 12 * 512 + 7;
        inode.content_blocks = 17;
        inode.direct = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
        inode.indirect = [99, 0, 0, 0, 0, 0, 0, 0];
        inode.accessed_at = UNIX_EPOCH + Duration::new(1_700_000_000, 123);
        inode.modified_at = UNIX_EPOCH + Duration::new(1_700_000_500, 999_999_999);
        inode
    }

    #[test]
    fn test_inode_to_bytes() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes.len(), Inode::size_on_disk());
        assert_eq!(&bytes[0..4], &[42, 0, 0, 0]);
        assert_eq!(bytes[4], 1);
        assert_eq!(bytes[5], 0);
        assert_eq!(u32_at(&bytes, DIRECT_OFFSET), 1);
        assert_eq!(u32_at(&bytes, INDIRECT_OFFSET), 99);
        assert!(bytes[INDIRECT_OFFSET + INDIRECT_POINTERS * 4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_inode_from_bytes() {
        let inode = sample();
        let decoded = Inode::from_bytes(&inode.to_bytes()).unwrap();
        assert_eq!(decoded, inode);
        assert_eq!(decoded.block_count(512), 13);
    }

    #[test]
    fn rejects_short_and_garbled_records() {
        let bytes = sample().to_bytes();
        assert!(matches!(Inode::from_bytes(&bytes[..100]), Err(Error::Corrupted(_))));

        let mut garbled = bytes.clone();
        garbled[5] = 7;
        assert!(matches!(Inode::from_bytes(&garbled), Err(Error::Corrupted(_))));
    }

    #[test]
    fn empty_record_is_invalid() {
        let empty = Inode::empty(5);
        assert!(!empty.valid);
        let decoded = Inode::from_bytes(&empty.to_bytes()).unwrap();
        assert!(!decoded.valid);
        assert_eq!(decoded.id, 5);
    }
}
