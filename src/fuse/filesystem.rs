use std::ffi::OsStr;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};
use libc::c_int;
use log::{debug, error, info, warn};

use crate::consts::{InodePointer, FILE_NAME_LENGTH};
use crate::driver::DeviceDriver;
use crate::fs::FS;
use crate::inode::{InodeKind, Owner};
use crate::ops::Stat;
use crate::util::error::{Error, Result};
use crate::util::format::human_size;
use crate::util::mode::{ModeBits, ModeBitsHelper};

const TTL: Duration = Duration::from_secs(1);

/// `st_blocks` counts 512-byte units whatever the filesystem block size.
const STAT_BLOCK_SIZE: u64 = 512;

/// Kernel inode numbers start at 1 for the root; engine numbers start at 0.
pub(crate) fn fuse_ino(ino: InodePointer) -> u64 {
    ino as u64 + 1
}

pub(crate) fn engine_ino(ino: u64) -> Result<InodePointer> {
    ino.checked_sub(1)
        .and_then(|ino| InodePointer::try_from(ino).ok())
        .ok_or_else(|| Error::invalid(format!("inode {} out of range", ino)))
}

fn file_type(kind: InodeKind) -> FileType {
    match kind {
        InodeKind::File => FileType::RegularFile,
        InodeKind::Directory => FileType::Directory,
    }
}

fn to_file_attr(stat: &Stat) -> FileAttr {
    FileAttr {
        ino: fuse_ino(stat.ino),
        size: stat.size,
        blocks: stat.size.div_ceil(STAT_BLOCK_SIZE),
        atime: stat.accessed_at,
        mtime: stat.modified_at,
        ctime: stat.modified_at,
        crtime: stat.modified_at,
        kind: file_type(stat.kind),
        perm: stat.permissions,
        nlink: stat.links,
        uid: stat.uid,
        gid: stat.gid,
        rdev: 0,
        blksize: stat.block_size,
        flags: 0,
    }
}

fn to_system_time(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(time) => time,
        TimeOrNow::Now => SystemTime::now(),
    }
}

fn owner_of(req: &Request<'_>) -> Owner {
    Owner { uid: req.uid(), gid: req.gid() }
}

/// Kernel-facing adapter over a mounted image. The engine is dropped, and
/// its device flushed, when the kernel tears the session down.
pub struct FuseDriver<A: DeviceDriver> {
    fs: Option<FS<A>>,
}

impl<A: DeviceDriver> FuseDriver<A> {
    pub fn new(fs: FS<A>) -> FuseDriver<A> {
        FuseDriver { fs: Some(fs) }
    }

    /// Runs one engine call, turning its error into a logged errno.
    fn run<T>(
        &self,
        operation: &'static str,
        ino: u64,
        call: impl FnOnce(&FS<A>) -> Result<T>,
    ) -> std::result::Result<T, c_int> {
        let fs = self.fs.as_ref().ok_or_else(|| {
            warn!("{} on inode {} after the image was unmounted", operation, ino);
            libc::EIO
        })?;
        call(fs).map_err(|e| {
            let errno = e.errno();
            if errno == libc::ENOENT {
                debug!("{} on inode {}: {}", operation, ino, e);
            } else {
                warn!("{} on inode {} failed: {}", operation, ino, e);
            }
            errno
        })
    }
}

impl<A: DeviceDriver> Filesystem for FuseDriver<A> {
    fn init(
        &mut self,
        _req: &Request<'_>,
        _config: &mut KernelConfig,
    ) -> std::result::Result<(), c_int> {
        if let Some(fs) = &self.fs {
            let usage = fs.usage();
            let block_size = usage.block_size as u64;
            info!(
                "serving image: {} of {} free, {} of {} inodes free",
                human_size(usage.free_blocks * block_size),
                human_size(usage.total_blocks * block_size),
                usage.free_inodes,
                usage.total_inodes
            );
        }
        Ok(())
    }

    fn destroy(&mut self) {
        if let Some(fs) = self.fs.take() {
            if let Err(e) = fs.unmount() {
                error!("failed to unmount image cleanly: {}", e);
            }
        }
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.run("lookup", parent, |fs| fs.lookup(engine_ino(parent)?, name)) {
            Ok(stat) => reply.entry(&TTL, &to_file_attr(&stat), 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        match self.run("getattr", ino, |fs| fs.stat(engine_ino(ino)?)) {
            Ok(stat) => reply.attr(&TTL, &to_file_attr(&stat)),
            Err(errno) => reply.error(errno),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let result = self.run("setattr", ino, |fs| {
            let ino = engine_ino(ino)?;
            if let Some(mode) = mode {
                fs.set_permissions(ino, mode.get_permissions())?;
            }
            if let Some(size) = size {
                fs.set_size(ino, size)?;
            }
            if atime.is_some() || mtime.is_some() {
                fs.set_times(ino, atime.map(to_system_time), mtime.map(to_system_time))?;
            }
            fs.stat(ino)
        });
        match result {
            Ok(stat) => reply.attr(&TTL, &to_file_attr(&stat)),
            Err(errno) => reply.error(errno),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let permissions = (mode & !umask).get_permissions();
        let result = self.run("mkdir", parent, |fs| {
            fs.make_directory(engine_ino(parent)?, name, permissions, owner_of(req))
        });
        match result {
            Ok(stat) => reply.entry(&TTL, &to_file_attr(&stat), 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.run("unlink", parent, |fs| fs.remove_file(engine_ino(parent)?, name)) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.run("rmdir", parent, |fs| fs.remove_directory(engine_ino(parent)?, name)) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.run("open", ino, |fs| fs.stat(engine_ino(ino)?)) {
            Ok(stat) if stat.kind == InodeKind::Directory => reply.error(libc::EISDIR),
            Ok(_) => reply.opened(0, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let result = self.run("read", ino, |fs| {
            let offset = u64::try_from(offset)
                .map_err(|_| Error::invalid(format!("negative offset {}", offset)))?;
            fs.read_at(engine_ino(ino)?, offset, size as usize)
        });
        match result {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let result = self.run("write", ino, |fs| {
            let offset = u64::try_from(offset)
                .map_err(|_| Error::invalid(format!("negative offset {}", offset)))?;
            fs.write_at(engine_ino(ino)?, offset, data)
        });
        match result {
            Ok(written) => reply.written(written as u32),
            Err(errno) => reply.error(errno),
        }
    }

    fn fsync(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _datasync: bool,
        reply: ReplyEmpty,
    ) {
        match self.run("fsync", ino, |fs| fs.sync()) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.run("opendir", ino, |fs| fs.stat(engine_ino(ino)?)) {
            Ok(stat) if stat.kind == InodeKind::Directory => reply.opened(0, 0),
            Ok(_) => reply.error(libc::ENOTDIR),
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let listing = match self.run("readdir", ino, |fs| fs.list(engine_ino(ino)?)) {
            Ok(listing) => listing,
            Err(errno) => return reply.error(errno),
        };
        let skip = usize::try_from(offset).unwrap_or(0);
        for (index, row) in listing.iter().enumerate().skip(skip) {
            // offset handed back is the one to resume after this row
            if reply.add(fuse_ino(row.ino), (index + 1) as i64, file_type(row.kind), &row.name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        match self.run("statfs", ino, |fs| Ok(fs.usage())) {
            Ok(usage) => reply.statfs(
                usage.total_blocks,
                usage.free_blocks,
                usage.free_blocks,
                usage.total_inodes,
                usage.free_inodes,
                usage.block_size,
                FILE_NAME_LENGTH as u32,
                usage.block_size,
            ),
            Err(errno) => reply.error(errno),
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let mode: ModeBits = mode & !umask;
        let result = self.run("create", parent, |fs| {
            if !mode.is_plain_file_request() {
                return Err(Error::invalid(format!("unsupported file type in mode {:o}", mode)));
            }
            fs.create_file(engine_ino(parent)?, name, mode.get_permissions(), owner_of(req))
        });
        match result {
            Ok(stat) => reply.created(&TTL, &to_file_attr(&stat), 0, 0, 0),
            Err(errno) => reply.error(errno),
        }
    }
}
