use tempfile::TempDir;

use crate::driver::file_drive::FileDrive;
use crate::fs::FS;
use crate::superblock::Geometry;

/// Two dirents per block and plenty of room for data.
pub(crate) fn small_geometry() -> Geometry {
    Geometry { block_size: 512, max_inodes: 64, max_blocks: 1024 }
}

/// A freshly formatted image in its own temporary directory. Keep the
/// directory alive for as long as the image is used.
pub(crate) fn scratch_fs(geometry: Geometry) -> (TempDir, FS<FileDrive>) {
    let dir = tempfile::tempdir().unwrap();
    let fs = FS::mount(dir.path().join("scratch.img"), geometry).unwrap();
    (dir, fs)
}
