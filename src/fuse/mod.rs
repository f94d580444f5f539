use std::path::Path;

use fuser::MountOption;
use log::info;

use crate::driver::DeviceDriver;
use crate::fs::FS;
use crate::util::error::{Error, Result};

pub mod filesystem;

pub use filesystem::FuseDriver;

#[derive(Debug, Clone, Copy, Default)]
pub struct MountOptions {
    pub allow_other: bool,
    pub auto_unmount: bool,
}

fn build_mount_options(options: &MountOptions) -> Vec<MountOption> {
    let mut opts = vec![
        MountOption::FSName("tinyfs".to_owned()),
        MountOption::DefaultPermissions,
    ];
    if options.allow_other {
        opts.push(MountOption::AllowOther);
    }
    if options.auto_unmount {
        opts.push(MountOption::AutoUnmount);
    }
    opts
}

/// Serves `fs` at `mountpoint`, blocking until the kernel unmounts it.
pub fn mount<A: DeviceDriver + 'static>(
    fs: FS<A>,
    mountpoint: impl AsRef<Path>,
    options: &MountOptions,
) -> Result<()> {
    let mountpoint = mountpoint.as_ref();
    if !mountpoint.is_dir() {
        return Err(Error::invalid(format!(
            "mountpoint {} is not a directory",
            mountpoint.display()
        )));
    }
    info!("mounting at {}", mountpoint.display());
    fuser::mount2(FuseDriver::new(fs), mountpoint, &build_mount_options(options))?;
    info!("{} unmounted", mountpoint.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scratch_fs, small_geometry};

    #[test]
    fn default_options() {
        let opts = build_mount_options(&MountOptions::default());
        assert_eq!(
            opts,
            vec![MountOption::FSName("tinyfs".to_owned()), MountOption::DefaultPermissions]
        );
    }

    #[test]
    fn optional_flags() {
        let opts = build_mount_options(&MountOptions { allow_other: true, auto_unmount: true });
        assert!(opts.contains(&MountOption::AllowOther));
        assert!(opts.contains(&MountOption::AutoUnmount));
    }

    #[test]
    fn refuses_missing_mountpoint() {
        let (dir, fs) = scratch_fs(small_geometry());
        let err = mount(fs, dir.path().join("nowhere"), &MountOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
