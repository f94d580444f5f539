pub type ModeBits = u32;

const PERMISSIONS_MASK: ModeBits = 0o777;
const FILE_TYPE_MASK: ModeBits = 0o170000;
const IS_DIR_MASK: ModeBits = 0o040000;
const IS_FILE_MASK: ModeBits = 0o100000;

pub trait ModeBitsHelper {
    fn get_permissions(&self) -> u16;
    fn is_directory(&self) -> bool;
    fn is_file(&self) -> bool;
    /// True when the type bits are unset or name a regular file.
    fn is_plain_file_request(&self) -> bool;
}

impl ModeBitsHelper for ModeBits {
    fn get_permissions(&self) -> u16 {
        (self & PERMISSIONS_MASK) as u16
    }

    fn is_directory(&self) -> bool {
        (self & FILE_TYPE_MASK) == IS_DIR_MASK
    }

    fn is_file(&self) -> bool {
        (self & FILE_TYPE_MASK) == IS_FILE_MASK
    }

    fn is_plain_file_request(&self) -> bool {
        (self & FILE_TYPE_MASK) == 0 || self.is_file()
    }
}
