// SPDX-License-Identifier: MIT

// === Superblock ===

// Magic number (in s_magic)
pub const EXT_SUPERBLOCK_MAGIC: u16 = 0xEF53;
pub const EXT_MAGIC_OFFSET: usize = 0x38;

// Superblock size and primary location
pub const EXT_SUPERBLOCK_SIZE: usize = 1024;
pub const EXT_SUPERBLOCK_OFFSET: u64 = 1024;

// s_checksum sits in the last 4 bytes and covers everything before it
pub const EXT_SB_CHECKSUM_OFFSET: usize = 0x3FC;

// s_checksum_type values
pub const EXT_CHECKSUM_TYPE_CRC32C: u8 = 1;

// === Block Size ===

pub const EXT_MIN_BLOCK_SIZE: u32 = 1024;
pub const EXT_MAX_BLOCK_SIZE: u32 = 65536;
pub const EXT_MIN_BLOCK_LOG_SIZE: u32 = 10;

// Largest s_log_block_size that still fits a u32 block size
pub const EXT_MAX_REPRESENTABLE_LOG: u32 = 21;

// === Revisions ===

pub const EXT_GOOD_OLD_REV: u32 = 0;
pub const EXT_DYNAMIC_REV: u32 = 1;

// === Inode ===

pub const EXT_GOOD_OLD_INODE_SIZE: u16 = 128;
pub const EXT_GOOD_OLD_FIRST_INO: u32 = 11;

// === Group descriptors ===

pub const EXT_MIN_DESC_SIZE: u16 = 32;
pub const EXT_MIN_DESC_SIZE_64BIT: u16 = 64;
pub const EXT_MAX_DESC_SIZE: u16 = 1024;

// bg_checksum offset inside a descriptor
pub const EXT_BG_CHECKSUM_OFFSET: usize = 0x1E;

// Blocks per group never exceed the bits of one bitmap block
pub const EXT_BITS_PER_BYTE: u64 = 8;

// === Creator OS ===

pub const EXT_OS_LINUX: u32 = 0;
pub const EXT_OS_HURD: u32 = 1;
pub const EXT_OS_MASIX: u32 = 2;
pub const EXT_OS_FREEBSD: u32 = 3;
pub const EXT_OS_LITES: u32 = 4;

pub fn creator_os_name(os: u32) -> &'static str {
    match os {
        EXT_OS_LINUX => "Linux",
        EXT_OS_HURD => "Hurd",
        EXT_OS_MASIX => "Masix",
        EXT_OS_FREEBSD => "FreeBSD",
        EXT_OS_LITES => "Lites",
        _ => "unknown",
    }
}

// === s_errors ===

pub const EXT_ERRORS_CONTINUE: u16 = 1;
pub const EXT_ERRORS_RO: u16 = 2;
pub const EXT_ERRORS_PANIC: u16 = 3;

// === Fallback probing ===

// Blocks per group assumed by mke2fs for a given block size
pub const fn default_blocks_per_group(block_size: u32) -> u64 {
    block_size as u64 * EXT_BITS_PER_BYTE
}
