// SPDX-License-Identifier: MIT

/// ext2 / ext3 / ext4 family.
pub mod ext;
