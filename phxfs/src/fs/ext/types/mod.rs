// SPDX-License-Identifier: MIT

pub mod bgdt;
pub mod superblock;

pub use bgdt::*;
pub use superblock::*;
