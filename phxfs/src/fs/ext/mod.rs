// SPDX-License-Identifier: MIT
pub mod builder;
pub mod checker;
pub mod checksum;
pub mod constant;
pub mod features;
pub mod groups;
pub mod parser;
pub mod types;
pub mod utils;

pub mod prelude {
    pub use super::builder::ExtImageBuilder;
    pub use super::constant::*;
    pub use super::features::*;
    pub use super::parser::{detect, parse, parse_region};
    pub use super::types::*;
    pub use crate::core::errors::*;
    pub use phxio::prelude::*;
}
