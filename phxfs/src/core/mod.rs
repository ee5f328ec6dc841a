// SPDX-License-Identifier: MIT

pub mod anomaly;
pub mod errors;
