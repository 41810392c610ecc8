// SPDX-License-Identifier: MIT

mod logger;
mod progress;
mod size;

pub use logger::*;
pub use progress::*;
pub use size::*;
