// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! vmn-storage: on-disk layout for per-task directories, the machine
//! state dump, and the `run_errors.json` error container.

mod machine_state;
mod paths;
mod run_errors;
mod sanitize;

pub use machine_state::{DumpError, MachineStateDump};
pub use paths::{TaskPaths, UPLOAD_CATEGORIES};
pub use run_errors::RunErrors;
pub use sanitize::{sanitize_filename, split_category_path, SanitizeError};
