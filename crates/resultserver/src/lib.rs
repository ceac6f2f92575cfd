// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! The Result Server: accepts `FILE`/`SCREENSHOT` uploads from guest
//! agents over TCP, gated by a per-IP task mapping table maintained
//! through a unix control socket.

mod mapping;
mod protocol;
mod server;

pub use mapping::{TaskMapping, TaskMappingTable};
pub use protocol::{
    handle_file_upload, handle_screenshot_upload, read_protocol_header, Protocol,
    FILE_MAX_BYTES, SCREENSHOT_MAX_BYTES,
};
pub use server::ResultServer;
