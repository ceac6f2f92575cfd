// SPDX-License-Identifier: MIT

pub mod libvirt;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;
