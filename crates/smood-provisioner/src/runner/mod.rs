// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner module - external program execution.

pub mod mock;
pub mod system;
mod traits;

pub use mock::{MockResponse, MockRunner};
pub use system::SystemRunner;
pub use traits::*;
