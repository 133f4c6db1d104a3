// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod db;
pub mod gateway;
pub mod inventory;
pub mod repositories;

pub use gateway::{DispatchGateway, MulticastResults};
