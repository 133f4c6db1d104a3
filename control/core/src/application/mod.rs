// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod lifecycle;
pub mod pusher;

pub use lifecycle::{NodeLifecycleService, StandardNodeLifecycleService};
pub use pusher::{Pusher, StandardPusher};
