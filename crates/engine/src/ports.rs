// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of Warmpool.
//
// Warmpool is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// Warmpool is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with Warmpool. If not, see <https://www.gnu.org/licenses/>.

//! Free TCP port allocation for newly provisioned resources.

use crate::error::{PoolError, PoolResult};

/// Returns TCP ports the OS currently reports free.
///
/// The port is not held between allocation and use, so a fast consumer
/// on the same host can still steal it; creation failures from such
/// races fall through the engine's normal retry-on-next-acquire path.
pub struct PortAllocator;

impl PortAllocator {
    /// Pick a currently unused TCP port.
    pub fn free_port() -> PoolResult<u16> {
        portpicker::pick_unused_port().ok_or(PoolError::PortExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_port_is_nonzero() {
        let port = PortAllocator::free_port().unwrap();
        assert!(port > 0);
    }

    #[test]
    fn test_free_port_is_bindable() {
        let port = PortAllocator::free_port().unwrap();
        std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
    }
}
