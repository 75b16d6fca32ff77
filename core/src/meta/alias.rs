/*
 * alias.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Magma, a multi-protocol mail server.
 *
 * Magma is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Magma is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Magma.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Mailbox alias records.

use crate::index::Multi;

/// One address that delivers into a user's mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaAlias {
    pub aliasnum: u64,
    pub address: String,
    pub display: String,
    pub selected: bool,
    pub created: i64,
}

impl MetaAlias {
    pub fn key(&self) -> Multi {
        Multi::U64(self.aliasnum)
    }
}
