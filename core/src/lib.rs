/*
 * lib.rs
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

//! Core library for the magma mail server.
//!
//! Layering, leaves first: the generic [`index`], the [`stacie`] and
//! [`prime`] cryptographic primitives, the [`cache`] client and cluster
//! lock, the [`storage`] statement pool, the [`meta`] user cache, the
//! [`mail`] body store, and finally the [`server`] connection engine with
//! the [`protocol`] state machines on top.

pub mod cache;
pub mod config;
pub mod index;
pub mod mail;
pub mod meta;
pub mod net;
pub mod prime;
pub mod protocol;
pub mod server;
pub mod stacie;
pub mod storage;

pub use config::Config;
pub use server::context::Magma;
