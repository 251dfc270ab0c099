// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! This crate implements the secure messaging and security state core of a simulated eID card,
//! following [ISO 7816-4][iso] secure messaging and the [BSI TR-03110][tr] conventions for
//! PACE, terminal authentication and chip authentication.
//!
//! [iso]: https://www.iso.org/standard/77180.html
//! [tr]: https://www.bsi.bund.de/EN/Themen/Unternehmen-und-Organisationen/Standards-und-Zertifizierung/Technische-Richtlinien/TR-nach-Thema-sortiert/tr03110/tr-03110.html
//!
//! # Security state
//!
//! The [`SecurityContextStore`][`security::SecurityContextStore`] records which
//! [`Mechanism`][`security::Mechanism`]s (results of previously completed security operations,
//! e.g. "PACE succeeded with the CAN") are currently active, partitioned by
//! [`SecurityContext`][`security::SecurityContext`].  Operations are gated by
//! [`AccessCondition`][`security::AccessCondition`]s evaluated against these mechanisms.
//!
//! # Secure messaging
//!
//! The [`SecureChannelCodec`][`sm::SecureChannelCodec`] unwraps protected command APDUs and
//! protects response APDUs using the keys and send sequence counter of a
//! [`ChannelState`][`sm::ChannelState`].  Channel states can be captured in a
//! [`ChannelSnapshot`][`sm::ChannelSnapshot`] to store and restore session contexts.
//!
//! # Command handling
//!
//! The [`Card`] struct is the main entry point for this crate.  It owns the security state and
//! the secure channel of one simulated card session and forwards plaintext commands to an
//! [`Application`] that implements the actual card application (file system, key agreement
//! protocols, ...).  The application reports its security relevant results as [`Update`]s.
//!
//! # Virtual card
//!
//! If the `vpicc` feature is enabled, [`VirtualCard`] can be used to emulate a smart card
//! using [`vsmartcard`](https://frankmorgner.github.io/vsmartcard/) and `vpicc-rs`.

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    non_ascii_idents,
    trivial_casts,
    unused,
    unused_qualifications,
    clippy::expect_used,
    clippy::unwrap_used
)]
#![deny(unsafe_code)]

#[macro_use]
extern crate log;

pub mod apdu;
mod card;
pub mod error;
pub mod security;
pub mod sm;
pub mod tlv;
pub mod types;
mod utils;
#[cfg(feature = "vpicc")]
mod vpicc;

pub use card::{reply::Reply, Application, Card, Context, Options, Update, Updates};
pub use error::Error;
pub use iso7816::Status;
#[cfg(feature = "vpicc")]
pub use vpicc::VirtualCard;
