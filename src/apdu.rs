// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Command and response APDUs, see ISO 7816-3 § 12.1 and ISO 7816-4 § 5.1
//!
//! Commands are [`iso7816::Command`]s.  This module adds the conversions the secure messaging
//! layer needs: building a command from its parts, serializing it again and a response type
//! carrying both the body and the status word.

use iso7816::command::{
    class::{Class, SecureMessaging},
    CommandBuilder, ExpectedLen, FromSliceError,
};
use iso7816::Status;

/// Capacity of the data field of a [`CommandApdu`]
pub const COMMAND_SIZE: usize = 7609;

/// Bits of the class byte that indicate secure messaging with an authenticated header
pub const SM_CLASS_BITS: u8 = 0x0C;

/// Largest expected length, coded as `0000` in an extended `Le` field
const MAX_LE: usize = 0x10000;

/// A command APDU.  [`iso7816::Command::expected`] is zero if no response data is expected.
pub type CommandApdu = iso7816::Command<COMMAND_SIZE>;

fn parse_error(err: FromSliceError) -> Status {
    match err {
        FromSliceError::InvalidClass => Status::ClassNotSupported,
        _ => Status::WrongLength,
    }
}

fn expected_len(le: usize) -> ExpectedLen {
    match u16::try_from(le) {
        Ok(le) => ExpectedLen::Ne(le),
        Err(_) => ExpectedLen::Max,
    }
}

/// Parses a serialized command APDU
pub fn parse(apdu: &[u8]) -> Result<CommandApdu, Status> {
    CommandApdu::try_from(apdu).map_err(parse_error)
}

/// Builds a command APDU from its header, data field and expected length (zero if no response
/// data is expected, at most 65536).  `extended` forces the extended length encoding.
pub fn build(
    header: [u8; 4],
    data: &[u8],
    le: usize,
    extended: bool,
) -> Result<CommandApdu, Status> {
    let [class, instruction, p1, p2] = header;
    let class = Class::try_from(class).map_err(|_| Status::ClassNotSupported)?;
    if data.len() > COMMAND_SIZE || le > MAX_LE {
        return Err(Status::WrongLength);
    }
    let mut builder =
        CommandBuilder::new(class, instruction.into(), p1, p2, data, expected_len(le));
    if extended {
        builder = builder.force_extended();
    }
    parse(&builder.serialize_to_vec())
}

/// Secure messaging view of a [`CommandApdu`]
pub trait CommandExt {
    /// `CLA INS P1 P2`
    fn header(&self) -> [u8; 4];

    /// Returns `true` if the class byte indicates secure messaging with an authenticated header
    fn is_secured(&self) -> bool;

    /// Serializes the command, keeping its length encoding
    fn to_bytes(&self) -> Vec<u8>;
}

impl CommandExt for CommandApdu {
    fn header(&self) -> [u8; 4] {
        [
            self.class().into_inner(),
            self.instruction().into(),
            self.p1,
            self.p2,
        ]
    }

    fn is_secured(&self) -> bool {
        self.class().secure_messaging() == SecureMessaging::Authenticated
    }

    fn to_bytes(&self) -> Vec<u8> {
        let builder = CommandBuilder::new(
            self.class(),
            self.instruction(),
            self.p1,
            self.p2,
            self.data().as_slice(),
            expected_len(self.expected()),
        );
        if self.extended {
            builder.force_extended().serialize_to_vec()
        } else {
            builder.serialize_to_vec()
        }
    }
}

/// A response APDU
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResponseApdu {
    /// The response data field
    pub data: Vec<u8>,
    /// The status word
    pub status: Status,
}

impl ResponseApdu {
    /// Creates a response with data
    pub fn new(data: impl Into<Vec<u8>>, status: Status) -> Self {
        Self {
            data: data.into(),
            status,
        }
    }

    /// Serializes the response as `data || SW1 SW2`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.data.len() + 2);
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&<[u8; 2]>::from(self.status));
        buf
    }
}

impl From<Status> for ResponseApdu {
    fn from(status: Status) -> Self {
        Self {
            data: Vec::new(),
            status,
        }
    }
}

impl TryFrom<&[u8]> for ResponseApdu {
    type Error = Status;

    fn try_from(apdu: &[u8]) -> Result<Self, Status> {
        if apdu.len() < 2 {
            return Err(Status::WrongLength);
        }
        let (data, sw) = apdu.split_at(apdu.len() - 2);
        Ok(Self {
            data: data.into(),
            status: Status::from([sw[0], sw[1]]),
        })
    }
}
