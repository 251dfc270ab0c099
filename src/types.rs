// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Common types shared by the security state and the card

use bitflags::bitflags;
use hex_literal::hex;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use iso7816::Status;

/// Creates an enum with an `iter_all` associated function giving an iterator over all variants
macro_rules! iterable_enum {
    (
        $(#[$outer:meta])*
        $vis:vis enum $name:ident {
            $($(#[$attr:meta])* $var:ident),+
            $(,)*
        }
    ) => {
        $(#[$outer])*
        $vis enum $name {
            $(
                $(#[$attr])*
                $var,
            )*
        }

        #[allow(unused)]
        impl $name {
            /// Iterates over all variants in declaration order
            $vis fn iter_all() -> impl Iterator<Item = Self> {
                [
                    $(
                        $name::$var,
                    )*
                ].into_iter()
            }
        }
    }
}

pub(crate) use iterable_enum;

macro_rules! enum_u8 {
    (
        $(#[$outer:meta])*
        $vis:vis enum $name:ident {
            $($(#[$attr:meta])* $var:ident = $num:expr),+
            $(,)*
        }
    ) => {
        $(#[$outer])*
        #[repr(u8)]
        $vis enum $name {
            $(
                $(#[$attr])*
                $var = $num,
            )*
        }

        impl TryFrom<u8> for $name {
            type Error = Status;
            fn try_from(val: u8) -> ::core::result::Result<Self, Status> {
                match val {
                    $(
                        $num => Ok($name::$var),
                    )*
                    _ => Err(Status::KeyReferenceNotFound)
                }
            }
        }
    }
}

enum_u8! {
    /// Password references of PACE, see BSI TR-03110-3 § D.2.1.2
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize_repr, Deserialize_repr)]
    pub enum PasswordRef {
        /// Machine readable zone
        Mrz = 0x01,
        /// Card access number
        Can = 0x02,
        /// Personal identification number
        Pin = 0x03,
        /// PIN unblocking key
        Puk = 0x04,
    }
}

enum_u8! {
    /// Life cycle status byte, see ISO 7816-4 § 7.4.10
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize_repr, Deserialize_repr)]
    pub enum LifeCycle {
        /// Creation state
        Creation = 0x01,
        /// Initialisation state
        Initialisation = 0x03,
        /// Operational state (activated)
        OperationalActivated = 0x05,
        /// Operational state (deactivated)
        OperationalDeactivated = 0x04,
        /// Termination state
        Termination = 0x0C,
    }
}

impl LifeCycle {
    /// Access conditions are only enforced once an object is operational.
    pub fn grants_access(self) -> bool {
        matches!(self, Self::Creation | Self::Initialisation)
    }
}

const ID_ROLES_IS: &[u8] = &hex!("04 00 7F 00 07 03 01 02 01");
const ID_ROLES_AT: &[u8] = &hex!("04 00 7F 00 07 03 01 02 02");
const ID_ROLES_ST: &[u8] = &hex!("04 00 7F 00 07 03 01 02 03");

iterable_enum! {
    /// Terminal types of the extended access control, see BSI TR-03110-3 § C.4
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
    pub enum TerminalType {
        /// Inspection system (`id-IS`)
        InspectionSystem,
        /// Authentication terminal (`id-AT`)
        AuthenticationTerminal,
        /// Signature terminal (`id-ST`)
        SignatureTerminal,
    }
}

impl TerminalType {
    /// Returns the DER encoded content of the object identifier of the terminal type
    pub fn oid(&self) -> &'static [u8] {
        match self {
            Self::InspectionSystem => ID_ROLES_IS,
            Self::AuthenticationTerminal => ID_ROLES_AT,
            Self::SignatureTerminal => ID_ROLES_ST,
        }
    }

    /// Looks up the terminal type identified by a DER encoded object identifier
    pub fn from_oid(oid: &[u8]) -> Option<Self> {
        Self::iter_all().find(|t| t.oid() == oid)
    }
}

bitflags! {
    /// Relative authorization of a terminal, see BSI TR-03110-4 § 2.2.3.2
    ///
    /// The named flags are the access rights of authentication terminals.  Other terminal types
    /// use the same bit positions with their own meaning.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Authorization: u64 {
        /// Age verification
        const AGE_VERIFICATION = 1;
        /// Community ID verification
        const COMMUNITY_ID_VERIFICATION = 1 << 1;
        /// Restricted identification
        const RESTRICTED_IDENTIFICATION = 1 << 2;
        /// Privileged terminal
        const PRIVILEGED_TERMINAL = 1 << 3;
        /// CAN allowed
        const CAN_ALLOWED = 1 << 4;
        /// PIN management
        const PIN_MANAGEMENT = 1 << 5;
        /// Install certificate
        const INSTALL_CERTIFICATE = 1 << 6;
        /// Install qualified certificate
        const INSTALL_QUALIFIED_CERTIFICATE = 1 << 7;
        /// Read access to DG 1
        const READ_DG01 = 1 << 8;
        /// Read access to DG 2
        const READ_DG02 = 1 << 9;
        /// Read access to DG 3
        const READ_DG03 = 1 << 10;
        /// Read access to DG 4
        const READ_DG04 = 1 << 11;
        /// Write access to DG 17
        const WRITE_DG17 = 1 << 37;
        /// Write access to DG 18
        const WRITE_DG18 = 1 << 36;
        /// Write access to DG 19
        const WRITE_DG19 = 1 << 35;
        /// Write access to DG 20
        const WRITE_DG20 = 1 << 34;
        /// Write access to DG 21
        const WRITE_DG21 = 1 << 33;
        /// Write access to DG 22
        const WRITE_DG22 = 1 << 32;
        /// Role bits of the certificate
        const ROLE = 0b11 << 38;
    }
}

impl Authorization {
    /// Parses the big endian relative authorization of a certificate holder authorization
    /// template.  Returns `None` if it is longer than 8 bytes.
    pub fn from_relative_authorization(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > 8 {
            return None;
        }
        let mut buf = [0; 8];
        buf[8 - bytes.len()..].copy_from_slice(bytes);
        Some(Self::from_bits_retain(u64::from_be_bytes(buf)))
    }

    /// Returns `true` if the bit at position `bit` (counted from the least significant bit) is
    /// set.  Bits outside of the representable range are never set.
    pub fn has_bit(&self, bit: u8) -> bool {
        1u64.checked_shl(u32::from(bit))
            .map(|mask| self.bits() & mask != 0)
            .unwrap_or(false)
    }
}
