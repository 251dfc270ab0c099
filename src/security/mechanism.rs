// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use serde::{Deserialize, Serialize};

use crate::sm::crypto::Cipher;
use crate::types::{iterable_enum, Authorization, PasswordRef, TerminalType};

/// Maximum length of an ephemeral public key of the terminal (uncompressed P-256 point)
pub const MAX_EPHEMERAL_KEY_LEN: usize = 65;
/// Maximum length of a certificate holder reference
pub const MAX_CHR_LEN: usize = 16;

/// Events that invalidate mechanisms
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SecurityEvent {
    /// The secure channel was torn down
    ChannelEnded,
    /// The session context is stored for later use
    StoreSession,
    /// A previously stored session context is restored
    RestoreSession,
}

iterable_enum! {
    /// The kind of a [`Mechanism`]
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
    pub enum MechanismKind {
        /// [`Mechanism::Pace`]
        Pace,
        /// [`Mechanism::PasswordUsed`]
        PasswordUsed,
        /// [`Mechanism::SecureMessaging`]
        SecureMessaging,
        /// [`Mechanism::TerminalAuthentication`]
        TerminalAuthentication,
        /// [`Mechanism::EffectiveAuthorization`]
        EffectiveAuthorization,
        /// [`Mechanism::ChipAuthentication`]
        ChipAuthentication,
        /// [`Mechanism::CertificateHolderReference`]
        CertificateHolderReference,
    }
}

/// Result of a previously completed security operation.
///
/// Mechanisms are created by the protocol implementations of the card application and stored in
/// the [`SecurityContextStore`][`super::SecurityContextStore`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Mechanism {
    /// PACE was performed with the given password
    Pace {
        /// The password used for the key agreement
        password: PasswordRef,
        /// The terminal type requested in the certificate holder authorization template
        terminal_type: Option<TerminalType>,
    },
    /// A password was successfully used
    PasswordUsed {
        /// The password reference
        password: PasswordRef,
    },
    /// A secure channel is established
    SecureMessaging {
        /// The cipher suite of the channel
        cipher: Cipher,
    },
    /// Terminal authentication succeeded
    TerminalAuthentication {
        /// The type of the authenticated terminal
        terminal_type: TerminalType,
        /// Compressed ephemeral public key of the terminal, checked by chip authentication
        #[serde(with = "crate::utils::serde_bytes_heapless")]
        ephemeral_key: heapless::Vec<u8, MAX_EPHEMERAL_KEY_LEN>,
    },
    /// Effective access rights of the authenticated terminal
    EffectiveAuthorization {
        /// The terminal type the rights apply to
        terminal_type: TerminalType,
        /// The granted rights
        authorization: Authorization,
    },
    /// Chip authentication succeeded
    ChipAuthentication {
        /// Protocol version
        version: u8,
    },
    /// Holder reference of the last verified certificate of the terminal authentication chain
    CertificateHolderReference {
        /// The certificate holder reference
        #[serde(with = "crate::utils::serde_bytes_heapless")]
        chr: heapless::Vec<u8, MAX_CHR_LEN>,
    },
}

impl Mechanism {
    /// Returns the kind of the mechanism
    pub fn kind(&self) -> MechanismKind {
        match self {
            Self::Pace { .. } => MechanismKind::Pace,
            Self::PasswordUsed { .. } => MechanismKind::PasswordUsed,
            Self::SecureMessaging { .. } => MechanismKind::SecureMessaging,
            Self::TerminalAuthentication { .. } => MechanismKind::TerminalAuthentication,
            Self::EffectiveAuthorization { .. } => MechanismKind::EffectiveAuthorization,
            Self::ChipAuthentication { .. } => MechanismKind::ChipAuthentication,
            Self::CertificateHolderReference { .. } => MechanismKind::CertificateHolderReference,
        }
    }

    /// Returns `true` if the mechanism must be deleted when `event` occurs
    pub fn deletion_required(&self, event: SecurityEvent) -> bool {
        match (self.kind(), event) {
            (_, SecurityEvent::ChannelEnded | SecurityEvent::RestoreSession) => true,
            // The chain validation state never survives storing a session
            (MechanismKind::CertificateHolderReference, SecurityEvent::StoreSession) => true,
            (_, SecurityEvent::StoreSession) => false,
        }
    }
}
