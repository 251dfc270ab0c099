// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Error types of the secure messaging core

use iso7816::Status;

/// Errors of the secure messaging core.
///
/// Every error returned by [`SecureChannelCodec::decode`][`crate::sm::SecureChannelCodec::decode`]
/// or [`SecureChannelCodec::encode`][`crate::sm::SecureChannelCodec::encode`] is terminal for the
/// active secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Mandatory secure messaging data objects are missing or malformed
    MissingSmDataObjects,
    /// A secured command was received without an established channel
    SecureMessagingUnavailable,
    /// The MAC of a secured command did not verify
    IncorrectSmDataObjects,
    /// The decrypted cryptogram is not correctly padded
    InvalidPadding,
    /// A channel field was queried with no channel established
    NoActiveChannel,
    /// A response was protected without a pending secured request
    NoPendingExchange,
    /// A channel state was built without the given field
    IncompleteChannelState(&'static str),
    /// A key does not match the key length of the cipher
    InvalidKeyLength,
    /// A snapshot could not be (de)serialized
    Serialization,
    /// A protected response does not fit in a response APDU
    ResponseTooLong,
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The structure of a secured command is wrong
    Structural,
    /// A secured command failed authentication
    Authentication,
    /// The channel state was misused (programmer error)
    ChannelState,
}

impl Error {
    /// Returns the class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MissingSmDataObjects | Self::SecureMessagingUnavailable => {
                ErrorClass::Structural
            }
            Self::IncorrectSmDataObjects | Self::InvalidPadding => ErrorClass::Authentication,
            Self::NoActiveChannel
            | Self::NoPendingExchange
            | Self::IncompleteChannelState(_)
            | Self::InvalidKeyLength
            | Self::Serialization
            | Self::ResponseTooLong => ErrorClass::ChannelState,
        }
    }

    /// Returns the status word reported to the terminal for this error.
    pub fn status(&self) -> Status {
        match self {
            Self::MissingSmDataObjects => Status::ExectedSecureMessagingDataObjectsMissing,
            Self::SecureMessagingUnavailable => Status::SecureMessagingNotSupported,
            Self::IncorrectSmDataObjects | Self::InvalidPadding => {
                Status::IncorrectSecureMessagingDataObjects
            }
            Self::NoActiveChannel
            | Self::NoPendingExchange
            | Self::IncompleteChannelState(_)
            | Self::InvalidKeyLength
            | Self::Serialization
            | Self::ResponseTooLong => Status::UnspecifiedCheckingError,
        }
    }
}

impl From<Error> for Status {
    fn from(error: Error) -> Status {
        error.status()
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MissingSmDataObjects => f.write_str("Expected SM data objects missing"),
            Self::SecureMessagingUnavailable => {
                f.write_str("Secured command without an established channel")
            }
            Self::IncorrectSmDataObjects => f.write_str("Incorrect SM data objects"),
            Self::InvalidPadding => f.write_str("Invalid padding of SM cryptogram"),
            Self::NoActiveChannel => f.write_str("No secure channel established"),
            Self::NoPendingExchange => f.write_str("No pending secured request"),
            Self::IncompleteChannelState(field) => {
                write!(f, "Channel state is missing the {field}")
            }
            Self::InvalidKeyLength => f.write_str("Key length does not match the cipher"),
            Self::Serialization => f.write_str("Failed to (de)serialize channel snapshot"),
            Self::ResponseTooLong => f.write_str("Protected response too long"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_words() {
        for (error, class, sw) in [
            (Error::MissingSmDataObjects, ErrorClass::Structural, 0x6987),
            (Error::SecureMessagingUnavailable, ErrorClass::Structural, 0x6882),
            (Error::IncorrectSmDataObjects, ErrorClass::Authentication, 0x6988),
            (Error::InvalidPadding, ErrorClass::Authentication, 0x6988),
            (Error::NoPendingExchange, ErrorClass::ChannelState, 0x6F00),
            (
                Error::IncompleteChannelState("cipher"),
                ErrorClass::ChannelState,
                0x6F00,
            ),
        ] {
            assert_eq!(error.class(), class);
            assert_eq!(u16::from(Status::from(error)), sw, "{error}");
        }
        assert_eq!(
            Error::IncompleteChannelState("MAC key").to_string(),
            "Channel state is missing the MAC key"
        );
    }
}
