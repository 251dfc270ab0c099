// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Secure messaging, see ISO 7816-4 § 10 and BSI TR-03110-3 § F
//!
//! A protected command carries its data field in the data objects
//!
//! - `87` (even INS, first value byte is the padding content indicator `01`) or `85` (odd INS):
//!   the encrypted command data,
//! - `97`: the expected length of the plaintext response,
//! - `8E`: the MAC over the padded header and the padded preceding data objects.
//!
//! A protected response consists of the encrypted response data (`87` or `85`), the status word
//! (`99`) and the MAC (`8E`).

pub mod crypto;
mod state;

use crate::apdu::{self, CommandApdu, CommandExt, ResponseApdu, SM_CLASS_BITS};
use crate::card::reply::Reply;
use crate::error::Error;
use crate::security::SecurityEvent;
use crate::tlv::{take_do, DataObject};
use crate::utils::constant_time_eq;

use crypto::pad;

pub use state::{
    ChannelSnapshot, ChannelState, ChannelStateBuilder, DEFAULT_MAC_LENGTH, MAX_KEY_LEN,
};

const TAG_CRYPTOGRAM_EVEN: u16 = 0x87;
const TAG_CRYPTOGRAM_ODD: u16 = 0x85;
const TAG_LE: u16 = 0x97;
const TAG_STATUS: u8 = 0x99;
const TAG_MAC: u16 = 0x8E;

/// Padding content indicator of `87`: ISO/IEC 9797-1 padding method 2
const PADDING_INDICATOR: u8 = 0x01;

/// Result of [`SecureChannelCodec::decode`]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Decoded {
    /// The plaintext command
    pub command: CommandApdu,
    /// `true` if the command was received protected, its response must then be protected with
    /// [`SecureChannelCodec::encode`]
    pub secured: bool,
    /// Event caused by decoding the command
    pub event: Option<SecurityEvent>,
}

/// The data objects of a protected command
#[derive(Debug, Default)]
struct SmObjects<'a> {
    cryptogram: Option<DataObject<'a>>,
    le: Option<DataObject<'a>>,
    mac: Option<DataObject<'a>>,
}

impl<'a> SmObjects<'a> {
    /// Data objects must appear in the order cryptogram, `97`, `8E`, each at most once
    fn parse(command: &'a CommandApdu) -> Result<Self, Error> {
        let cryptogram_tag = if u8::from(command.instruction()) % 2 == 0 {
            TAG_CRYPTOGRAM_EVEN
        } else {
            TAG_CRYPTOGRAM_ODD
        };

        let mut objects = Self::default();
        let mut remainder = command.data().as_slice();
        let mut last = None;
        while !remainder.is_empty() {
            let (object, rem) = take_do(remainder).ok_or_else(|| {
                warn!("Malformed SM data objects");
                Error::MissingSmDataObjects
            })?;
            remainder = rem;

            let (rank, slot) = match object.tag {
                tag if tag == cryptogram_tag => (0, &mut objects.cryptogram),
                TAG_LE => (1, &mut objects.le),
                TAG_MAC => (2, &mut objects.mac),
                tag => {
                    warn!("Unexpected SM data object {tag:02X}");
                    return Err(Error::MissingSmDataObjects);
                }
            };
            if last.map_or(false, |last| rank <= last) {
                warn!("SM data object {:02X} out of order", object.tag);
                return Err(Error::MissingSmDataObjects);
            }
            last = Some(rank);
            *slot = Some(object);
        }

        if objects.mac.is_none() {
            warn!("Missing SM MAC");
            return Err(Error::MissingSmDataObjects);
        }
        Ok(objects)
    }

    fn le(&self) -> Result<Option<usize>, Error> {
        let Some(le) = self.le else {
            return Ok(None);
        };
        let le = match *le.value {
            [0] => 0x100,
            [le] => le.into(),
            [0, 0] => 0x10000,
            [le1, le2] => u16::from_be_bytes([le1, le2]).into(),
            _ => {
                warn!("Invalid SM expected length: {:02X?}", le.value);
                return Err(Error::MissingSmDataObjects);
            }
        };
        Ok(Some(le))
    }
}

/// Protects responses and unwraps commands of a secure channel.
///
/// All errors are terminal for the channel: the channel is torn down before the error is
/// returned.
#[derive(Debug, Default)]
pub struct SecureChannelCodec {
    channel: Option<ChannelState>,
}

impl SecureChannelCodec {
    /// Creates a codec without an established channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a channel is established
    pub fn is_active(&self) -> bool {
        self.channel.is_some()
    }

    /// Returns the established channel
    pub fn channel(&self) -> Option<&ChannelState> {
        self.channel.as_ref()
    }

    /// Establishes a channel, replacing the current one
    pub fn install(&mut self, state: ChannelState) {
        debug!(
            "Establishing {:?} channel with SSC {:X}",
            state.cipher(),
            state.ssc()
        );
        self.channel = Some(state);
    }

    /// Tears the channel down.  Returns `true` if a channel was established.
    pub fn teardown(&mut self) -> bool {
        let active = self.channel.take().is_some();
        if active {
            debug!("Secure channel torn down");
        }
        active
    }

    /// Captures the established channel
    pub fn snapshot(&self) -> Result<ChannelSnapshot, Error> {
        self.channel
            .as_ref()
            .map(ChannelState::snapshot)
            .ok_or(Error::NoActiveChannel)
    }

    /// Unwraps a command.
    ///
    /// Commands without secure messaging are passed through.  If a channel is established, it is
    /// torn down and [`SecurityEvent::ChannelEnded`] is reported.
    pub fn decode(&mut self, command: &CommandApdu) -> Result<Decoded, Error> {
        if !command.is_secured() {
            let event = if self.teardown() {
                warn!("Unprotected command received, ending the secure channel");
                Some(SecurityEvent::ChannelEnded)
            } else {
                None
            };
            return Ok(Decoded {
                command: command.clone(),
                secured: false,
                event,
            });
        }

        let Some(channel) = self.channel.as_mut() else {
            warn!("Protected command received without a secure channel");
            return Err(Error::SecureMessagingUnavailable);
        };
        match unwrap_command(channel, command) {
            Ok(command) => Ok(Decoded {
                command,
                secured: true,
                event: None,
            }),
            Err(err) => {
                warn!("Failed to unwrap protected command: {err}");
                self.teardown();
                Err(err)
            }
        }
    }

    /// Protects the response to the last decoded command.  `request_instruction` selects the
    /// cryptogram data object (`87` for even, `85` for odd instructions).
    pub fn encode(
        &mut self,
        response: &ResponseApdu,
        request_instruction: u8,
    ) -> Result<ResponseApdu, Error> {
        let Some(channel) = self.channel.as_mut() else {
            error!("No secure channel to protect the response");
            return Err(Error::NoActiveChannel);
        };
        match protect_response(channel, response, request_instruction) {
            Ok(response) => Ok(response),
            Err(err) => {
                error!("Failed to protect response: {err}");
                self.teardown();
                Err(err)
            }
        }
    }
}

fn unwrap_command(channel: &mut ChannelState, command: &CommandApdu) -> Result<CommandApdu, Error> {
    channel.next_incoming();
    let objects = SmObjects::parse(command)?;
    let le = objects.le()?;
    let block_size = channel.cipher().block_size();

    let mut mac_input = pad(&command.header(), block_size);
    let mut protected = Vec::new();
    for object in [objects.cryptogram, objects.le].into_iter().flatten() {
        protected.extend_from_slice(object.raw);
    }
    if !protected.is_empty() {
        mac_input.extend_from_slice(&pad(&protected, block_size));
    }
    let expected = channel.mac(&mac_input)?;
    let received = objects.mac.map(|mac| mac.value).unwrap_or_default();
    if !constant_time_eq(&expected, received) {
        return Err(Error::IncorrectSmDataObjects);
    }

    let data = match objects.cryptogram {
        None => Vec::new(),
        Some(cryptogram) => {
            let encrypted = if cryptogram.tag == TAG_CRYPTOGRAM_EVEN {
                match cryptogram.value.split_first() {
                    Some((&PADDING_INDICATOR, encrypted)) => encrypted,
                    _ => {
                        warn!("Unsupported padding content indicator");
                        return Err(Error::IncorrectSmDataObjects);
                    }
                }
            } else {
                cryptogram.value
            };
            channel.decrypt(encrypted)?
        }
    };

    let [class, instruction, p1, p2] = command.header();
    apdu::build(
        [class & !SM_CLASS_BITS, instruction, p1, p2],
        &data,
        le.unwrap_or(0),
        command.extended,
    )
    .map_err(|status| {
        warn!("Unwrapped command cannot be represented: {status:?}");
        Error::MissingSmDataObjects
    })
}

fn protect_response(
    channel: &mut ChannelState,
    response: &ResponseApdu,
    request_instruction: u8,
) -> Result<ResponseApdu, Error> {
    if !channel.is_pending() {
        error!("Protecting a response without a pending protected command");
        return Err(Error::NoPendingExchange);
    }
    channel.next_outgoing();
    let block_size = channel.cipher().block_size();

    let mut body = Vec::new();
    let mut reply = Reply(&mut body);
    let too_long = |_| Error::ResponseTooLong;
    if !response.data.is_empty() {
        let cryptogram = channel.encrypt(&response.data)?;
        if request_instruction % 2 == 0 {
            reply.expand(&[TAG_CRYPTOGRAM_EVEN as u8]).map_err(too_long)?;
            let offset = reply.len();
            reply.expand(&[PADDING_INDICATOR]).map_err(too_long)?;
            reply.expand(&cryptogram).map_err(too_long)?;
            reply.prepend_len(offset).map_err(too_long)?;
        } else {
            reply
                .append_do(TAG_CRYPTOGRAM_ODD as u8, &cryptogram)
                .map_err(too_long)?;
        }
    }
    reply
        .append_do(TAG_STATUS, &<[u8; 2]>::from(response.status))
        .map_err(too_long)?;

    let mac = channel.mac(&pad(&reply, block_size))?;
    reply.append_do(TAG_MAC as u8, &mac).map_err(too_long)?;
    Ok(ResponseApdu::new(body, response.status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Status;
    use crypto::Cipher;
    use hex_literal::hex;
    use test_log::test;

    fn established(cipher: Cipher) -> SecureChannelCodec {
        let key = vec![0x11; cipher.key_len()];
        let mut codec = SecureChannelCodec::new();
        codec.install(
            ChannelState::builder()
                .cipher(cipher)
                .enc_key(&key)
                .mac_key(&key)
                .build(None)
                .unwrap(),
        );
        codec
    }

    #[test]
    fn unsecured_pass_through() {
        let command = apdu::parse(&hex!("00A4020C 02 011E")).unwrap();
        let mut codec = SecureChannelCodec::new();
        assert_eq!(
            codec.decode(&command),
            Ok(Decoded {
                command: command.clone(),
                secured: false,
                event: None
            })
        );

        let mut codec = established(Cipher::Aes128);
        let decoded = codec.decode(&command).unwrap();
        assert_eq!(decoded.event, Some(SecurityEvent::ChannelEnded));
        assert_eq!(decoded.command, command);
        assert!(!codec.is_active());
    }

    #[test]
    fn structural_errors() {
        let secured = |data: &[u8]| apdu::build(hex!("0CB00000"), data, 0, false).unwrap();

        let mut codec = SecureChannelCodec::new();
        assert_eq!(
            codec.decode(&secured(&hex!("8E 08 0102030405060708"))),
            Err(Error::SecureMessagingUnavailable)
        );

        for data in [
            hex!("97 01 00").as_slice(),
            &hex!("97 01 00 8E 08 0102030405060708 97 01 00"),
            &hex!("97 01 00 97 01 00 8E 08 0102030405060708"),
            &hex!("8E 08 0102030405060708 97 01 00"),
            &hex!("85 09 01 0102030405060708 8E 08 0102030405060708"),
            &hex!("81 01 00 8E 08 0102030405060708"),
            &hex!("97 05 00"),
        ] {
            let mut codec = established(Cipher::Tdes);
            assert_eq!(
                codec.decode(&secured(data)),
                Err(Error::MissingSmDataObjects),
                "{data:02X?}"
            );
            assert!(!codec.is_active());
        }
    }

    #[test]
    fn encode_without_request() {
        let mut codec = established(Cipher::Aes128);
        assert_eq!(
            codec.encode(&Status::Success.into(), 0xB0),
            Err(Error::NoPendingExchange)
        );
        assert!(!codec.is_active());
        assert_eq!(
            codec.encode(&Status::Success.into(), 0xB0),
            Err(Error::NoActiveChannel)
        );
        assert_eq!(codec.snapshot().err(), Some(Error::NoActiveChannel));
    }

    // ICAO Doc 9303 part 11, appendix D.4
    #[test]
    fn icao_worked_example() {
        let mut codec = SecureChannelCodec::new();
        codec.install(
            ChannelState::builder()
                .cipher(Cipher::Tdes)
                .enc_key(&hex!("979EC13B1CBFE9DCD01AB0FED307EAE5"))
                .mac_key(&hex!("F1CB1F1FB5ADF208806B89DC579DC1F8"))
                .ssc(0x887022120C06C226)
                .build(None)
                .unwrap(),
        );

        // SELECT EF.COM
        let command =
            apdu::parse(&hex!("0CA4020C158709016375432908C044F68E08BF8B92D635FF24F800")).unwrap();
        let decoded = codec.decode(&command).unwrap();
        assert!(decoded.secured);
        assert_eq!(
            decoded.command,
            apdu::parse(&hex!("00A4020C 02 011E")).unwrap()
        );
        let response = codec.encode(&Status::Success.into(), 0xA4).unwrap();
        assert_eq!(
            response.to_bytes(),
            hex!("990290008E08FA855A5D4C50A8ED9000")
        );

        // READ BINARY of the first four bytes
        let command = apdu::parse(&hex!("0CB000000D9701048E08ED6705417E96BA5500")).unwrap();
        let decoded = codec.decode(&command).unwrap();
        assert_eq!(
            decoded.command,
            apdu::parse(&hex!("00B00000 04")).unwrap()
        );
        let response = codec
            .encode(&ResponseApdu::new(hex!("60145F01"), Status::Success), 0xB0)
            .unwrap();
        assert_eq!(
            response.to_bytes(),
            hex!("8709019FF0EC34F9922651990290008E08AD55CC17140B2DED9000")
        );
        assert_eq!(codec.channel().unwrap().ssc(), 0x887022120C06C22A);
    }
}
