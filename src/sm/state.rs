// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use core::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::crypto::{Cipher, MacAlgorithm};
use crate::error::Error;

/// Maximum key length (AES-256)
pub const MAX_KEY_LEN: usize = 32;
/// Default length of the truncated MAC
pub const DEFAULT_MAC_LENGTH: usize = 8;

type KeyBuf = heapless::Vec<u8, MAX_KEY_LEN>;

/// Keys and send sequence counter of an established secure channel.
///
/// The counter is advanced once when a secured command is received and once when its response
/// is protected.  A "pending" flag remembers whether the incoming half of the current exchange
/// has already been counted, so both halves advance the counter at most once.
#[derive(Clone)]
pub struct ChannelState {
    cipher: Cipher,
    mac_algorithm: MacAlgorithm,
    enc_key: KeyBuf,
    mac_key: KeyBuf,
    ssc: u64,
    mac_length: usize,
    pending: bool,
}

impl ChannelState {
    /// Returns an empty builder
    pub fn builder() -> ChannelStateBuilder {
        ChannelStateBuilder::default()
    }

    /// Block cipher of the channel
    pub fn cipher(&self) -> Cipher {
        self.cipher
    }

    /// MAC algorithm of the channel
    pub fn mac_algorithm(&self) -> MacAlgorithm {
        self.mac_algorithm
    }

    /// Session key for encryption
    pub fn enc_key(&self) -> &[u8] {
        &self.enc_key
    }

    /// Session key for message authentication
    pub fn mac_key(&self) -> &[u8] {
        &self.mac_key
    }

    /// Current value of the send sequence counter
    pub fn ssc(&self) -> u64 {
        self.ssc
    }

    /// Length of the transmitted (truncated) MAC
    pub fn mac_length(&self) -> usize {
        self.mac_length
    }

    /// Returns `true` between a received secured command and its protected response
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// The send sequence counter as big endian integer of the cipher's block size
    pub fn mac_auxiliary_data(&self) -> Vec<u8> {
        let block_size = self.cipher.block_size();
        let mut block = vec![0; block_size];
        block[block_size - 8..].copy_from_slice(&self.ssc.to_be_bytes());
        block
    }

    /// The IV for the current counter value
    pub fn iv(&self) -> Result<Vec<u8>, Error> {
        self.cipher
            .derive_iv(&self.enc_key, &self.mac_auxiliary_data())
    }

    /// Advances the counter for a received command, unless it was already advanced for it.
    pub fn next_incoming(&mut self) -> u64 {
        if !self.pending {
            self.ssc = self.ssc.wrapping_add(1);
            self.pending = true;
        }
        self.ssc
    }

    /// Advances the counter for the response to the pending command, unless it was already
    /// advanced for it.
    pub fn next_outgoing(&mut self) -> u64 {
        if self.pending {
            self.ssc = self.ssc.wrapping_add(1);
            self.pending = false;
        }
        self.ssc
    }

    /// The counter value the channel continues with once the pending exchange is finished
    fn settled_ssc(&self) -> u64 {
        if self.pending {
            self.ssc.wrapping_add(1)
        } else {
            self.ssc
        }
    }

    /// Computes the truncated MAC over `data` with the counter as auxiliary data
    pub fn mac(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let mut mac = self
            .mac_algorithm
            .mac(&self.mac_key, &self.mac_auxiliary_data(), data)?;
        mac.truncate(self.mac_length);
        Ok(mac)
    }

    /// Pads and encrypts data with the IV of the current counter value
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.cipher.encrypt_padded(&self.enc_key, &self.iv()?, data)
    }

    /// Decrypts and unpads a cryptogram with the IV of the current counter value
    pub fn decrypt(&self, cryptogram: &[u8]) -> Result<Vec<u8>, Error> {
        self.cipher.decrypt_padded(&self.enc_key, &self.iv()?, cryptogram)
    }

    /// Captures an independent copy of the channel
    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            cipher: self.cipher,
            mac_algorithm: self.mac_algorithm,
            enc_key: self.enc_key.clone(),
            mac_key: self.mac_key.clone(),
            ssc: self.ssc,
            mac_length: self.mac_length,
            pending: self.pending,
        }
    }
}

impl fmt::Debug for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelState")
            .field("cipher", &self.cipher)
            .field("mac_algorithm", &self.mac_algorithm)
            .field("ssc", &self.ssc)
            .field("mac_length", &self.mac_length)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl Drop for ChannelState {
    fn drop(&mut self) {
        self.enc_key[..].zeroize();
        self.mac_key[..].zeroize();
    }
}

/// Builds a [`ChannelState`], inheriting unset fields from a predecessor.
///
/// Without a predecessor the cipher and both keys are mandatory.  The MAC algorithm defaults to
/// the one belonging to the cipher, the counter to zero and the MAC length to
/// [`DEFAULT_MAC_LENGTH`].
#[derive(Clone, Default)]
pub struct ChannelStateBuilder {
    cipher: Option<Cipher>,
    mac_algorithm: Option<MacAlgorithm>,
    enc_key: Option<KeyBuf>,
    mac_key: Option<KeyBuf>,
    ssc: Option<u64>,
    mac_length: Option<usize>,
}

impl ChannelStateBuilder {
    /// Sets the block cipher
    pub fn cipher(mut self, cipher: Cipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Sets the MAC algorithm
    pub fn mac_algorithm(mut self, mac_algorithm: MacAlgorithm) -> Self {
        self.mac_algorithm = Some(mac_algorithm);
        self
    }

    /// Sets the encryption key.  Keys longer than [`MAX_KEY_LEN`] are rejected by
    /// [`build`](Self::build).
    pub fn enc_key(mut self, key: &[u8]) -> Self {
        self.enc_key = Some(KeyBuf::from_slice(key).unwrap_or_default());
        self
    }

    /// Sets the MAC key.  Keys longer than [`MAX_KEY_LEN`] are rejected by
    /// [`build`](Self::build).
    pub fn mac_key(mut self, key: &[u8]) -> Self {
        self.mac_key = Some(KeyBuf::from_slice(key).unwrap_or_default());
        self
    }

    /// Sets the initial send sequence counter
    pub fn ssc(mut self, ssc: u64) -> Self {
        self.ssc = Some(ssc);
        self
    }

    /// Sets the length of the truncated MAC
    pub fn mac_length(mut self, mac_length: usize) -> Self {
        self.mac_length = Some(mac_length);
        self
    }

    /// Merges the set fields with `predecessor` into a new channel state.
    ///
    /// A counter inherited from a predecessor in the middle of an exchange continues after the
    /// pending response.
    pub fn build(&self, predecessor: Option<&ChannelState>) -> Result<ChannelState, Error> {
        let cipher = self
            .cipher
            .or(predecessor.map(ChannelState::cipher))
            .ok_or(Error::IncompleteChannelState("cipher"))?;
        let mac_algorithm = self
            .mac_algorithm
            .or(self.cipher.map(Cipher::mac_algorithm))
            .or(predecessor.map(ChannelState::mac_algorithm))
            .unwrap_or(cipher.mac_algorithm());
        let enc_key = match (&self.enc_key, predecessor) {
            (Some(key), _) => key.clone(),
            (None, Some(p)) => p.enc_key.clone(),
            (None, None) => return Err(Error::IncompleteChannelState("encryption key")),
        };
        let mac_key = match (&self.mac_key, predecessor) {
            (Some(key), _) => key.clone(),
            (None, Some(p)) => p.mac_key.clone(),
            (None, None) => return Err(Error::IncompleteChannelState("MAC key")),
        };
        let ssc = self
            .ssc
            .or(predecessor.map(ChannelState::settled_ssc))
            .unwrap_or(0);
        let mac_length = self
            .mac_length
            .or(predecessor.map(ChannelState::mac_length))
            .unwrap_or(DEFAULT_MAC_LENGTH);

        let state = ChannelState {
            cipher,
            mac_algorithm,
            enc_key,
            mac_key,
            ssc,
            mac_length,
            pending: false,
        };
        cipher.check_key(&state.enc_key)?;
        mac_algorithm.check_key(&state.mac_key)?;
        if mac_length == 0 || mac_length > mac_algorithm.block_size() {
            return Err(Error::IncompleteChannelState("MAC length"));
        }
        Ok(state)
    }
}

impl fmt::Debug for ChannelStateBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelStateBuilder")
            .field("cipher", &self.cipher)
            .field("mac_algorithm", &self.mac_algorithm)
            .field("enc_key", &self.enc_key.as_ref().map(|_| "<redacted>"))
            .field("mac_key", &self.mac_key.as_ref().map(|_| "<redacted>"))
            .field("ssc", &self.ssc)
            .field("mac_length", &self.mac_length)
            .finish()
    }
}

impl Drop for ChannelStateBuilder {
    fn drop(&mut self) {
        for key in [&mut self.enc_key, &mut self.mac_key].into_iter().flatten() {
            key[..].zeroize();
        }
    }
}

/// Independent copy of a [`ChannelState`] used to store and restore session contexts.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    cipher: Cipher,
    mac_algorithm: MacAlgorithm,
    #[serde(with = "crate::utils::serde_bytes_heapless")]
    enc_key: KeyBuf,
    #[serde(with = "crate::utils::serde_bytes_heapless")]
    mac_key: KeyBuf,
    ssc: u64,
    mac_length: usize,
    pending: bool,
}

impl ChannelSnapshot {
    /// Reconstructs the channel.  A snapshot taken between a command and its response resumes
    /// as if the response had been sent.
    pub fn restore(&self) -> Result<ChannelState, Error> {
        let ssc = if self.pending {
            self.ssc.wrapping_add(1)
        } else {
            self.ssc
        };
        ChannelState::builder()
            .cipher(self.cipher)
            .mac_algorithm(self.mac_algorithm)
            .enc_key(&self.enc_key)
            .mac_key(&self.mac_key)
            .ssc(ssc)
            .mac_length(self.mac_length)
            .build(None)
    }

    /// Serializes the snapshot (CBOR)
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        serde_cbor::to_vec(self).map_err(|_err| {
            error!("Failed to serialize channel snapshot: {_err}");
            Error::Serialization
        })
    }

    /// Deserializes a snapshot produced by [`to_bytes`](Self::to_bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        serde_cbor::from_slice(bytes).map_err(|_err| {
            warn!("Failed to deserialize channel snapshot: {_err}");
            Error::Serialization
        })
    }
}

impl fmt::Debug for ChannelSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSnapshot")
            .field("cipher", &self.cipher)
            .field("ssc", &self.ssc)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl Drop for ChannelSnapshot {
    fn drop(&mut self) {
        self.enc_key[..].zeroize();
        self.mac_key[..].zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use test_log::test;

    const KEY: [u8; 16] = hex!("000102030405060708090A0B0C0D0E0F");

    fn aes() -> ChannelState {
        ChannelState::builder()
            .cipher(Cipher::Aes128)
            .enc_key(&KEY)
            .mac_key(&KEY)
            .build(None)
            .unwrap()
    }

    #[test]
    fn builder_defaults() {
        let state = aes();
        assert_eq!(state.mac_algorithm(), MacAlgorithm::Cmac);
        assert_eq!(state.ssc(), 0);
        assert_eq!(state.mac_length(), DEFAULT_MAC_LENGTH);
        assert!(!state.is_pending());
        assert_eq!(state.mac_auxiliary_data(), [0; 16]);

        assert_eq!(
            ChannelState::builder().enc_key(&KEY).mac_key(&KEY).build(None).err(),
            Some(Error::IncompleteChannelState("cipher"))
        );
        assert_eq!(
            ChannelState::builder()
                .cipher(Cipher::Tdes)
                .enc_key(&KEY)
                .build(None)
                .err(),
            Some(Error::IncompleteChannelState("MAC key"))
        );
        assert_eq!(
            ChannelState::builder()
                .cipher(Cipher::Aes256)
                .enc_key(&KEY)
                .mac_key(&KEY)
                .build(None)
                .err(),
            Some(Error::InvalidKeyLength)
        );
        assert_eq!(
            ChannelState::builder()
                .cipher(Cipher::Aes128)
                .enc_key(&[0; 33])
                .mac_key(&KEY)
                .build(None)
                .err(),
            Some(Error::InvalidKeyLength)
        );
        assert_eq!(
            ChannelState::builder()
                .cipher(Cipher::Tdes)
                .enc_key(&KEY)
                .mac_key(&KEY)
                .mac_length(9)
                .build(None)
                .err(),
            Some(Error::IncompleteChannelState("MAC length"))
        );
    }

    #[test]
    fn inheritance() {
        let mut predecessor = ChannelState::builder()
            .cipher(Cipher::Tdes)
            .enc_key(&KEY)
            .mac_key(&KEY)
            .ssc(0x10)
            .build(None)
            .unwrap();

        // Only the keys change
        let new_key = [0x42; 16];
        let rekeyed = ChannelState::builder()
            .enc_key(&new_key)
            .mac_key(&new_key)
            .build(Some(&predecessor))
            .unwrap();
        assert_eq!(rekeyed.cipher(), Cipher::Tdes);
        assert_eq!(rekeyed.mac_algorithm(), MacAlgorithm::RetailMac);
        assert_eq!(rekeyed.enc_key(), new_key);
        assert_eq!(rekeyed.ssc(), 0x10);

        // A new cipher brings its own MAC algorithm
        let upgraded = ChannelState::builder()
            .cipher(Cipher::Aes128)
            .ssc(0)
            .build(Some(&predecessor))
            .unwrap();
        assert_eq!(upgraded.mac_algorithm(), MacAlgorithm::Cmac);
        assert_eq!(upgraded.mac_key(), KEY);

        // Mid exchange, the counter continues after the pending response
        predecessor.next_incoming();
        let inherited = ChannelState::builder()
            .build(Some(&predecessor))
            .unwrap();
        assert_eq!(inherited.ssc(), 0x12);
        assert!(!inherited.is_pending());
    }

    #[test]
    fn counter_phases() {
        let mut state = aes();
        assert_eq!(state.next_outgoing(), 0);
        assert_eq!(state.next_incoming(), 1);
        assert_eq!(state.next_incoming(), 1);
        assert!(state.is_pending());
        assert_eq!(state.mac_auxiliary_data(), hex!("00000000000000000000000000000001"));
        assert_eq!(state.next_outgoing(), 2);
        assert_eq!(state.next_outgoing(), 2);
        assert!(!state.is_pending());
        assert_eq!(state.next_incoming(), 3);
    }

    #[test]
    fn snapshots() {
        let mut state = aes();
        state.next_incoming();
        state.next_outgoing();
        let snapshot = state.snapshot();
        let restored = snapshot.restore().unwrap();
        assert_eq!(restored.ssc(), 2);
        assert_eq!(restored.enc_key(), KEY);

        // Later use of the live state does not affect the snapshot
        state.next_incoming();
        assert_eq!(snapshot.restore().unwrap().ssc(), 2);

        // Captured mid exchange
        let pending = state.snapshot();
        let restored = pending.restore().unwrap();
        assert_eq!(restored.ssc(), 4);
        assert!(!restored.is_pending());

        let bytes = pending.to_bytes().unwrap();
        assert_eq!(ChannelSnapshot::from_bytes(&bytes).unwrap(), pending);
        assert_eq!(
            ChannelSnapshot::from_bytes(&bytes[..bytes.len() - 1]).err(),
            Some(Error::Serialization)
        );
    }

    #[test]
    fn debug_redacts_keys() {
        let state = ChannelState::builder()
            .cipher(Cipher::Tdes)
            .enc_key(&[0xAB; 16])
            .mac_key(&[0xCD; 16])
            .build(None)
            .unwrap();
        for debug in [
            format!("{state:?}"),
            format!("{:?}", state.snapshot()),
            format!("{:?}", ChannelState::builder().enc_key(&[0xAB; 16])),
        ] {
            assert!(!debug.contains("171"), "{debug}");
            assert!(!debug.contains("AB"), "{debug}");
        }
    }
}
