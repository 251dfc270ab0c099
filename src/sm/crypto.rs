// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Cipher suites of secure messaging
//!
//! Cryptograms are CBC encrypted with ISO/IEC 9797-1 padding method 2 ([`Iso7816`] padding).
//! MACs are computed over the auxiliary data (the send sequence counter) followed by data that
//! the caller already padded with [`pad`].

use aes::{Aes128, Aes192, Aes256};
use cipher::{
    block_padding::{Iso7816, NoPadding, Padding, RawPadding},
    BlockCipher, BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit,
    KeyIvInit,
};
use cmac::{Cmac, Mac};
use des::{Des, TdesEde2};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::error::Error;

/// Block cipher and key size of a secure channel
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Cipher {
    /// Two key triple DES, as used by BAC and PACE with 3DES
    Tdes = 1,
    /// AES with 128 bit keys
    Aes128 = 2,
    /// AES with 192 bit keys
    Aes192 = 3,
    /// AES with 256 bit keys
    Aes256 = 4,
}

impl Cipher {
    /// Block size in bytes
    pub fn block_size(self) -> usize {
        match self {
            Self::Tdes => 8,
            Self::Aes128 | Self::Aes192 | Self::Aes256 => 16,
        }
    }

    /// Key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            Self::Tdes | Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    /// Returns `true` if the IV is derived from the send sequence counter.  3DES channels always
    /// use the zero IV.
    pub fn derives_iv(self) -> bool {
        self != Self::Tdes
    }

    /// The MAC algorithm used with this cipher by BSI TR-03110 and ICAO Doc 9303
    pub fn mac_algorithm(self) -> MacAlgorithm {
        match self {
            Self::Tdes => MacAlgorithm::RetailMac,
            Self::Aes128 | Self::Aes192 | Self::Aes256 => MacAlgorithm::Cmac,
        }
    }

    /// Encrypts `buf` in place without padding.  `buf` must be a multiple of the block size.
    pub fn encrypt(self, key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), Error> {
        self.check_key(key)?;
        let len = buf.len();
        match self {
            Self::Tdes => cbc_encrypt::<TdesEde2, NoPadding>(key, iv, buf, len),
            Self::Aes128 => cbc_encrypt::<Aes128, NoPadding>(key, iv, buf, len),
            Self::Aes192 => cbc_encrypt::<Aes192, NoPadding>(key, iv, buf, len),
            Self::Aes256 => cbc_encrypt::<Aes256, NoPadding>(key, iv, buf, len),
        }?;
        Ok(())
    }

    /// Pads and encrypts `data`, returning the cryptogram
    pub fn encrypt_padded(self, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
        self.check_key(key)?;
        let msg_len = data.len();
        let mut buf = data.to_vec();
        buf.resize(padded_len(msg_len, self.block_size()), 0);
        let len = match self {
            Self::Tdes => cbc_encrypt::<TdesEde2, Iso7816>(key, iv, &mut buf, msg_len),
            Self::Aes128 => cbc_encrypt::<Aes128, Iso7816>(key, iv, &mut buf, msg_len),
            Self::Aes192 => cbc_encrypt::<Aes192, Iso7816>(key, iv, &mut buf, msg_len),
            Self::Aes256 => cbc_encrypt::<Aes256, Iso7816>(key, iv, &mut buf, msg_len),
        }?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Decrypts and unpads a cryptogram.  Fails with [`Error::InvalidPadding`] if the cryptogram
    /// is not a multiple of the block size or the plaintext is not correctly padded.
    pub fn decrypt_padded(
        self,
        key: &[u8],
        iv: &[u8],
        cryptogram: &[u8],
    ) -> Result<Vec<u8>, Error> {
        self.check_key(key)?;
        let mut buf = cryptogram.to_vec();
        let len = match self {
            Self::Tdes => cbc_decrypt::<TdesEde2>(key, iv, &mut buf),
            Self::Aes128 => cbc_decrypt::<Aes128>(key, iv, &mut buf),
            Self::Aes192 => cbc_decrypt::<Aes192>(key, iv, &mut buf),
            Self::Aes256 => cbc_decrypt::<Aes256>(key, iv, &mut buf),
        }?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Derives the IV for the given send sequence counter block
    pub fn derive_iv(self, key: &[u8], ssc_block: &[u8]) -> Result<Vec<u8>, Error> {
        let zero = vec![0; self.block_size()];
        if !self.derives_iv() {
            return Ok(zero);
        }
        let mut iv = ssc_block.to_vec();
        self.encrypt(key, &zero, &mut iv)?;
        Ok(iv)
    }

    /// Checks the length of a key for this cipher
    pub fn check_key(self, key: &[u8]) -> Result<(), Error> {
        if key.len() == self.key_len() {
            Ok(())
        } else {
            Err(Error::InvalidKeyLength)
        }
    }
}

/// MAC algorithm of a secure channel
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum MacAlgorithm {
    /// ISO/IEC 9797-1 MAC algorithm 3 with DES (retail MAC), 16 byte keys
    RetailMac = 1,
    /// AES-CMAC, the AES key size is given by the key length
    Cmac = 2,
}

impl MacAlgorithm {
    /// Block size of the underlying block cipher
    pub fn block_size(self) -> usize {
        match self {
            Self::RetailMac => 8,
            Self::Cmac => 16,
        }
    }

    /// Checks the length of a key for this algorithm
    pub fn check_key(self, key: &[u8]) -> Result<(), Error> {
        let valid = match self {
            Self::RetailMac => key.len() == 16,
            Self::Cmac => matches!(key.len(), 16 | 24 | 32),
        };
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidKeyLength)
        }
    }

    /// Computes the untruncated MAC over `aux || data`.  `data` must already be padded.
    pub fn mac(self, key: &[u8], aux: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
        self.check_key(key)?;
        match (self, key.len()) {
            (Self::RetailMac, _) => retail_mac(key, aux, data),
            (Self::Cmac, 16) => cmac::<Cmac<Aes128>>(key, aux, data),
            (Self::Cmac, 24) => cmac::<Cmac<Aes192>>(key, aux, data),
            (Self::Cmac, _) => cmac::<Cmac<Aes256>>(key, aux, data),
        }
    }
}

fn cbc_encrypt<C, P>(key: &[u8], iv: &[u8], buf: &mut [u8], msg_len: usize) -> Result<usize, Error>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
    P: Padding<C::BlockSize>,
{
    let encrypted = cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| Error::InvalidKeyLength)?
        .encrypt_padded_mut::<P>(buf, msg_len)
        .map_err(|_| {
            error!("Plaintext of {msg_len} bytes does not fit a block aligned buffer");
            Error::InvalidPadding
        })?;
    Ok(encrypted.len())
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<usize, Error>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    let decrypted = cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| Error::InvalidKeyLength)?
        .decrypt_padded_mut::<Iso7816>(buf)
        .map_err(|_| Error::InvalidPadding)?;
    Ok(decrypted.len())
}

/// ISO/IEC 9797-1 MAC algorithm 3: single DES CBC-MAC under K1, with the last block processed
/// as `E(K1, D(K2, H))`.  Incomplete blocks are zero filled.
fn retail_mac(key: &[u8], aux: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let (k1, k2) = key.split_at(8);
    let k1 = Des::new_from_slice(k1).map_err(|_| Error::InvalidKeyLength)?;
    let k2 = Des::new_from_slice(k2).map_err(|_| Error::InvalidKeyLength)?;

    let mut input = Vec::with_capacity(aux.len() + data.len());
    input.extend_from_slice(aux);
    input.extend_from_slice(data);

    let mut state = cipher::Block::<Des>::default();
    for chunk in input.chunks(8) {
        for (s, b) in state.iter_mut().zip(chunk) {
            *s ^= b;
        }
        k1.encrypt_block(&mut state);
    }
    k2.decrypt_block(&mut state);
    k1.encrypt_block(&mut state);
    Ok(state.to_vec())
}

fn cmac<M: Mac + KeyInit>(key: &[u8], aux: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut mac = <M as KeyInit>::new_from_slice(key).map_err(|_| Error::InvalidKeyLength)?;
    Mac::update(&mut mac, aux);
    Mac::update(&mut mac, data);
    Ok(Mac::finalize(mac).into_bytes().to_vec())
}

fn padded_len(len: usize, block_size: usize) -> usize {
    (len / block_size + 1) * block_size
}

/// Pads `data` to a multiple of `block_size` with ISO/IEC 9797-1 padding method 2.  A full block
/// is added to data that is already aligned.
pub fn pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let mut padded = data.to_vec();
    padded.resize(padded_len(data.len(), block_size), 0);
    let last_block = data.len() - data.len() % block_size;
    Iso7816::raw_pad(&mut padded[last_block..], data.len() % block_size);
    padded
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use test_log::test;

    #[test]
    fn padding() {
        assert_eq!(pad(&[], 8), hex!("80 00000000000000"));
        assert_eq!(pad(&hex!("011E"), 8), hex!("011E 80 0000000000"));
        assert_eq!(
            pad(&hex!("0102030405060708"), 8),
            hex!("0102030405060708 80 00000000000000")
        );
        assert_eq!(pad(&[0xAA; 15], 16).len(), 16);
        assert_eq!(pad(&[0xAA; 16], 16).len(), 32);
    }

    #[test]
    fn padded_cryptograms() {
        let key = [0x42; 16];
        let iv = [0; 16];
        for len in [0, 1, 15, 16, 17, 40] {
            let data: Vec<u8> = (0..len as u8).collect();
            let cryptogram = Cipher::Aes128.encrypt_padded(&key, &iv, &data).unwrap();

            // Same as encrypting the explicitly padded data
            let mut padded = pad(&data, 16);
            Cipher::Aes128.encrypt(&key, &iv, &mut padded).unwrap();
            assert_eq!(cryptogram, padded);

            assert_eq!(
                Cipher::Aes128.decrypt_padded(&key, &iv, &cryptogram),
                Ok(data)
            );
        }

        let mut unpadded = [0x11; 16];
        Cipher::Aes128.encrypt(&key, &iv, &mut unpadded).unwrap();
        assert_eq!(
            Cipher::Aes128.decrypt_padded(&key, &iv, &unpadded),
            Err(Error::InvalidPadding)
        );
        assert_eq!(
            Cipher::Aes128.decrypt_padded(&key, &iv, &[0; 15]),
            Err(Error::InvalidPadding)
        );
        assert_eq!(
            Cipher::Aes128.decrypt_padded(&key, &iv, &[]),
            Err(Error::InvalidPadding)
        );
    }

    #[test]
    fn aes_fips197() {
        let key = hex!("000102030405060708090a0b0c0d0e0f");
        let mut block = hex!("00112233445566778899aabbccddeeff");
        Cipher::Aes128.encrypt(&key, &[0; 16], &mut block).unwrap();
        assert_eq!(block, hex!("69c4e0d86a7b0430d8cdb78070b4c55a"));

        // The IV derivation is the ECB encryption of the counter block
        assert_eq!(
            Cipher::Aes128
                .derive_iv(&key, &hex!("00112233445566778899aabbccddeeff"))
                .unwrap(),
            hex!("69c4e0d86a7b0430d8cdb78070b4c55a")
        );
    }

    #[test]
    fn cmac_rfc4493() {
        let key = hex!("2b7e151628aed2a6abf7158809cf4f3c");
        assert_eq!(
            MacAlgorithm::Cmac.mac(&key, &[], &[]).unwrap(),
            hex!("bb1d6929e95937287fa37d129b756746")
        );
        assert_eq!(
            MacAlgorithm::Cmac
                .mac(&key, &[], &hex!("6bc1bee22e409f96e93d7e117393172a"))
                .unwrap(),
            hex!("070a16b46b4d4144f79bdd9dd04a287c")
        );
        // Splitting between auxiliary data and data does not matter
        assert_eq!(
            MacAlgorithm::Cmac
                .mac(&key, &hex!("6bc1bee22e409f96"), &hex!("e93d7e117393172a"))
                .unwrap(),
            hex!("070a16b46b4d4144f79bdd9dd04a287c")
        );
    }

    // ICAO Doc 9303 part 11, worked example of secure messaging after BAC
    #[test]
    fn icao_3des() {
        let ks_enc = hex!("979EC13B1CBFE9DCD01AB0FED307EAE5");
        let ks_mac = hex!("F1CB1F1FB5ADF208806B89DC579DC1F8");

        let mut data = pad(&hex!("011E"), 8);
        Cipher::Tdes.encrypt(&ks_enc, &[0; 8], &mut data).unwrap();
        assert_eq!(data, hex!("6375432908C044F6"));
        assert_eq!(
            Cipher::Tdes.derive_iv(&ks_enc, &hex!("887022120C06C227")),
            Ok(vec![0; 8])
        );

        let mac = MacAlgorithm::RetailMac
            .mac(
                &ks_mac,
                &hex!("887022120C06C227"),
                &hex!("0CA4020C80000000 8709016375432908C044F6 8000000000"),
            )
            .unwrap();
        assert_eq!(mac, hex!("BF8B92D635FF24F8"));
    }

    #[test]
    fn key_lengths() {
        assert_eq!(
            Cipher::Aes256.encrypt(&[0; 16], &[0; 16], &mut [0; 16]),
            Err(Error::InvalidKeyLength)
        );
        assert_eq!(
            MacAlgorithm::RetailMac.mac(&[0; 24], &[], &[0; 8]),
            Err(Error::InvalidKeyLength)
        );
        assert_eq!(
            Cipher::Tdes.decrypt_padded(&[0; 32], &[0; 8], &[0; 8]),
            Err(Error::InvalidKeyLength)
        );
        for cipher in [Cipher::Tdes, Cipher::Aes128, Cipher::Aes192, Cipher::Aes256] {
            let key = vec![0x42; cipher.key_len()];
            let iv = vec![0; cipher.block_size()];
            let cryptogram = cipher
                .encrypt_padded(&key, &iv, b"secure messaging")
                .unwrap();
            assert_eq!(cryptogram.len() % cipher.block_size(), 0);
            assert_eq!(
                cipher.decrypt_padded(&key, &iv, &cryptogram).unwrap(),
                b"secure messaging"
            );
            assert!(cipher.mac_algorithm().check_key(&key).is_ok());
        }
    }
}
