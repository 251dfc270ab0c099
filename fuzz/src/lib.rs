// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: CC0-1.0

use arbitrary::Arbitrary;
use eidcard::{sm::crypto::Cipher, sm::ChannelState, Application, Context, Status};
use hex_literal::hex;

pub const EF_COM: &[u8] = &hex!("60145F0104303130365F36063034303030305C026175");

#[derive(Arbitrary, Debug, Clone, Copy)]
pub enum FuzzCipher {
    Tdes,
    Aes128,
    Aes192,
    Aes256,
}

impl From<FuzzCipher> for Cipher {
    fn from(cipher: FuzzCipher) -> Self {
        match cipher {
            FuzzCipher::Tdes => Self::Tdes,
            FuzzCipher::Aes128 => Self::Aes128,
            FuzzCipher::Aes192 => Self::Aes192,
            FuzzCipher::Aes256 => Self::Aes256,
        }
    }
}

#[derive(Arbitrary, Debug)]
pub struct Input {
    pub commands: Vec<Vec<u8>>,
    pub cipher: FuzzCipher,
    pub ssc: u64,
}

/// Serves EF.COM and establishes a channel with fixed keys on `80 10 00 00`
#[derive(Debug)]
pub struct FuzzApp {
    pub cipher: Cipher,
    pub ssc: u64,
}

impl FuzzApp {
    pub fn channel(&self) -> Option<ChannelState> {
        let key = vec![0x42; self.cipher.key_len()];
        ChannelState::builder()
            .cipher(self.cipher)
            .enc_key(&key)
            .mac_key(&key)
            .ssc(self.ssc)
            .build(None)
            .ok()
    }
}

impl Application for FuzzApp {
    fn process(&mut self, mut ctx: Context<'_>) -> Result<(), Status> {
        let command = ctx.command;
        match (command.class().into_inner() & 0xF0, u8::from(command.instruction())) {
            (0x00, 0xB0) => {
                let offset = usize::from(u16::from_be_bytes([command.p1 & 0x7F, command.p2]));
                let file = EF_COM.get(offset..).ok_or(Status::IncorrectP1OrP2Parameter)?;
                let len = command.expected().min(file.len());
                ctx.reply.expand(&file[..len])
            }
            (0x00, 0xEE) => ctx.reply.expand(command.data()),
            (0x80, 0x10) => {
                let state = self.channel().ok_or(Status::UnspecifiedCheckingError)?;
                ctx.updates.channel(state);
                Ok(())
            }
            _ => Err(Status::InstructionNotSupportedOrInvalid),
        }
    }
}
