// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

#![allow(unused)]

use std::collections::BTreeMap;

use eidcard::{
    apdu::{build, CommandApdu, CommandExt, ResponseApdu, SM_CLASS_BITS},
    security::AccessCondition,
    sm::{crypto::pad, crypto::Cipher, ChannelState},
    tlv::{serialize_len, take_do},
    types::LifeCycle,
    Application, Card, Context, Options, Status, Update,
};
use hex_literal::hex;

pub const EF_COM: &[u8] = &hex!("60145F0104303130365F36063034303030305C026175");
pub const FID_EF_COM: u16 = 0x011E;

/// Echoes the command data
pub const INS_ECHO: u8 = 0xEE;
/// Echoes the command data, odd instruction
pub const INS_ECHO_ODD: u8 = 0xEF;

pub const ICAO_K_ENC: [u8; 16] = hex!("979EC13B1CBFE9DCD01AB0FED307EAE5");
pub const ICAO_K_MAC: [u8; 16] = hex!("F1CB1F1FB5ADF208806B89DC579DC1F8");
pub const ICAO_SSC: u64 = 0x887022120C06C226;

/// Minimal card application: a flat file system and an echo command.
///
/// Every command hands the updates queued in `pending` to the card.
#[derive(Debug)]
pub struct TestApp {
    pub lifecycle: LifeCycle,
    pub files: BTreeMap<u16, (Vec<u8>, AccessCondition)>,
    pub selected: Option<u16>,
    pub pending: Vec<Update>,
    pub seen: Vec<(CommandApdu, bool)>,
    pub resets: usize,
}

impl Default for TestApp {
    fn default() -> Self {
        let mut files = BTreeMap::new();
        files.insert(FID_EF_COM, (EF_COM.to_vec(), AccessCondition::Always));
        Self {
            lifecycle: LifeCycle::OperationalActivated,
            files,
            selected: None,
            pending: Vec::new(),
            seen: Vec::new(),
            resets: 0,
        }
    }
}

impl Application for TestApp {
    fn process(&mut self, mut ctx: Context<'_>) -> Result<(), Status> {
        let command = ctx.command;
        self.seen.push((command.clone(), ctx.secured));
        for update in self.pending.drain(..) {
            ctx.updates.push(update);
        }

        match u8::from(command.instruction()) {
            0xA4 => {
                let fid = match command.data().as_slice() {
                    [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                    _ => return Err(Status::IncorrectDataParameter),
                };
                if !self.files.contains_key(&fid) {
                    return Err(Status::NotFound);
                }
                self.selected = Some(fid);
                Ok(())
            }
            0xB0 => {
                let (content, condition) = self
                    .selected
                    .and_then(|fid| self.files.get(&fid))
                    .ok_or(Status::ConditionsOfUseNotSatisfied)?;
                if !ctx.check_access(self.lifecycle, condition) {
                    return Err(Status::SecurityStatusNotSatisfied);
                }
                let offset = usize::from(u16::from_be_bytes([command.p1 & 0x7F, command.p2]));
                let content = content
                    .get(offset..)
                    .ok_or(Status::IncorrectP1OrP2Parameter)?;
                let len = command.expected().min(content.len());
                ctx.reply.expand(&content[..len])
            }
            INS_ECHO | INS_ECHO_ODD => ctx.reply.expand(command.data()),
            _ => Err(Status::InstructionNotSupportedOrInvalid),
        }
    }

    fn reset(&mut self) {
        self.selected = None;
        self.resets += 1;
    }
}

pub fn card() -> Card<TestApp> {
    Card::new(TestApp::default(), Options::default())
}

pub fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut buf = vec![tag];
    buf.extend_from_slice(&serialize_len(value.len()).unwrap());
    buf.extend_from_slice(value);
    buf
}

/// Terminal side of a secure channel
#[derive(Clone, Debug)]
pub struct Terminal {
    pub state: ChannelState,
}

impl Terminal {
    pub fn new(cipher: Cipher, enc_key: &[u8], mac_key: &[u8], ssc: u64) -> Self {
        let state = ChannelState::builder()
            .cipher(cipher)
            .enc_key(enc_key)
            .mac_key(mac_key)
            .ssc(ssc)
            .build(None)
            .unwrap();
        Self { state }
    }

    /// Terminal for the session keys of the ICAO Doc 9303 worked example
    pub fn icao() -> Self {
        Self::new(Cipher::Tdes, &ICAO_K_ENC, &ICAO_K_MAC, ICAO_SSC)
    }

    /// Terminal with distinct keys derived from `seed`
    pub fn seeded(cipher: Cipher, seed: u8, ssc: u64) -> Self {
        let enc_key: Vec<u8> = (0..cipher.key_len() as u8)
            .map(|i| i.wrapping_mul(7) ^ seed)
            .collect();
        let mac_key: Vec<u8> = (0..cipher.key_len() as u8)
            .map(|i| i.wrapping_mul(13) ^ seed ^ 0x5A)
            .collect();
        Self::new(cipher, &enc_key, &mac_key, ssc)
    }

    /// The card side of this channel
    pub fn card_channel(&self) -> ChannelState {
        self.state.snapshot().restore().unwrap()
    }

    pub fn ssc(&self) -> u64 {
        self.state.ssc()
    }

    pub fn wrap(&mut self, command: &CommandApdu) -> CommandApdu {
        self.state.next_incoming();
        let block_size = self.state.cipher().block_size();
        let [class, instruction, p1, p2] = command.header();

        let mut objects = Vec::new();
        if !command.data().is_empty() {
            let cryptogram = self.state.encrypt(command.data()).unwrap();
            if instruction % 2 == 0 {
                let mut value = vec![0x01];
                value.extend_from_slice(&cryptogram);
                objects.extend(tlv(0x87, &value));
            } else {
                objects.extend(tlv(0x85, &cryptogram));
            }
        }
        let le = command.expected();
        if le != 0 {
            let value = if command.extended {
                vec![(le >> 8) as u8, le as u8]
            } else {
                vec![le as u8]
            };
            objects.extend(tlv(0x97, &value));
        }

        let class = class | SM_CLASS_BITS;
        let mut mac_input = pad(&[class, instruction, p1, p2], block_size);
        if !objects.is_empty() {
            mac_input.extend(pad(&objects, block_size));
        }
        let mac = self.state.mac(&mac_input).unwrap();
        objects.extend(tlv(0x8E, &mac));

        let le = if command.extended { 0x10000 } else { 0x100 };
        build([class, instruction, p1, p2], &objects, le, command.extended).unwrap()
    }

    pub fn unwrap(&mut self, response: &ResponseApdu) -> Result<ResponseApdu, &'static str> {
        self.state.next_outgoing();
        let block_size = self.state.cipher().block_size();

        let mut cryptogram = None;
        let mut status = None;
        let mut remainder = response.data.as_slice();
        loop {
            let (object, rem) = take_do(remainder).ok_or("malformed data objects")?;
            match object.tag {
                0x87 => {
                    let (indicator, value) = object
                        .value
                        .split_first()
                        .ok_or("missing padding indicator")?;
                    if *indicator != 0x01 {
                        return Err("wrong padding indicator");
                    }
                    cryptogram = Some(value);
                }
                0x85 => cryptogram = Some(object.value),
                0x99 => status = Some(object.value),
                0x8E => {
                    let protected = &response.data[..response.data.len() - remainder.len()];
                    if self.state.mac(&pad(protected, block_size)).unwrap() != object.value {
                        return Err("wrong MAC");
                    }
                    if !rem.is_empty() {
                        return Err("data object after the MAC");
                    }
                    break;
                }
                _ => return Err("unexpected data object"),
            }
            remainder = rem;
        }

        let status = match status {
            Some(&[sw1, sw2]) => Status::from([sw1, sw2]),
            _ => return Err("missing status"),
        };
        if status != response.status {
            return Err("status mismatch");
        }
        let data = match cryptogram {
            None => Vec::new(),
            Some(cryptogram) => self
                .state
                .decrypt(cryptogram)
                .map_err(|_| "wrong padding")?,
        };
        Ok(ResponseApdu::new(data, status))
    }

    /// Sends a protected command and unwraps the response
    pub fn exchange<A: Application>(
        &mut self,
        card: &mut Card<A>,
        command: &CommandApdu,
    ) -> ResponseApdu {
        let protected = self.wrap(command);
        let response = card.handle(&protected);
        self.unwrap(&response).unwrap()
    }
}

/// Establishes the channel of `terminal` on the card with a plaintext SELECT
pub fn establish(card: &mut Card<TestApp>, terminal: &Terminal) {
    card.app_mut()
        .pending
        .push(Update::Channel(terminal.card_channel()));
    let response = card.handle(&select(FID_EF_COM));
    assert_eq!(response.status, Status::Success);
    assert!(card.codec().is_active());
}

pub fn select(fid: u16) -> CommandApdu {
    build(hex!("00A4020C"), &fid.to_be_bytes(), 0, false).unwrap()
}

pub fn read_binary(offset: u16, le: usize) -> CommandApdu {
    let [p1, p2] = offset.to_be_bytes();
    build([0x00, 0xB0, p1, p2], &[], le, false).unwrap()
}

pub fn echo(instruction: u8, data: &[u8]) -> CommandApdu {
    build([0x00, instruction, 0x00, 0x00], data, 0x100, false).unwrap()
}
