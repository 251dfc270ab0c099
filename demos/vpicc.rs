// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: CC0-1.0

// To use this, make sure that you have vpcd from vsmartcard installed and configured (e. g.
// install vsmartcard-vpcd on Debian).  You might have to restart your pcscd, e. g.
// `systemctl restart pcscd pcscd.socket`.
//
// The card serves EF.CardAccess (011C) and EF.COM (011E) through SELECT and READ BINARY.  The
// proprietary command `80 10 00 00` establishes a 3DES secure channel with the session keys of
// the ICAO Doc 9303 worked example, so the protected APDUs of that example can be replayed.
//
// Set `RUST_LOG=eidcard=trace` to see the exchanged APDUs.

use eidcard::{
    security::{Mechanism, SecurityContext},
    sm::{crypto::Cipher, ChannelState},
    types::PasswordRef,
    Application, Card, Context, Options, Status, VirtualCard,
};
use hex_literal::hex;

const EF_CARD_ACCESS: &[u8] = &hex!("3114 3012 060A 04007F00070202040202 0201 02 0201 0D");
const EF_COM: &[u8] = &hex!("60145F0104303130365F36063034303030305C026175");

#[derive(Debug, Default)]
struct Demo {
    selected: Option<&'static [u8]>,
}

impl Application for Demo {
    fn process(&mut self, mut ctx: Context<'_>) -> Result<(), Status> {
        let command = ctx.command;
        match (command.class().into_inner() & 0xF0, u8::from(command.instruction())) {
            (0x00, 0xA4) => {
                self.selected = match ctx.data() {
                    [0x01, 0x1C] => Some(EF_CARD_ACCESS),
                    [0x01, 0x1E] => Some(EF_COM),
                    _ => return Err(Status::NotFound),
                };
                Ok(())
            }
            (0x00, 0xB0) => {
                let file = self.selected.ok_or(Status::ConditionsOfUseNotSatisfied)?;
                let offset = usize::from(u16::from_be_bytes([command.p1 & 0x7F, command.p2]));
                let file = file.get(offset..).ok_or(Status::IncorrectP1OrP2Parameter)?;
                let len = command.expected().min(file.len());
                ctx.reply.expand(&file[..len])
            }
            (0x80, 0x10) => {
                let state = ChannelState::builder()
                    .cipher(Cipher::Tdes)
                    .enc_key(&hex!("979EC13B1CBFE9DCD01AB0FED307EAE5"))
                    .mac_key(&hex!("F1CB1F1FB5ADF208806B89DC579DC1F8"))
                    .ssc(0x887022120C06C226)
                    .build(None)
                    .map_err(Status::from)?;
                ctx.updates.mechanism(
                    SecurityContext::Global,
                    Mechanism::PasswordUsed {
                        password: PasswordRef::Mrz,
                    },
                );
                ctx.updates.channel(state);
                Ok(())
            }
            _ => Err(Status::InstructionNotSupportedOrInvalid),
        }
    }

    fn reset(&mut self) {
        self.selected = None;
    }
}

fn main() {
    env_logger::init();

    let mut options = Options::default();
    options.log_apdus = true;
    let card = Card::new(Demo::default(), options);
    let mut vpicc_card = VirtualCard::new(card);
    let vpicc = vpicc::connect().expect("failed to connect to vpicc");
    vpicc
        .run(&mut vpicc_card)
        .expect("failed to run vpicc smartcard");
}
