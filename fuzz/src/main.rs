// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: CC0-1.0

use arbitrary::Arbitrary;
use hex_literal::hex;

use std::fs::File;
use std::io::Write;

use eidcard_fuzz::Input;

/// Commands that help the fuzzer reach the secure messaging code
#[derive(Debug, Clone)]
enum Command {
    Establish,
    ReadBinary,
    Echo(Vec<u8>),
    Raw(Vec<u8>),
}

impl Command {
    fn as_bytes(&self) -> Vec<u8> {
        match self.clone() {
            Self::Establish => Vec::from(hex!("80100000").as_slice()),
            Self::ReadBinary => Vec::from(hex!("00B00000 04").as_slice()),
            Self::Echo(mut data) => {
                // Avoid extended length
                data.truncate(255);
                let mut res = Vec::from(hex!("00EE0000").as_slice());
                res.push(data.len() as u8);
                res.extend_from_slice(&data);
                res
            }
            Self::Raw(data) => data,
        }
    }
}

fn as_corpus(commands: &[Command]) -> Vec<u8> {
    let mut res = Vec::new();
    for cmd in commands {
        res.push(1);
        for b in cmd.as_bytes() {
            res.push(1);
            res.push(b);
        }
        res.push(0);
    }

    // Cipher
    res.extend_from_slice(&[0; 4]);
    // SSC
    res.extend_from_slice(&hex!("887022120C06C226"));

    let mut unstructured = arbitrary::Unstructured::new(&res);
    let parsed = Input::arbitrary(&mut unstructured).unwrap();
    assert_eq!(commands.len(), parsed.commands.len());
    for (idx, cmd) in commands.iter().enumerate() {
        assert_eq!(cmd.as_bytes(), parsed.commands[idx])
    }
    res
}

fn write_corpus(commands: &[Command], file: &str) {
    let mut f = File::create(format!("corpus/{file}")).unwrap();
    f.write_all(&as_corpus(commands)).unwrap();
    f.flush().unwrap();
    println!("Wrote {file}");
}

fn main() {
    write_corpus(
        &[Command::ReadBinary, Command::Echo(vec![1; 32])],
        "plaintext",
    );
    write_corpus(
        &[
            Command::Establish,
            Command::Raw(hex!("0CB000000D9701048E08ED6705417E96BA5500").to_vec()),
            Command::Raw(hex!("0CB00000 03 970104 00").to_vec()),
        ],
        "protected",
    );
    write_corpus(
        &[
            Command::Establish,
            Command::Echo(vec![0x80; 17]),
            Command::Establish,
            Command::Raw(hex!("0CEE0000 0A 8E08 0001020304050607 00").to_vec()),
        ],
        "reestablish",
    );
}
