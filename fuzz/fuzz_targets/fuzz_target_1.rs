// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: CC0-1.0

#![no_main]
use eidcard_fuzz::{FuzzApp, Input};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: Input| {
    #[cfg(feature = "log")]
    env_logger::try_init().ok();

    let Input {
        commands,
        cipher,
        ssc,
    } = input;
    let app = FuzzApp {
        cipher: cipher.into(),
        ssc,
    };
    let mut card = eidcard::Card::new(app, eidcard::Options::default());

    for data in commands {
        let response = card.handle_bytes(&data);
        assert!(response.len() >= 2);
    }
});
