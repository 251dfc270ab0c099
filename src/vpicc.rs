// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use crate::card::{Application, Card};

/// Virtual eID smart card.
///
/// This struct provides a virtual smart card that can be used with `vpicc-rs` and
/// [`vsmartcard`](https://frankmorgner.github.io/vsmartcard/) to emulate the card.
#[derive(Debug)]
pub struct VirtualCard<A: Application> {
    card: Card<A>,
}

impl<A: Application> VirtualCard<A> {
    /// Creates a new virtual smart card from the given card.
    pub fn new(card: Card<A>) -> Self {
        Self { card }
    }

    /// The emulated card
    pub fn card(&self) -> &Card<A> {
        &self.card
    }
}

impl<A: Application> vpicc::VSmartCard for VirtualCard<A> {
    fn power_on(&mut self) {}

    fn power_off(&mut self) {
        self.card.reset();
    }

    fn reset(&mut self) {
        self.card.reset();
    }

    fn execute(&mut self, request: &[u8]) -> Vec<u8> {
        log::trace!("Received request {:x?}", request);
        let response = self.card.handle_bytes(request);
        log::trace!("Sending response {:x?}", response);
        response
    }
}
