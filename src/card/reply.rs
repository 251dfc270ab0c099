// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use core::ops::{Deref, DerefMut};

use iso7816::Status;
use crate::tlv::serialize_len;

/// Maximum length of a response body (extended length `Le` of `0000`)
pub const MAX_REPLY_LEN: usize = 0x10000;

/// Response body buffer handed to the [`Application`](crate::Application)
#[derive(Debug)]
pub struct Reply<'v>(pub &'v mut Vec<u8>);

impl<'v> Deref for Reply<'v> {
    type Target = Vec<u8>;
    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl<'v> DerefMut for Reply<'v> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.0
    }
}

impl<'v> Reply<'v> {
    /// Extend the reply and return an error if it would exceed [`MAX_REPLY_LEN`]
    ///
    /// Named expand and not extend to avoid conflicts with Deref
    pub fn expand(&mut self, data: &[u8]) -> Result<(), Status> {
        if self.0.len() + data.len() > MAX_REPLY_LEN {
            error!("Reply buffer full");
            return Err(Status::NotEnoughMemory);
        }
        self.0.extend_from_slice(data);
        Ok(())
    }

    fn encoded_len(len: usize) -> Result<heapless::Vec<u8, 3>, Status> {
        serialize_len(len).ok_or_else(|| {
            error!("Length too long to be encoded");
            Status::UnspecifiedNonpersistentExecutionError
        })
    }

    /// Prepend the length to some data.
    ///
    /// Input:
    /// AAAAAAAAAABBBBBBB
    ///           ↑
    ///          offset
    ///
    /// Output:
    ///
    /// AAAAAAAAAA 7 BBBBBBB
    /// (There are seven Bs, the length is encoded in the BER definite form)
    pub fn prepend_len(&mut self, offset: usize) -> Result<(), Status> {
        if self.len() < offset {
            error!("`prepend_len` called with offset lower than buffer length");
            return Err(Status::UnspecifiedNonpersistentExecutionError);
        }
        let len = self.len() - offset;
        let encoded = Self::encoded_len(len)?;
        self.expand(&encoded)?;
        self[offset..].rotate_right(encoded.len());
        Ok(())
    }

    /// Appends an encoded length
    pub fn append_len(&mut self, len: usize) -> Result<(), Status> {
        let encoded = Self::encoded_len(len)?;
        self.expand(&encoded)
    }

    /// Appends a data object with a one byte tag
    pub fn append_do(&mut self, tag: u8, value: &[u8]) -> Result<(), Status> {
        self.expand(&[tag])?;
        self.append_len(value.len())?;
        self.expand(value)
    }

    /// Reborrows the reply
    pub fn lend(&mut self) -> Reply<'_> {
        Reply(self.0)
    }
}
