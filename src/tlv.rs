// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Utilities for dealing with TLV (Tag-Length-Value) encoded data
//!
//! Only the subset of BER-TLV needed for secure messaging data objects is supported: tags of one
//! or two bytes and definite lengths of up to three bytes.

/// A data object found in a TLV encoded buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DataObject<'input> {
    /// The tag, one byte tags are stored in the low byte
    pub tag: u16,
    /// The value field
    pub value: &'input [u8],
    /// The complete encoding of the data object (tag, length and value)
    pub raw: &'input [u8],
}

/// Returns the first data object and the remainder
pub fn take_do(data: &[u8]) -> Option<(DataObject<'_>, &[u8])> {
    let (tag, remainder) = take_tag(data)?;
    let (len, remainder) = take_len(remainder)?;
    if remainder.len() < len {
        warn!("Tried to parse TLV with data length shorter that the length data");
        None
    } else {
        let (value, remainder) = remainder.split_at(len);
        let raw = &data[..data.len() - remainder.len()];
        Some((DataObject { tag, value, raw }, remainder))
    }
}

// See
// https://www.emvco.com/wp-content/uploads/2017/05/EMV_v4.3_Book_3_Application_Specification_20120607062110791.pdf
// Annex B1
fn take_tag(data: &[u8]) -> Option<(u16, &[u8])> {
    let b1 = *data.first()?;
    if (b1 & 0x1f) == 0x1f {
        let b2 = *data.get(1)?;

        if (b2 & 0b10000000) != 0 {
            warn!("Got a tag larger than 2 bytes: {data:x?}");
            return None;
        }
        Some((u16::from_be_bytes([b1, b2]), &data[2..]))
    } else {
        Some((u16::from_be_bytes([0, b1]), &data[1..]))
    }
}

/// Returns the decoded length and the remainder
pub fn take_len(data: &[u8]) -> Option<(usize, &[u8])> {
    let l1 = *data.first()?;
    if l1 <= 0x7F {
        Some((l1 as usize, &data[1..]))
    } else if l1 == 0x81 {
        Some((*data.get(1)? as usize, &data[2..]))
    } else {
        if l1 != 0x82 {
            warn!(
                "Got an unexpected length tag: {l1:x}, data: {:x?}",
                &data[..data.len().min(3)]
            );
            return None;
        }
        let l2 = *data.get(1)?;
        let l3 = *data.get(2)?;
        let len = u16::from_be_bytes([l2, l3]) as usize;
        Some((len, &data[3..]))
    }
}

/// Encodes a length in the definite form.
///
/// Returns `None` for lengths that do not fit in two bytes.
pub fn serialize_len(len: usize) -> Option<heapless::Vec<u8, 3>> {
    let mut buf = heapless::Vec::new();
    if let Ok(len) = u8::try_from(len) {
        if len <= 0x7f {
            buf.extend_from_slice(&[len]).ok();
        } else {
            buf.extend_from_slice(&[0x81, len]).ok();
        }
    } else if let Ok(len) = u16::try_from(len) {
        let arr = len.to_be_bytes();
        buf.extend_from_slice(&[0x82, arr[0], arr[1]]).ok();
    } else {
        return None;
    }
    Some(buf)
}
