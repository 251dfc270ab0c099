// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use core::fmt;

use subtle::ConstantTimeEq;

/// Compares two byte strings in constant time (for equal lengths).
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Formats bytes as contiguous upper case hex for APDU traces.
pub struct Hex<'a>(pub &'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

/// (De)serializes fixed capacity buffers as byte strings, e.g. key material in channel
/// snapshots.
pub mod serde_bytes_heapless {
    use serde::{
        de::{Error, SeqAccess, Visitor},
        Deserializer, Serializer,
    };

    pub fn serialize<S, const N: usize>(
        v: &heapless::Vec<u8, N>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(v)
    }

    struct BytesVisitor<const N: usize>;

    impl<'de, const N: usize> Visitor<'de> for BytesVisitor<N> {
        type Value = heapless::Vec<u8, N>;

        fn expecting(&self, formatter: &mut core::fmt::Formatter) -> core::fmt::Result {
            write!(formatter, "byte string of at most {N} bytes")
        }

        fn visit_bytes<E>(self, v: &[u8]) -> Result<heapless::Vec<u8, N>, E>
        where
            E: Error,
        {
            heapless::Vec::from_slice(v).map_err(|_| E::invalid_length(v.len(), &self))
        }

        fn visit_seq<V>(self, mut visitor: V) -> Result<heapless::Vec<u8, N>, V::Error>
        where
            V: SeqAccess<'de>,
        {
            let mut bytes = heapless::Vec::new();
            while let Some(b) = visitor.next_element()? {
                bytes
                    .push(b)
                    .map_err(|_| V::Error::invalid_length(N + 1, &self))?;
            }
            Ok(bytes)
        }
    }

    pub fn deserialize<'de, D, const N: usize>(
        deserializer: D,
    ) -> Result<heapless::Vec<u8, N>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_bytes(BytesVisitor::<N>)
    }
}
