// siwe-auth/src/abi.rs
//! Just enough Solidity ABI encoding for the contract-wallet calls.

use thiserror::Error;

use crate::address::Address;

pub(crate) const WORD: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("malformed ABI data at offset {0}")]
pub struct AbiError(pub usize);

pub(crate) fn word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

pub(crate) fn address_word(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

pub(crate) fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

/// Append a dynamic `bytes` tail: a length word, then the data zero-padded to a word boundary.
pub(crate) fn push_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&word(bytes.len() as u64));
    out.extend_from_slice(bytes);
    out.resize(out.len() + padded_len(bytes.len()) - bytes.len(), 0);
}

/// Bounds-checked reader over ABI-encoded data. Offsets are relative to the
/// start of the slice the decoder was built on.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn word(&self, at: usize) -> Result<&'a [u8], AbiError> {
        let end = at.checked_add(WORD).ok_or(AbiError(at))?;
        self.data.get(at..end).ok_or(AbiError(at))
    }

    pub(crate) fn read_usize(&self, at: usize) -> Result<usize, AbiError> {
        let word = self.word(at)?;
        if word[..24].iter().any(|b| *b != 0) {
            return Err(AbiError(at));
        }
        let mut value = [0u8; 8];
        value.copy_from_slice(&word[24..]);
        usize::try_from(u64::from_be_bytes(value)).map_err(|_| AbiError(at))
    }

    pub(crate) fn read_bool(&self, at: usize) -> Result<bool, AbiError> {
        match self.read_usize(at)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(AbiError(at)),
        }
    }

    pub(crate) fn read_address(&self, at: usize) -> Result<Address, AbiError> {
        let word = self.word(at)?;
        if word[..12].iter().any(|b| *b != 0) {
            return Err(AbiError(at));
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&word[12..]);
        Ok(Address::new(bytes))
    }

    /// Data starting `skip` bytes in.
    pub(crate) fn skip(&self, skip: usize) -> Result<Decoder<'a>, AbiError> {
        self.data.get(skip..).map(Decoder::new).ok_or(AbiError(skip))
    }

    /// Follow the offset stored at `at` to a dynamic tail.
    pub(crate) fn tail(&self, at: usize) -> Result<Decoder<'a>, AbiError> {
        let offset = self.read_usize(at)?;
        self.skip(offset)
    }

    /// A `bytes` value whose length word sits at `at`.
    pub(crate) fn read_bytes(&self, at: usize) -> Result<&'a [u8], AbiError> {
        let len = self.read_usize(at)?;
        let start = at + WORD;
        let end = start.checked_add(len).ok_or(AbiError(at))?;
        self.data.get(start..end).ok_or(AbiError(at))
    }
}
