//! Fixed-offset ABI word decoding
//!
//! Every payload we read (log data, call input, eth_call returns) is a run of
//! 32-byte words at known offsets. A [`Layout`] names the fields and one
//! generic decoder reads them, so adding a payload shape is a table entry.

use alloy_primitives::{Address, I256, U256};

use crate::error::DecodeError;

const WORD: usize = 32;

/// How the bytes of a field are interpreted
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    /// Unsigned big-endian integer
    Uint,
    /// Two's complement signed integer (sign-extended to the full word)
    Int,
    /// Address in the low 20 bytes of the word
    Address,
    /// Unsigned integer scaled down by `10^decimals`
    Fixed { decimals: u8 },
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    /// Byte offset into the payload
    pub offset: usize,
    pub len: usize,
    pub kind: FieldKind,
}

impl Field {
    const fn word(name: &'static str, index: usize, kind: FieldKind) -> Self {
        Self {
            name,
            offset: index * WORD,
            len: WORD,
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub name: &'static str,
    /// Bytes skipped before field offsets apply (4 for call input selectors)
    pub skip: usize,
    pub fields: &'static [Field],
}

impl Layout {
    /// Minimum payload length that covers every field
    pub fn min_len(&self) -> usize {
        self.skip
            + self
                .fields
                .iter()
                .map(|f| f.offset + f.len)
                .max()
                .unwrap_or(0)
    }
}

/// veDOLO `Withdraw` event data: tokenId, value, ts
pub const WITHDRAW_DATA: Layout = Layout {
    name: "withdraw",
    skip: 0,
    fields: &[
        Field::word("token_id", 0, FieldKind::Uint),
        Field::word("value", 1, FieldKind::Fixed { decimals: 18 }),
        Field::word("timestamp", 2, FieldKind::Uint),
    ],
};

/// Exercise call input. Only `lock_end` is read but the call carries four
/// parameter words and shorter inputs are rejected.
pub const EXERCISE_INPUT: Layout = Layout {
    name: "exercise",
    skip: 4,
    fields: &[
        Field::word("param_0", 0, FieldKind::Uint),
        Field::word("param_1", 1, FieldKind::Uint),
        Field::word("lock_end", 2, FieldKind::Uint),
        Field::word("param_3", 3, FieldKind::Uint),
    ],
};

/// `locked(uint256)` return: int128 amount, uint256 end
pub const LOCKED_RETURN: Layout = Layout {
    name: "locked",
    skip: 0,
    fields: &[
        Field::word("amount", 0, FieldKind::Int),
        Field::word("end", 1, FieldKind::Uint),
    ],
};

/// Any single-word uint256 return
pub const UINT_RETURN: Layout = Layout {
    name: "uint256",
    skip: 0,
    fields: &[Field::word("value", 0, FieldKind::Uint)],
};

/// ERC-20 `Transfer` log: topics[1..3] are the indexed from/to, data is the value
pub const TRANSFER_TOPICS: Layout = Layout {
    name: "transfer_topics",
    skip: 0,
    fields: &[
        Field::word("from", 0, FieldKind::Address),
        Field::word("to", 1, FieldKind::Address),
    ],
};

/// One indexed address topic
pub const INDEXED_ADDRESS: Layout = Layout {
    name: "indexed_address",
    skip: 0,
    fields: &[Field::word("address", 0, FieldKind::Address)],
};

/// Single decoded value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Uint(U256),
    Int(I256),
    Address(Address),
    Fixed(f64),
}

/// Result of decoding a payload against a layout, in layout order
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    values: Vec<(&'static str, Value)>,
}

impl Decoded {
    fn get(&self, name: &'static str) -> Result<Value, DecodeError> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .ok_or(DecodeError::MissingField(name))
    }

    pub fn uint(&self, name: &'static str) -> Result<U256, DecodeError> {
        match self.get(name)? {
            Value::Uint(v) => Ok(v),
            _ => Err(DecodeError::WrongKind(name)),
        }
    }

    pub fn u64(&self, name: &'static str) -> Result<u64, DecodeError> {
        u64::try_from(self.uint(name)?).map_err(|_| DecodeError::Overflow(name))
    }

    pub fn i64(&self, name: &'static str) -> Result<i64, DecodeError> {
        i64::try_from(self.uint(name)?).map_err(|_| DecodeError::Overflow(name))
    }

    pub fn int(&self, name: &'static str) -> Result<I256, DecodeError> {
        match self.get(name)? {
            Value::Int(v) => Ok(v),
            _ => Err(DecodeError::WrongKind(name)),
        }
    }

    pub fn address(&self, name: &'static str) -> Result<Address, DecodeError> {
        match self.get(name)? {
            Value::Address(v) => Ok(v),
            _ => Err(DecodeError::WrongKind(name)),
        }
    }

    pub fn fixed(&self, name: &'static str) -> Result<f64, DecodeError> {
        match self.get(name)? {
            Value::Fixed(v) => Ok(v),
            _ => Err(DecodeError::WrongKind(name)),
        }
    }
}

/// Decode every field of `layout` from `bytes`
pub fn decode(layout: &Layout, bytes: &[u8]) -> Result<Decoded, DecodeError> {
    let mut values = Vec::with_capacity(layout.fields.len());

    for field in layout.fields {
        let start = layout.skip + field.offset;
        let end = start + field.len;
        let slice = bytes.get(start..end).ok_or(DecodeError::TooShort {
            field: field.name,
            needed: end,
            len: bytes.len(),
        })?;

        let value = match field.kind {
            FieldKind::Uint => Value::Uint(read_uint(field.name, slice)?),
            FieldKind::Int => Value::Int(I256::from_raw(read_uint(field.name, slice)?)),
            FieldKind::Address => {
                if slice.len() < 20 {
                    return Err(DecodeError::TooShort {
                        field: field.name,
                        needed: 20,
                        len: slice.len(),
                    });
                }
                Value::Address(Address::from_slice(&slice[slice.len() - 20..]))
            }
            FieldKind::Fixed { decimals } => {
                Value::Fixed(scale(read_uint(field.name, slice)?, decimals))
            }
        };
        values.push((field.name, value));
    }

    Ok(Decoded { values })
}

/// Decode a `0x`-prefixed hex payload against `layout`
pub fn decode_hex(layout: &Layout, payload: &str) -> Result<Decoded, DecodeError> {
    decode(layout, &hex_bytes(payload)?)
}

/// Parse a `0x`-prefixed (or bare) hex string into bytes
pub fn hex_bytes(payload: &str) -> Result<Vec<u8>, DecodeError> {
    let raw = payload.strip_prefix("0x").unwrap_or(payload);
    alloy_primitives::hex::decode(raw).map_err(|e| DecodeError::InvalidHex(e.to_string()))
}

/// Parse a hex quantity such as `0x1b4` or a data word, tolerating `0x`
pub fn hex_quantity(value: &str) -> Result<U256, DecodeError> {
    let raw = value.strip_prefix("0x").unwrap_or(value);
    if raw.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(raw, 16).map_err(|e| DecodeError::InvalidHex(e.to_string()))
}

pub fn hex_u64(value: &str) -> Result<u64, DecodeError> {
    u64::try_from(hex_quantity(value)?).map_err(|_| DecodeError::Overflow("quantity"))
}

fn read_uint(name: &'static str, slice: &[u8]) -> Result<U256, DecodeError> {
    if slice.len() > WORD {
        return Err(DecodeError::Overflow(name));
    }
    Ok(U256::from_be_slice(slice))
}

/// Scale a raw token amount down by `10^decimals`
pub fn scale(raw: U256, decimals: u8) -> f64 {
    let whole: f64 = raw.to_string().parse().unwrap_or(f64::MAX);
    whole / 10f64.powi(decimals as i32)
}

pub fn scale_signed(raw: I256, decimals: u8) -> f64 {
    let whole: f64 = raw.to_string().parse().unwrap_or(0.0);
    whole / 10f64.powi(decimals as i32)
}

/// ABI-encode a single uint256 argument after a selector
pub fn encode_uint_call(selector: &str, arg: U256) -> String {
    format!(
        "{selector}{}",
        alloy_primitives::hex::encode(arg.to_be_bytes::<32>())
    )
}

/// ABI-encode a single address argument after a selector
pub fn encode_address_call(selector: &str, arg: Address) -> String {
    format!("{selector}{:0>64}", alloy_primitives::hex::encode(arg.as_slice()))
}

/// Lowercase `0x` address string, the canonical key form
pub fn lower_hex(addr: &Address) -> String {
    format!("{addr:#x}")
}
