use bytes::{Buf, BufMut};

/// A key-value record stored in a node slot. Leaf pairs carry user values;
/// branch pairs carry a little-endian child page id as the value.
///
/// Slot format: `[key_len: u32 LE][key][value_len: u32 LE][value]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Pair {
    /// Serialized size of a pair with the given key and value lengths.
    pub fn encoded_len(key_len: usize, value_len: usize) -> usize {
        8 + key_len + value_len
    }

    pub fn encode(key: &[u8], value: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::encoded_len(key.len(), value.len()));
        buf.put_u32_le(key.len() as u32);
        buf.put_slice(key);
        buf.put_u32_le(value.len() as u32);
        buf.put_slice(value);
        buf
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        Self::encode(&self.key, &self.value)
    }

    /// Parses a pair out of a slot, copying key and value.
    pub fn from_bytes(mut data: &[u8]) -> Pair {
        let key_len = data.get_u32_le() as usize;
        let key = data[..key_len].to_vec();
        data.advance(key_len);
        let value_len = data.get_u32_le() as usize;
        let value = data[..value_len].to_vec();
        Pair { key, value }
    }
}
