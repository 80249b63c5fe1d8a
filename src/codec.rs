//! Byte-string codecs whose encoded forms compare like their inputs.
//!
//! The memcmp codec chops the input into 8-byte blocks, each followed by a
//! marker byte: `9` when another block follows, or the length of the final
//! (zero-padded) block. Comparing two encodings with plain `memcmp` yields
//! the lexicographic order of the original strings, which is the entire
//! point of the escape scheme. The tuple codec concatenates element
//! encodings; because each element occupies whole 9-byte groups, encoded
//! tuples also compare element-by-element.

/// Order-preserving encoding of a single byte string.
pub mod memcmp {
    use bytes::{Buf, BufMut};

    /// Length of one encoded group: an 8-byte block plus its marker byte.
    pub const ESCAPE_LENGTH: usize = 9;

    const BLOCK: usize = ESCAPE_LENGTH - 1;

    /// Exact size of `encode(src)` output for an input of `len` bytes.
    /// Empty input still occupies one zero-padded group.
    pub fn encoded_size(len: usize) -> usize {
        usize::max(1, (len + BLOCK - 1) / BLOCK) * ESCAPE_LENGTH
    }

    pub fn encode(mut src: &[u8], dst: &mut Vec<u8>) {
        loop {
            let copy_len = usize::min(BLOCK, src.len());
            dst.put_slice(&src[..copy_len]);
            src = &src[copy_len..];
            if src.is_empty() {
                dst.put_bytes(0, BLOCK - copy_len);
                dst.put_u8(copy_len as u8);
                break;
            }
            dst.put_u8(ESCAPE_LENGTH as u8);
        }
    }

    /// Decodes one encoded byte string from the front of `src`, consuming
    /// its groups. Input must be well-formed encoder output.
    pub fn decode<B: Buf>(src: &mut B, dst: &mut Vec<u8>) {
        while src.has_remaining() {
            let mut group = [0u8; ESCAPE_LENGTH];
            src.copy_to_slice(&mut group);
            let marker = group[BLOCK] as usize;
            dst.extend_from_slice(&group[..usize::min(BLOCK, marker)]);
            if marker < ESCAPE_LENGTH {
                break;
            }
        }
    }
}

/// Encoding of a tuple (sequence of byte strings) as a single byte string.
pub mod tuple {
    pub fn encode<T: AsRef<[u8]>>(elems: &[T], dst: &mut Vec<u8>) {
        for elem in elems {
            super::memcmp::encode(elem.as_ref(), dst);
        }
    }

    pub fn decode(bytes: &[u8], elems: &mut Vec<Vec<u8>>) {
        let mut rest = bytes;
        while !rest.is_empty() {
            let mut elem = Vec::new();
            super::memcmp::decode(&mut rest, &mut elem);
            elems.push(elem);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, RngCore};
    use std::cmp::Ordering;

    fn encode_one(src: &[u8]) -> Vec<u8> {
        let mut dst = Vec::new();
        memcmp::encode(src, &mut dst);
        dst
    }

    #[test]
    fn test_memcmp_round_trip() {
        for len in [0usize, 1, 7, 8, 9, 15, 16, 17, 100] {
            let src: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let encoded = encode_one(&src);
            assert_eq!(encoded.len(), memcmp::encoded_size(len));
            assert_eq!(encoded.len() % memcmp::ESCAPE_LENGTH, 0);

            let mut rest = &encoded[..];
            let mut decoded = Vec::new();
            memcmp::decode(&mut rest, &mut decoded);
            assert_eq!(decoded, src);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn test_memcmp_preserves_order() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let mut a = vec![0u8; rng.gen_range(0..24)];
            let mut b = vec![0u8; rng.gen_range(0..24)];
            rng.fill_bytes(&mut a);
            rng.fill_bytes(&mut b);
            // Small alphabet so prefixes and equal strings actually occur.
            for x in a.iter_mut().chain(b.iter_mut()) {
                *x %= 3;
            }
            assert_eq!(
                encode_one(&a).cmp(&encode_one(&b)),
                a.cmp(&b),
                "a={a:?} b={b:?}"
            );
        }
    }

    #[test]
    fn test_memcmp_prefix_orders_before_extension() {
        let a = b"ABCDEFGH".to_vec();
        let mut b = a.clone();
        b.push(0);
        assert_eq!(encode_one(&a).cmp(&encode_one(&b)), Ordering::Less);
        assert_eq!(encode_one(&[]).cmp(&encode_one(&[0])), Ordering::Less);
    }

    #[test]
    fn test_tuple_round_trip() {
        let tup: Vec<Vec<u8>> = vec![b"id1".to_vec(), b"Alice".to_vec(), vec![], b"Smith".to_vec()];
        let mut encoded = Vec::new();
        tuple::encode(&tup, &mut encoded);

        let mut decoded = Vec::new();
        tuple::decode(&encoded, &mut decoded);
        assert_eq!(decoded, tup);
    }

    #[test]
    fn test_tuple_preserves_element_order() {
        let pairs: [(&[&[u8]], &[&[u8]]); 4] = [
            (&[b"a", b"b"], &[b"a", b"c"]),
            (&[b"a"], &[b"a", b""]),
            (&[b"ab"], &[b"b"]),
            (&[b"same", b"x"], &[b"same", b"x"]),
        ];
        for (t1, t2) in pairs {
            let mut e1 = Vec::new();
            let mut e2 = Vec::new();
            tuple::encode(t1, &mut e1);
            tuple::encode(t2, &mut e2);
            assert_eq!(e1.cmp(&e2), t1.cmp(t2), "t1={t1:?} t2={t2:?}");
        }
    }
}
