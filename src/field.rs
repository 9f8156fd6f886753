//! pack raw bytes into valid field elements of a blob
//!
//! a blob is a sequence of elements of the BLS12-381 scalar field, each one
//! serialized as a 32-byte big-endian integer that must stay strictly below
//! the modulus $p$ of the field.
//!
//! instead of reducing data modulo $p$, every element keeps its most
//! significant byte at $0$ and only the $31$ remaining bytes carry payload,
//! which is always below $p$.
use ark_bls12_381::Fr;
use ark_ff::{BigInt, PrimeField};

/// the size of a serialized field element
pub const BYTES_PER_FIELD_ELEMENT: usize = 32;
/// the number of payload bytes that fit in a single field element
pub const USABLE_BYTES_PER_ELEMENT: usize = BYTES_PER_FIELD_ELEMENT - 1;

/// a serialized field element, i.e. a 32-byte big-endian integer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FieldElement([u8; BYTES_PER_FIELD_ELEMENT]);

impl FieldElement {
    /// packs at most [`USABLE_BYTES_PER_ELEMENT`] bytes into an element.
    ///
    /// the payload is left-aligned right after the leading zero byte and
    /// padded with zeros. any byte past the 31st is ignored.
    pub fn pack(payload: &[u8]) -> Self {
        let mut element = [0u8; BYTES_PER_FIELD_ELEMENT];
        let len = payload.len().min(USABLE_BYTES_PER_ELEMENT);
        element[1..1 + len].copy_from_slice(&payload[..len]);
        FieldElement(element)
    }

    /// returns the 31 payload bytes, including any trailing zero padding.
    pub fn unpack(&self) -> [u8; USABLE_BYTES_PER_ELEMENT] {
        let mut payload = [0u8; USABLE_BYTES_PER_ELEMENT];
        payload.copy_from_slice(&self.0[1..]);
        payload
    }

    /// wraps raw bytes, e.g. a _magic header_, without any check.
    pub fn from_bytes(bytes: [u8; BYTES_PER_FIELD_ELEMENT]) -> Self {
        FieldElement(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; BYTES_PER_FIELD_ELEMENT] {
        &self.0
    }

    /// whether the element, read as a big-endian integer, is below the
    /// BLS12-381 scalar modulus.
    pub fn is_canonical(&self) -> bool {
        let mut limbs = [0u64; 4];
        for (limb, chunk) in limbs.iter_mut().zip(self.0.rchunks(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            *limb = u64::from_be_bytes(word);
        }

        BigInt::new(limbs) < Fr::MODULUS
    }
}

/// splits a sequence of raw bytes into packed field elements
///
/// the last element is padded with zeros when the length of `bytes` is not a
/// multiple of [`USABLE_BYTES_PER_ELEMENT`].
pub fn split_data_into_field_elements(bytes: &[u8]) -> Vec<FieldElement> {
    bytes
        .chunks(USABLE_BYTES_PER_ELEMENT)
        .map(FieldElement::pack)
        .collect()
}

/// merges packed field elements back into a sequence of bytes
///
/// this is the inverse operation of [`split_data_into_field_elements`], up to
/// the zero padding of the last element.
pub fn merge_elements_into_bytes(elements: &[FieldElement]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(elements.len() * USABLE_BYTES_PER_ELEMENT);
    for e in elements {
        bytes.extend_from_slice(&e.unpack());
    }

    bytes
}
