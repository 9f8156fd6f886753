//! the _magic header_ that frames every shard of a file
//!
//! the header fills the first field element of a shard and has a fixed
//! layout:
//!
//! | bytes    | content                                  |
//! |----------|------------------------------------------|
//! | `0..14`  | the ASCII tag `BlobsAreComing`           |
//! | `14..17` | `.`, the protocol version, `.`           |
//! | `17`     | the index of the shard, starting at $0$  |
//! | `18`     | `.`                                      |
//! | `19`     | the total number of shards of the file   |
//! | `20..24` | `.` filler                               |
//! | `24..32` | the random seed of the file              |
//!
//! there is no checksum: a parser that finds the tag trusts the rest of the
//! layout.
use crate::field::BYTES_PER_FIELD_ELEMENT;

/// the tag at the start of every header, i.e. `BlobsAreComing`
pub const MAGIC_TAG: [u8; 14] = *b"BlobsAreComing";
pub const PROTOCOL_VERSION: u8 = 0x01;
/// the size of a header, exactly one field element
pub const HEADER_SIZE: usize = BYTES_PER_FIELD_ELEMENT;

const SEPARATOR: u8 = b'.';
const VERSION_OFFSET: usize = 15;
const SHARD_INDEX_OFFSET: usize = 17;
const TOTAL_SHARDS_OFFSET: usize = 19;
const SEED_OFFSET: usize = 24;
pub const SEED_SIZE: usize = 8;

/// the random value shared by all the shards of one file.
pub type Seed = [u8; SEED_SIZE];

/// the decoded content of a [`HEADER_SIZE`]-byte header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MagicHeader {
    pub shard_index: u8,
    pub total_shards: u8,
    pub seed: Seed,
}

impl MagicHeader {
    pub fn new(shard_index: u8, total_shards: u8, seed: Seed) -> Self {
        Self {
            shard_index,
            total_shards,
            seed,
        }
    }

    /// whether this is the header of the last shard of its file
    pub fn is_last(&self) -> bool {
        self.shard_index as usize + 1 == self.total_shards as usize
    }

    /// serializes the header, see [`generate`]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        generate(self.shard_index, self.total_shards, self.seed)
    }
}

/// builds the header of shard `shard_index` out of `total_shards`.
pub fn generate(shard_index: u8, total_shards: u8, seed: Seed) -> [u8; HEADER_SIZE] {
    let mut header = [SEPARATOR; HEADER_SIZE];
    header[..MAGIC_TAG.len()].copy_from_slice(&MAGIC_TAG);
    header[VERSION_OFFSET] = PROTOCOL_VERSION;
    header[SHARD_INDEX_OFFSET] = shard_index;
    header[TOTAL_SHARDS_OFFSET] = total_shards;
    header[SEED_OFFSET..].copy_from_slice(&seed);
    header
}

/// reads a header at the start of `bytes`
///
/// returns [`None`] when `bytes` does not start with [`MAGIC_TAG`] or is too
/// short to hold a header, i.e. when the shard does not belong to this
/// protocol.
pub fn parse(bytes: &[u8]) -> Option<MagicHeader> {
    if bytes.len() < HEADER_SIZE || !has_magic_tag(bytes) {
        return None;
    }

    let mut seed = [0u8; SEED_SIZE];
    seed.copy_from_slice(&bytes[SEED_OFFSET..SEED_OFFSET + SEED_SIZE]);

    Some(MagicHeader {
        shard_index: bytes[SHARD_INDEX_OFFSET],
        total_shards: bytes[TOTAL_SHARDS_OFFSET],
        seed,
    })
}

/// whether `bytes` starts with [`MAGIC_TAG`]
pub fn has_magic_tag(bytes: &[u8]) -> bool {
    bytes.starts_with(&MAGIC_TAG)
}

#[cfg(test)]
mod tests {
    use ark_std::rand::RngCore;

    use crate::field::FieldElement;

    use super::{generate, has_magic_tag, parse, MagicHeader, Seed, HEADER_SIZE};

    fn seed(rng: &mut impl RngCore) -> Seed {
        let mut seed = Seed::default();
        rng.fill_bytes(&mut seed);
        seed
    }

    #[test]
    fn layout() {
        let header = generate(3, 7, [1, 2, 3, 4, 5, 6, 7, 8]);

        assert_eq!(&header[..14], b"BlobsAreComing");
        assert_eq!(header[14..17], [b'.', 0x01, b'.']);
        assert_eq!(header[17], 3);
        assert_eq!(header[18], b'.');
        assert_eq!(header[19], 7);
        assert_eq!(header[20..24], [b'.'; 4]);
        assert_eq!(header[24..], [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn header_is_a_canonical_element() {
        let header = generate(254, 255, [0xff; 8]);
        assert!(FieldElement::from_bytes(header).is_canonical());
    }

    #[test]
    fn round_trip() {
        let mut rng = ark_std::test_rng();

        for n in 1..=255u8 {
            let s = seed(&mut rng);
            for i in 0..n {
                assert_eq!(
                    parse(&generate(i, n, s)),
                    Some(MagicHeader::new(i, n, s)),
                    "TEST | index: {i}, total: {n}, seed: {s:?}"
                );
            }
        }
    }

    #[test]
    fn foreign_data() {
        assert_eq!(parse(&[0u8; HEADER_SIZE]), None);
        assert_eq!(parse(&[]), None);

        let mut header = generate(0, 1, [0; 8]);
        header[0] = b'b';
        assert_eq!(parse(&header), None);

        // a truncated header carries the tag but not the rest of the layout
        let header = generate(0, 1, [0; 8]);
        assert!(has_magic_tag(&header[..20]));
        assert_eq!(parse(&header[..20]), None);
    }

    #[test]
    fn last_shard() {
        assert!(MagicHeader::new(0, 1, [0; 8]).is_last());
        assert!(MagicHeader::new(254, 255, [0; 8]).is_last());
        assert!(!MagicHeader::new(3, 5, [0; 8]).is_last());
    }
}
