//! Codec for a SAHPool slot's 4 KiB preamble: path, open flags, and a
//! tamper/corruption-detecting digest.
//!
//! Grounded on `sqlite-wasm-rs/src/vfs/sahpool.rs`'s header offset constants
//! and `get_associated_path`/`set_associated_path` pair, but corrected: that
//! file's `compute_digest` is a stub that always returns `[0, 0]` (a TODO
//! pending upstream `sqlite/sqlite-wasm#97`). This module computes the real
//! running digest and returns an explicit three-way `HeaderState` instead of
//! folding "corrupt" and "freshly reset" into the same `None`.
//!
//! Pure data transformation -- no JS environment needed, so this module's
//! tests are plain `#[test]`s rather than `wasm_bindgen_test`.

pub const SECTOR_SIZE: usize = 4096;
pub const HEADER_MAX_PATH_SIZE: usize = 512;
pub const HEADER_FLAGS_SIZE: usize = 4;
pub const HEADER_DIGEST_SIZE: usize = 8;
pub const HEADER_OFFSET_FLAGS: usize = HEADER_MAX_PATH_SIZE;
pub const HEADER_OFFSET_DIGEST: usize = HEADER_OFFSET_FLAGS + HEADER_FLAGS_SIZE;
pub const HEADER_CORPUS_SIZE: usize = HEADER_OFFSET_DIGEST;
pub const HEADER_OFFSET_DATA: usize = SECTOR_SIZE;

const DIGEST_SEED_0: u32 = 0xDEAD_BEEF;
const DIGEST_SEED_1: u32 = 0x41C6_CE57;

/// `SQLITE_OPEN_MAIN_DB | SQLITE_OPEN_MAIN_JOURNAL | SQLITE_OPEN_SUPER_JOURNAL | SQLITE_OPEN_WAL`
pub const PERSISTENT_FILE_TYPES: i32 = crate::libsqlite3::SQLITE_OPEN_MAIN_DB
    | crate::libsqlite3::SQLITE_OPEN_MAIN_JOURNAL
    | crate::libsqlite3::SQLITE_OPEN_SUPER_JOURNAL
    | crate::libsqlite3::SQLITE_OPEN_WAL;

/// Two 32-bit running values seeded `(0xDEADBEEF, 0x41C6CE57)`, each updated
/// per byte as `h <- 31*h + 307*b (mod 2^32)`. A fingerprint, not a MAC --
/// cheap enough to run on every slot scan, strong enough to catch a torn
/// write.
pub fn digest(corpus: &[u8; HEADER_CORPUS_SIZE]) -> [u32; 2] {
    let mut h0 = DIGEST_SEED_0;
    let mut h1 = DIGEST_SEED_1;
    for &b in corpus {
        h0 = h0
            .wrapping_mul(31)
            .wrapping_add((b as u32).wrapping_mul(307));
        h1 = h1
            .wrapping_mul(31)
            .wrapping_add((b as u32).wrapping_mul(307));
    }
    [h0, h1]
}

/// Outcome of decoding a slot's header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderState {
    /// Digest mismatch: the preamble is not trustworthy.
    Corrupt,
    /// Well-formed, empty path: the slot carries no association.
    Unassociated,
    /// Well-formed, associated with a virtual path and its open flags.
    Associated { path: String, flags: i32 },
}

/// Encode `(path, flags)` into a fresh 4096-byte header. `path` must encode
/// to fewer than 512 bytes.
pub fn encode(path: &str, flags: i32) -> Result<[u8; SECTOR_SIZE], EncodeError> {
    let bytes = path.as_bytes();
    if bytes.len() >= HEADER_MAX_PATH_SIZE {
        return Err(EncodeError::PathTooLong);
    }

    let mut block = [0u8; SECTOR_SIZE];
    block[..bytes.len()].copy_from_slice(bytes);
    block[HEADER_OFFSET_FLAGS..HEADER_OFFSET_FLAGS + HEADER_FLAGS_SIZE]
        .copy_from_slice(&(flags as u32).to_le_bytes());

    let corpus: [u8; HEADER_CORPUS_SIZE] = block[..HEADER_CORPUS_SIZE].try_into().unwrap();
    let [d0, d1] = digest(&corpus);
    block[HEADER_OFFSET_DIGEST..HEADER_OFFSET_DIGEST + 4].copy_from_slice(&d0.to_le_bytes());
    block[HEADER_OFFSET_DIGEST + 4..HEADER_OFFSET_DIGEST + 8].copy_from_slice(&d1.to_le_bytes());

    Ok(block)
}

/// An empty, freshly-formatted header: zero path/flags, digest computed over
/// the all-zero corpus.
pub fn encode_empty() -> [u8; SECTOR_SIZE] {
    encode("", 0).expect("empty path always encodes")
}

#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("path does not fit in the {HEADER_MAX_PATH_SIZE}-byte header field")]
    PathTooLong,
}

/// Decode the preamble found in the first `HEADER_OFFSET_DATA` bytes of a
/// slot. `header` must be at least `HEADER_OFFSET_DATA` bytes (only the
/// first `HEADER_CORPUS_SIZE + HEADER_DIGEST_SIZE` are inspected).
pub fn decode(header: &[u8]) -> HeaderState {
    assert!(header.len() >= HEADER_OFFSET_DIGEST + HEADER_DIGEST_SIZE);

    let corpus: [u8; HEADER_CORPUS_SIZE] = header[..HEADER_CORPUS_SIZE].try_into().unwrap();
    let stored_d0 =
        u32::from_le_bytes(header[HEADER_OFFSET_DIGEST..HEADER_OFFSET_DIGEST + 4].try_into().unwrap());
    let stored_d1 = u32::from_le_bytes(
        header[HEADER_OFFSET_DIGEST + 4..HEADER_OFFSET_DIGEST + 8]
            .try_into()
            .unwrap(),
    );

    if digest(&corpus) != [stored_d0, stored_d1] {
        return HeaderState::Corrupt;
    }

    if header[0] == 0 {
        return HeaderState::Unassociated;
    }

    let flags = u32::from_le_bytes(
        header[HEADER_OFFSET_FLAGS..HEADER_OFFSET_FLAGS + HEADER_FLAGS_SIZE]
            .try_into()
            .unwrap(),
    ) as i32;

    let has_persistent_bit = flags & PERSISTENT_FILE_TYPES != 0;
    let delete_on_close = flags & crate::libsqlite3::SQLITE_OPEN_DELETEONCLOSE != 0;
    if !has_persistent_bit || delete_on_close {
        return HeaderState::Unassociated;
    }

    let name_len = corpus
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(HEADER_MAX_PATH_SIZE);
    let path = String::from_utf8_lossy(&corpus[..name_len]).into_owned();

    HeaderState::Associated { path, flags }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_associated_state() {
        let header = encode("/test.db", 0x102).unwrap();
        match decode(&header) {
            HeaderState::Associated { path, flags } => {
                assert_eq!(path, "/test.db");
                assert_eq!(flags, 0x102);
            }
            other => panic!("expected Associated, got {other:?}"),
        }
    }

    #[test]
    fn empty_header_is_unassociated() {
        let header = encode_empty();
        assert_eq!(decode(&header), HeaderState::Unassociated);
    }

    #[test]
    fn flipped_bit_is_corrupt() {
        let mut header = encode("/test.db", 0x102).unwrap();
        header[3] ^= 0x01;
        assert_eq!(decode(&header), HeaderState::Corrupt);
    }

    #[test]
    fn deleteonclose_flag_reads_as_unassociated() {
        let header = encode(
            "/tmp-journal",
            crate::libsqlite3::SQLITE_OPEN_MAIN_JOURNAL
                | crate::libsqlite3::SQLITE_OPEN_DELETEONCLOSE,
        )
        .unwrap();
        assert_eq!(decode(&header), HeaderState::Unassociated);
    }

    #[test]
    fn non_persistent_flags_read_as_unassociated() {
        let header = encode("/scratch", crate::libsqlite3::SQLITE_OPEN_READWRITE).unwrap();
        assert_eq!(decode(&header), HeaderState::Unassociated);
    }

    #[test]
    fn path_too_long_is_rejected() {
        let path = "a".repeat(HEADER_MAX_PATH_SIZE);
        assert!(matches!(encode(&path, 0), Err(EncodeError::PathTooLong)));
    }

    #[test]
    fn digest_is_deterministic_and_order_sensitive() {
        let mut corpus = [0u8; HEADER_CORPUS_SIZE];
        corpus[0] = 1;
        corpus[1] = 2;
        let d1 = digest(&corpus);
        corpus.swap(0, 1);
        let d2 = digest(&corpus);
        assert_ne!(d1, d2);
    }
}
