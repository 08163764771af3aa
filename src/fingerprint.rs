//! MD5 content fingerprints, used by the history iterator to tell an
//! unchanged cell from an updated one without comparing full byte ranges,
//! and by the carver to suppress carved cells that duplicate a live cell.

use md5::{Digest, Md5};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 16]);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Fingerprint {
        let mut hasher = Md5::new();
        hasher.update(bytes);
        Fingerprint(hasher.finalize().into())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_fingerprint_equal() {
        assert_eq!(Fingerprint::of(b"hello"), Fingerprint::of(b"hello"));
    }

    #[test]
    fn different_bytes_fingerprint_differ() {
        assert_ne!(Fingerprint::of(b"hello"), Fingerprint::of(b"world"));
    }
}
