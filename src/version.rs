//! On-disk version header: a fixed 58-byte ASCII tag, a `u16` FILEID, and
//! `u16` major/minor numbers, all in network byte order. Written once at
//! `Storage::create` time and checked on every `Storage::open`.

use crate::binfmt::{read_u16, write_u16};
use crate::error::{Error, Result};

pub const FILEID: u16 = 0x3ff3;

const TAG_TEXT: &str = "strus standard vector space model bin file\n\0";
const TAG_LEN: usize = 58;

/// Current on-disk format version written by this crate.
pub const CURRENT_MAJOR: u16 = 1;
pub const CURRENT_MINOR: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionHeader {
    pub major: u16,
    pub minor: u16,
}

impl VersionHeader {
    pub fn current() -> Self {
        Self { major: CURRENT_MAJOR, minor: CURRENT_MINOR }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TAG_LEN + 6);
        let mut tag_bytes = TAG_TEXT.as_bytes().to_vec();
        tag_bytes.resize(TAG_LEN, 0);
        out.extend_from_slice(&tag_bytes);
        write_u16(&mut out, FILEID);
        write_u16(&mut out, self.major);
        write_u16(&mut out, self.minor);
        out
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        if buf.len() != TAG_LEN + 6 {
            return Err(Error::corruption("version header has unexpected length"));
        }
        let fileid = read_u16(buf, TAG_LEN);
        if fileid != FILEID {
            return Err(Error::corruption("version header FILEID mismatch"));
        }
        let major = read_u16(buf, TAG_LEN + 2);
        let minor = read_u16(buf, TAG_LEN + 4);
        Ok(Self { major, minor })
    }

    /// Mismatched major, or a stored minor newer than the code's, aborts open.
    pub fn check_compatible(&self) -> Result<()> {
        if self.major != CURRENT_MAJOR {
            return Err(Error::UnsupportedVersion(format!(
                "storage major version {} is incompatible with supported major version {CURRENT_MAJOR}",
                self.major
            )));
        }
        if self.minor > CURRENT_MINOR {
            return Err(Error::UnsupportedVersion(format!(
                "storage minor version {} is newer than supported minor version {CURRENT_MINOR}",
                self.minor
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let header = VersionHeader::current();
        let bytes = header.serialize();
        let back = VersionHeader::deserialize(&bytes).unwrap();
        assert_eq!(header, back);
        assert!(back.check_compatible().is_ok());
    }

    #[test]
    fn rejects_mismatched_major() {
        let header = VersionHeader { major: CURRENT_MAJOR + 1, minor: 0 };
        assert!(header.check_compatible().is_err());
    }

    #[test]
    fn rejects_newer_minor() {
        let header = VersionHeader { major: CURRENT_MAJOR, minor: CURRENT_MINOR + 1 };
        assert!(header.check_compatible().is_err());
    }

    #[test]
    fn older_minor_is_fine() {
        if CURRENT_MINOR > 0 {
            let header = VersionHeader { major: CURRENT_MAJOR, minor: CURRENT_MINOR - 1 };
            assert!(header.check_compatible().is_ok());
        }
    }
}
