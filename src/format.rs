// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

/// Magic bytes at the start of every reftable file (and of its footer)
pub const MAGIC: [u8; 4] = *b"REFT";

/// Default block size in bytes
pub const DEFAULT_BLOCK_SIZE: u32 = 4_096;

/// Blocks hold at most this many restart points; the restart count
/// is stored as a u16
pub(crate) const MAX_RESTARTS: usize = (1 << 16) - 1;

/// A restart point is forced every this many records
pub(crate) const RESTART_INTERVAL: usize = 16;

const FORMAT_ID_SHA1: u32 = 0x7368_6131; // "sha1"
const FORMAT_ID_SHA256: u32 = 0x7332_3536; // "s256"

/// The type tag of a block, stored in the first byte of every block
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlockType {
    /// Ref records (`'r'`)
    Ref,

    /// Log records (`'g'`), zlib-compressed on disk
    Log,

    /// Object index records (`'o'`)
    Obj,

    /// Index records (`'i'`)
    Index,
}

impl BlockType {
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            b'r' => Some(Self::Ref),
            b'g' => Some(Self::Log),
            b'o' => Some(Self::Obj),
            b'i' => Some(Self::Index),
            _ => None,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Ref => b'r',
            Self::Log => b'g',
            Self::Obj => b'o',
            Self::Index => b'i',
        }
    }
}

/// The object id flavor a table was written with.
///
/// The hash function itself is outside of this crate; records simply carry
/// `size()` opaque bytes per object id.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum HashId {
    /// 20-byte object ids (format version 1)
    #[default]
    Sha1,

    /// 32-byte object ids (format version 2)
    Sha256,
}

impl HashId {
    /// Number of bytes of one object id
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    pub(crate) const fn format_id(self) -> u32 {
        match self {
            Self::Sha1 => FORMAT_ID_SHA1,
            Self::Sha256 => FORMAT_ID_SHA256,
        }
    }

    pub(crate) fn from_format_id(id: u32) -> Option<Self> {
        match id {
            FORMAT_ID_SHA1 => Some(Self::Sha1),
            FORMAT_ID_SHA256 => Some(Self::Sha256),
            _ => None,
        }
    }

    /// Version 2 is version 1 plus an explicit format id in header and footer.
    pub(crate) const fn version(self) -> u8 {
        match self {
            Self::Sha1 => 1,
            Self::Sha256 => 2,
        }
    }
}

pub(crate) const fn header_size(version: u8) -> usize {
    if version == 1 {
        24
    } else {
        28
    }
}

pub(crate) const fn footer_size(version: u8) -> usize {
    if version == 1 {
        68
    } else {
        72
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_type_tags() {
        for typ in [BlockType::Ref, BlockType::Log, BlockType::Obj, BlockType::Index] {
            assert_eq!(Some(typ), BlockType::from_u8(typ.as_u8()));
        }
        assert_eq!(None, BlockType::from_u8(b'x'));
        assert_eq!(None, BlockType::from_u8(0));
    }

    #[test]
    fn footer_is_header_plus_offsets() {
        // 5 section words (u64) + CRC32
        assert_eq!(header_size(1) + 5 * 8 + 4, footer_size(1));
        assert_eq!(header_size(2) + 5 * 8 + 4, footer_size(2));
    }

    #[test]
    fn hash_format_ids_roundtrip() {
        assert_eq!(Some(HashId::Sha1), HashId::from_format_id(HashId::Sha1.format_id()));
        assert_eq!(
            Some(HashId::Sha256),
            HashId::from_format_id(HashId::Sha256.format_id())
        );
        assert_eq!(None, HashId::from_format_id(0));
    }
}
