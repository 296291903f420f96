//! On-disk container: fixed 24-byte header, payload, 8-byte terminator.
//!
//! ```text
//! offset  len  field
//!      0    5  magic "DENIS"
//!      5    1  version
//!      6    3  content tag ("ANY", "TXT", "IMG")
//!      9    2  padding byte count, LE (version 2 only; reserved in version 1)
//!     11    5  reserved, zero
//!     16    8  payload length, LE
//!     24    N  payload
//!   24+N    8  terminator, 0xFF x 8
//! ```

use crate::types::{CHUNK_SIZE, ContentTag, DenisError, PAIR_SIZE};

pub const MAGIC: &[u8; 5] = b"DENIS";
pub const HEADER_LEN: usize = 24;
pub const TERMINATOR: [u8; 8] = [0xFF; 8];

/// First layout: no padding field.
pub const VERSION_1: u8 = 1;
/// Adds the 16-bit padding count at offset 9.
pub const VERSION_2: u8 = 2;
/// Version written by the orchestrator.
pub const VERSION: u8 = VERSION_2;

const VERSION_AT: usize = 5;
const TAG_AT: usize = 6;
const PADDING_AT: usize = 9;
const LEN_AT: usize = 16;

/// Parsed container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u8,
    pub content_tag: ContentTag,
    /// Bytes of zero padding in the final chunk. Always 0 for version 1.
    pub padding: u16,
    pub payload_len: u64,
}

impl ContainerHeader {
    pub fn new(
        version: u8,
        content_tag: ContentTag,
        padding: u16,
        payload_len: u64,
    ) -> Result<Self, DenisError> {
        check_version(version)?;
        if content_tag == ContentTag::None {
            return Err(DenisError::Invalid("content tag cannot be NUL"));
        }
        if version == VERSION_1 && padding != 0 {
            return Err(DenisError::Invalid("version 1 containers cannot record padding"));
        }
        Ok(Self {
            version,
            content_tag,
            padding,
            payload_len,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..VERSION_AT].copy_from_slice(MAGIC);
        out[VERSION_AT] = self.version;
        out[TAG_AT..PADDING_AT].copy_from_slice(&self.content_tag.code());
        if self.version >= VERSION_2 {
            out[PADDING_AT..PADDING_AT + 2].copy_from_slice(&self.padding.to_le_bytes());
        }
        out[LEN_AT..HEADER_LEN].copy_from_slice(&self.payload_len.to_le_bytes());
        out
    }

    /// Parse and validate the first `HEADER_LEN` bytes of a container.
    pub fn parse(bytes: &[u8]) -> Result<Self, DenisError> {
        if bytes.len() < HEADER_LEN {
            return Err(DenisError::Truncated {
                len: bytes.len(),
                min: HEADER_LEN,
            });
        }
        let magic = &bytes[..VERSION_AT];
        if magic != MAGIC {
            return Err(DenisError::MagicMismatch {
                expected: String::from_utf8_lossy(MAGIC).into_owned(),
                found: String::from_utf8_lossy(magic).into_owned(),
            });
        }

        let version = bytes[VERSION_AT];
        check_version(version)?;

        let mut code = [0u8; 3];
        code.copy_from_slice(&bytes[TAG_AT..PADDING_AT]);
        let content_tag = match ContentTag::from_code(code) {
            Some(ContentTag::None) | None => {
                return Err(DenisError::UnknownContentTag(
                    String::from_utf8_lossy(&code).into_owned(),
                ));
            }
            Some(tag) => tag,
        };

        let padding = match version {
            VERSION_1 => 0,
            _ => u16::from_le_bytes([bytes[PADDING_AT], bytes[PADDING_AT + 1]]),
        };

        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[LEN_AT..HEADER_LEN]);

        Ok(Self {
            version,
            content_tag,
            padding,
            payload_len: u64::from_le_bytes(len),
        })
    }

    /// Check that a payload of `len` bytes fits this header: a whole number of
    /// generation pairs, and padding shorter than one chunk (zero when there
    /// are no chunks at all).
    pub fn check_payload(&self, len: usize) -> Result<(), DenisError> {
        if len % PAIR_SIZE != 0 {
            return Err(DenisError::MisalignedPayload {
                len,
                pair: PAIR_SIZE,
            });
        }
        let padding = usize::from(self.padding);
        if padding >= CHUNK_SIZE || (len == 0 && padding != 0) {
            return Err(DenisError::PaddingOutOfRange {
                padding: self.padding,
                payload_len: len,
            });
        }
        Ok(())
    }

    /// Total container size for this header.
    pub fn container_len(&self) -> u64 {
        HEADER_LEN as u64 + self.payload_len + TERMINATOR.len() as u64
    }
}

fn check_version(version: u8) -> Result<(), DenisError> {
    match version {
        VERSION_1 | VERSION_2 => Ok(()),
        other => Err(DenisError::UnsupportedVersion(other)),
    }
}

/// Build `header || payload || terminator`.
pub fn encode_container(
    payload: &[u8],
    content_tag: ContentTag,
    version: u8,
    padding: u16,
) -> Result<(ContainerHeader, Vec<u8>), DenisError> {
    let header = ContainerHeader::new(version, content_tag, padding, payload.len() as u64)?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + TERMINATOR.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&TERMINATOR);
    Ok((header, out))
}

/// Validate a container and borrow its payload.
///
/// Checks, in order: minimum length, magic, version, content tag,
/// terminator, declared payload length, pair alignment and padding range.
pub fn decode_container(bytes: &[u8]) -> Result<(ContainerHeader, &[u8]), DenisError> {
    let min = HEADER_LEN + TERMINATOR.len();
    if bytes.len() < min {
        // Still report a bad magic first when there is enough to see it.
        if bytes.len() >= MAGIC.len() && &bytes[..MAGIC.len()] != MAGIC {
            return Err(DenisError::MagicMismatch {
                expected: String::from_utf8_lossy(MAGIC).into_owned(),
                found: String::from_utf8_lossy(&bytes[..MAGIC.len()]).into_owned(),
            });
        }
        return Err(DenisError::Truncated {
            len: bytes.len(),
            min,
        });
    }

    let header = ContainerHeader::parse(bytes)?;

    let body = &bytes[HEADER_LEN..];
    let (payload, trailer) = body.split_at(body.len() - TERMINATOR.len());
    if trailer != TERMINATOR {
        return Err(DenisError::TerminatorMismatch {
            expected: hex::encode(TERMINATOR),
            found: hex::encode(trailer),
        });
    }
    if header.payload_len != payload.len() as u64 {
        return Err(DenisError::SizeMismatch {
            declared: header.payload_len,
            actual: payload.len() as u64,
        });
    }
    header.check_payload(payload.len())?;
    Ok((header, payload))
}
