use std::fmt;

use rand::Rng as _;

use crate::constants::CLIENT_PREFIX;

/// The 20 bytes a client identifies itself with in the handshake.
///
/// Ours are Azureus-style: `-SW0001-` followed by 12 random bytes. Remote ids
/// are kept as sent; [`PeerId::client_id`] picks the client tag out of them
/// when they follow the same convention.
///
/// # Examples
///
/// ```
/// use swarmwire::peer::PeerId;
///
/// let ours = PeerId::generate();
/// assert_eq!(ours.client_id(), Some("SW0001"));
///
/// let theirs = PeerId::from(*b"M7-2-2--0123456789ab");
/// assert_eq!(theirs.client_id(), None);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        let (prefix, random) = id.split_at_mut(CLIENT_PREFIX.len());
        prefix.copy_from_slice(CLIENT_PREFIX);
        rand::rng().fill(random);
        Self(id)
    }

    /// `None` unless `bytes` is exactly 20 long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// The six-character client tag of an Azureus-style id (`-XXnnnn-`).
    pub fn client_id(&self) -> Option<&str> {
        match &self.0[..8] {
            [b'-', tag @ .., b'-'] => std::str::from_utf8(tag)
                .ok()
                .filter(|t| t.bytes().all(|b| b.is_ascii_alphanumeric())),
            _ => None,
        }
    }
}

impl From<[u8; 20]> for PeerId {
    fn from(id: [u8; 20]) -> Self {
        Self(id)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

/// Printable bytes as-is, everything else percent-escaped.
impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|&byte| {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                write!(f, "{}", byte as char)
            } else {
                write!(f, "%{:02x}", byte)
            }
        })
    }
}
