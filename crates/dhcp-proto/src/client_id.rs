use std::fmt;
use std::str::FromStr;

/// Longest identifier an option 61 payload can carry
pub const MAX_CLIENT_ID_LEN: usize = 255;

/// Error returned when a textual client identifier cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientIdParseError {
    #[error("client identifier is empty")]
    Empty,
    #[error("client identifier is longer than {MAX_CLIENT_ID_LEN} octets")]
    TooLong,
    #[error("invalid octet '{0}' in client identifier")]
    InvalidOctet(String),
}

/// Opaque client identifier
///
/// Usually the 6-byte hardware address of the client, but any byte string
/// sent in option 61 is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Vec<u8>);

impl ClientId {
    /// Create an identifier from raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Build the identifier of a client that sent no option 61
    ///
    /// `hlen` is clamped to the 16 bytes of the `chaddr` field.
    pub fn from_hardware(chaddr: &[u8; 16], hlen: u8) -> Self {
        let len = usize::from(hlen).min(chaddr.len());
        Self(chaddr[..len].to_vec())
    }

    /// Get the underlying bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Formats as colon separated upper-case hex (XX:XX:...)
impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for ClientId {
    type Err = ClientIdParseError;

    /// Parse colon separated hex octets, case insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ClientIdParseError::Empty);
        }

        let mut bytes = Vec::new();
        for part in s.split(':') {
            if part.is_empty() || part.len() > 2 {
                return Err(ClientIdParseError::InvalidOctet(part.to_string()));
            }
            let byte = u8::from_str_radix(part, 16)
                .map_err(|_| ClientIdParseError::InvalidOctet(part.to_string()))?;
            bytes.push(byte);
        }

        if bytes.len() > MAX_CLIENT_ID_LEN {
            return Err(ClientIdParseError::TooLong);
        }

        Ok(Self(bytes))
    }
}

impl From<&[u8]> for ClientId {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}
