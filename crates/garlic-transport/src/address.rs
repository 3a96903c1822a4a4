//! Address translation between I2P destinations and layered addresses
//!
//! A native [`Destination`] is the overlay's own textual identity: the I2P
//! base64 encoding of the destination bytes. A [`LayeredAddress`] is the
//! self-describing form the peer-to-peer stack works with, a protocol tag
//! followed by a payload, written `/garlic64/<destination>`.
//!
//! Translation is pure. Native to layered always succeeds for a valid
//! destination; layered to native only succeeds for the `garlic64` family.

use std::fmt;
use std::str::FromStr;

use base64::alphabet::Alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{TransportError, TransportResult};

/// Protocol tag of the garlic (I2P) transport family
pub const GARLIC64: &str = "garlic64";

/// Smallest valid destination: 256-byte public key, 128-byte signing key and
/// a 3-byte null certificate.
pub const MIN_DESTINATION_LEN: usize = 387;

const I2P_ALPHABET: Alphabet =
    match Alphabet::new("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-~") {
        Ok(alphabet) => alphabet,
        Err(_) => panic!("I2P base64 alphabet must be valid"),
    };

/// I2P base64: standard alphabet with `+/` replaced by `-~`, padded.
///
/// Decoding requires canonical padding and trailing bits so that re-encoding
/// a decoded destination reproduces the original text exactly.
const I2P_BASE64: GeneralPurpose = GeneralPurpose::new(
    &I2P_ALPHABET,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::RequireCanonical),
);

/// Native I2P destination
///
/// Keeps the original text together with the decoded bytes. The text is
/// never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    text: String,
    bytes: Vec<u8>,
}

impl Destination {
    /// Parse and validate a destination in I2P base64.
    pub fn parse(text: &str) -> TransportResult<Self> {
        if text.is_empty() {
            return Err(TransportError::address_format("destination is empty"));
        }

        let bytes = I2P_BASE64.decode(text).map_err(|e| {
            TransportError::address_format("destination is not valid I2P base64").with_source(e)
        })?;
        check_length(bytes.len())?;

        Ok(Self {
            text: text.to_string(),
            bytes,
        })
    }

    /// Build a destination from its binary form.
    pub fn from_bytes(bytes: &[u8]) -> TransportResult<Self> {
        check_length(bytes.len())?;
        Ok(Self {
            text: I2P_BASE64.encode(bytes),
            bytes: bytes.to_vec(),
        })
    }

    /// Destination text as handed out by the overlay
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Decoded destination bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume into the destination text
    pub fn into_string(self) -> String {
        self.text
    }

    /// Wrap as a `/garlic64` layered address. Never fails.
    pub fn to_layered(&self) -> LayeredAddress {
        LayeredAddress {
            protocol: Protocol::Garlic64,
            payload: self.bytes.clone(),
        }
    }
}

impl FromStr for Destination {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn check_length(len: usize) -> TransportResult<()> {
    if len < MIN_DESTINATION_LEN {
        return Err(TransportError::address_format(format!(
            "destination decodes to {len} bytes, expected at least {MIN_DESTINATION_LEN}"
        )));
    }
    Ok(())
}

/// Protocol tag of a layered address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// I2P destination in I2P base64
    Garlic64,
    /// Any other family. Parsed so it can be rejected with a useful error.
    Other(String),
}

impl Protocol {
    fn from_tag(tag: &str) -> Self {
        match tag {
            GARLIC64 => Self::Garlic64,
            other => Self::Other(other.to_string()),
        }
    }

    /// Textual tag, without slashes
    pub fn tag(&self) -> &str {
        match self {
            Self::Garlic64 => GARLIC64,
            Self::Other(tag) => tag,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Self-describing address: protocol tag plus payload
///
/// For `garlic64` the payload is the decoded destination; for other tags it
/// is the remainder of the text form, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayeredAddress {
    protocol: Protocol,
    payload: Vec<u8>,
}

impl LayeredAddress {
    /// Protocol tag of this address
    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Raw payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether this address names the garlic family
    pub fn is_garlic(&self) -> bool {
        self.protocol == Protocol::Garlic64
    }

    /// Recover the native destination.
    pub fn to_destination(&self) -> TransportResult<Destination> {
        if !self.is_garlic() {
            return Err(TransportError::address_format(format!(
                "expected a /{GARLIC64} address, got /{}",
                self.protocol
            )));
        }
        Destination::from_bytes(&self.payload)
    }
}

impl fmt::Display for LayeredAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.protocol {
            Protocol::Garlic64 => write!(f, "/{GARLIC64}/{}", I2P_BASE64.encode(&self.payload)),
            Protocol::Other(tag) if self.payload.is_empty() => write!(f, "/{tag}"),
            Protocol::Other(tag) => {
                write!(f, "/{tag}/{}", String::from_utf8_lossy(&self.payload))
            }
        }
    }
}

impl FromStr for LayeredAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix('/').ok_or_else(|| {
            TransportError::address_format(format!("layered address must start with '/': {s:?}"))
        })?;
        let (tag, value) = rest.split_once('/').unwrap_or((rest, ""));
        if tag.is_empty() {
            return Err(TransportError::address_format("layered address has no protocol tag"));
        }

        match Protocol::from_tag(tag) {
            Protocol::Garlic64 => {
                if value.contains('/') {
                    return Err(TransportError::address_format(
                        "garlic64 address carries trailing components",
                    ));
                }
                Ok(Destination::parse(value)?.to_layered())
            }
            protocol => Ok(Self {
                protocol,
                payload: value.as_bytes().to_vec(),
            }),
        }
    }
}

impl TryFrom<String> for LayeredAddress {
    type Error = TransportError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LayeredAddress> for String {
    fn from(value: LayeredAddress) -> Self {
        value.to_string()
    }
}

/// Translate a native destination into a layered address.
pub fn to_layered(native: &str) -> TransportResult<LayeredAddress> {
    Ok(Destination::parse(native)?.to_layered())
}

/// Translate a layered address back into the native destination text.
pub fn to_native(address: &LayeredAddress) -> TransportResult<String> {
    address.to_destination().map(Destination::into_string)
}
