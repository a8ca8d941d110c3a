use serde::{Deserialize, Serialize};
use std::fmt;
use tiny_keccak::{Hasher, Keccak};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid EVM address {value:?}: {reason}")]
pub struct AddressError {
    value: String,
    reason: &'static str,
}

/// A 20-byte EVM account or contract address.
///
/// Stored lowercase; rendered with its EIP-55 checksum when displayed or
/// serialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EvmAddress(String);

impl EvmAddress {
    /// Parse an address copied from a config file or a dashboard.
    ///
    /// Surrounding whitespace and invisible characters (zero-width spaces, BOMs)
    /// are dropped. Mixed-case input must carry a valid EIP-55 checksum;
    /// all-lowercase or all-uppercase input is accepted as is.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let cleaned = clean(raw);
        let err = |reason| AddressError {
            value: cleaned.clone(),
            reason,
        };

        let hex = cleaned
            .strip_prefix("0x")
            .or_else(|| cleaned.strip_prefix("0X"))
            .ok_or_else(|| err("missing 0x prefix"))?;
        if hex.len() != 40 {
            return Err(err("expected 40 hex digits"));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(err("contains non-hex characters"));
        }

        let address = Self(format!("0x{}", hex.to_ascii_lowercase()));

        let has_lower = hex.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = hex.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && address.to_checksum()[2..] != *hex {
            return Err(err("EIP-55 checksum mismatch"));
        }

        Ok(address)
    }

    /// Lowercase `0x`-prefixed form, as used in RPC payloads and API queries.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// EIP-55 mixed-case checksum encoding.
    pub fn to_checksum(&self) -> String {
        let hex = &self.0[2..];
        let mut hasher = Keccak::v256();
        hasher.update(hex.as_bytes());
        let mut hash = [0u8; 32];
        hasher.finalize(&mut hash);

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (idx, ch) in hex.chars().enumerate() {
            let nibble = if idx % 2 == 0 {
                hash[idx / 2] >> 4
            } else {
                hash[idx / 2] & 0x0f
            };
            if ch.is_ascii_alphabetic() && nibble >= 8 {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch);
            }
        }
        out
    }
}

fn clean(raw: &str) -> String {
    raw.chars()
        .filter(|c| {
            !c.is_whitespace()
                && !c.is_control()
                && !matches!(c, '\u{200b}'..='\u{200d}' | '\u{2060}' | '\u{feff}')
        })
        .collect()
}

impl TryFrom<String> for EvmAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EvmAddress> for String {
    fn from(value: EvmAddress) -> Self {
        value.to_checksum()
    }
}

impl std::str::FromStr for EvmAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference vectors from EIP-55.
    const CHECKSUMMED: [&str; 4] = [
        "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
        "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
        "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
        "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
    ];

    #[test]
    fn checksum_matches_reference_vectors() {
        for expected in CHECKSUMMED {
            let parsed = EvmAddress::parse(&expected.to_lowercase()).unwrap();
            assert_eq!(parsed.to_checksum(), expected);
        }
    }

    #[test]
    fn accepts_valid_mixed_case() {
        for addr in CHECKSUMMED {
            let parsed = EvmAddress::parse(addr).unwrap();
            assert_eq!(parsed.as_str(), addr.to_lowercase());
        }
    }

    #[test]
    fn rejects_bad_checksum() {
        let err = EvmAddress::parse("0x5AAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").unwrap_err();
        assert_eq!(err.reason, "EIP-55 checksum mismatch");
    }

    #[test]
    fn strips_whitespace_and_invisible_characters() {
        let raw = " \u{200b}0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed\u{feff}\n";
        let parsed = EvmAddress::parse(raw).unwrap();
        assert_eq!(parsed.as_str(), "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed");
    }

    #[test]
    fn rejects_wrong_length_and_prefix() {
        assert!(EvmAddress::parse("0x1234").is_err());
        assert!(EvmAddress::parse("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").is_err());
        assert!(EvmAddress::parse("0xzzaeb6053f3e94c9b9a09f33669435e7ef1beaed").is_err());
    }

    #[test]
    fn serializes_as_checksum() {
        let parsed = EvmAddress::parse(CHECKSUMMED[0]).unwrap();
        let json = serde_json::to_string(&parsed).unwrap();
        assert_eq!(json, format!("\"{}\"", CHECKSUMMED[0]));

        let back: EvmAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, parsed);
    }
}
