use serde::de::Visitor;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha384};
use std::fmt;
use std::io::Read;
use std::str::FromStr;
use thiserror::Error;

/// The digest algorithms Chronicle understands. A single build always uses a
/// uniform algorithm, so composite digests hash raw bytes without the tag.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Algorithm {
    #[default]
    Sha384,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha384 => "sha384",
        }
    }

    /// Length of a raw digest in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Algorithm::Sha384 => 48,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content address: an algorithm tag plus the raw hash bytes.
///
/// The canonical string form is `algo:hex`, which is what gets persisted in
/// the registry and shown to users.
#[derive(Clone, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Digest {
    algorithm: Algorithm,
    bytes: Vec<u8>,
}

impl Digest {
    pub fn sha384(bytes: Vec<u8>) -> Self {
        Self {
            algorithm: Algorithm::Sha384,
            bytes,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algo, hex_str) = s
            .split_once(':')
            .ok_or_else(|| DigestError::MalformedDigest(s.to_string()))?;

        let algorithm = match algo {
            "sha384" => Algorithm::Sha384,
            other => return Err(DigestError::UnknownAlgorithm(other.to_string())),
        };

        let bytes =
            hex::decode(hex_str).map_err(|_| DigestError::MalformedDigest(s.to_string()))?;

        if bytes.len() != algorithm.digest_len() {
            return Err(DigestError::MalformedDigest(s.to_string()));
        }

        Ok(Self { algorithm, bytes })
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

struct DigestVisitor;

impl Visitor<'_> for DigestVisitor {
    type Value = Digest;

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        v.parse().map_err(E::custom)
    }

    fn expecting(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str("a digest in `algo:hex` form")
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(DigestVisitor)
    }
}

/// Digest the full contents of a reader. Reads are streamed through a fixed
/// buffer so large files never get loaded into memory wholesale.
pub fn digest_reader<R: Read>(mut reader: R) -> Result<Digest, DigestError> {
    let mut hasher = Sha384::new();
    let mut buffer = [0; 8192];
    loop {
        let len = reader.read(&mut buffer)?;
        if len == 0 {
            break;
        }
        hasher.update(&buffer[..len]);
    }
    Ok(Digest::sha384(hasher.finalize().to_vec()))
}

pub fn digest_bytes(bytes: &[u8]) -> Digest {
    let mut hasher = Sha384::new();
    hasher.update(bytes);
    Digest::sha384(hasher.finalize().to_vec())
}

pub fn digest_string(s: &str) -> Digest {
    digest_bytes(s.as_bytes())
}

/// Digest a collection of digests into one.
///
/// Members are sorted by their raw byte value ascending before being
/// concatenated and hashed, so the result is independent of iteration order.
/// The algorithm tag is not part of the hashed input.
pub fn digest_composite<I>(items: I) -> Digest
where
    I: IntoIterator<Item = Digest>,
{
    let mut parts: Vec<Vec<u8>> = items.into_iter().map(|d| d.bytes).collect();
    parts.sort();

    let mut hasher = Sha384::new();
    for part in &parts {
        hasher.update(part);
    }
    Digest::sha384(hasher.finalize().to_vec())
}

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("reading data to digest failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown digest algorithm {0:?}")]
    UnknownAlgorithm(String),

    #[error("malformed digest {0:?}, expected `algo:hex`")]
    MalformedDigest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    impl quickcheck::Arbitrary for Digest {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            let seed: Vec<u8> = Vec::arbitrary(g);
            digest_bytes(&seed)
        }
    }

    #[test]
    fn string_form_round_trips() {
        let d = digest_string("hello");
        let parsed: Digest = d.to_string().parse().unwrap();
        assert_eq!(d, parsed);
    }

    #[test]
    fn string_form_is_tagged_hex() {
        let d = digest_string("");
        let s = d.to_string();
        assert!(s.starts_with("sha384:"));
        assert_eq!(s.len(), "sha384:".len() + 96);
    }

    #[test]
    fn reader_and_bytes_agree() {
        let data = b"int main(){}".to_vec();
        let from_reader = digest_reader(&data[..]).unwrap();
        assert_eq!(from_reader, digest_bytes(&data));
    }

    #[test]
    fn parsing_rejects_garbage() {
        assert_matches!(Digest::from_str("sha384"), Err(DigestError::MalformedDigest(_)));
        assert_matches!(
            Digest::from_str("md5:abcd"),
            Err(DigestError::UnknownAlgorithm(_))
        );
        assert_matches!(
            Digest::from_str("sha384:zz"),
            Err(DigestError::MalformedDigest(_))
        );
    }

    #[quickcheck]
    fn composite_is_order_insensitive(items: Vec<Digest>) {
        let forward = digest_composite(items.clone());
        let mut reversed = items;
        reversed.reverse();
        assert_eq!(forward, digest_composite(reversed));
    }

    #[quickcheck]
    fn composite_differs_from_members(item: Digest) {
        assert_ne!(digest_composite(vec![item.clone()]), item);
    }
}
