use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Human-transcribable room code: three hyphen-separated groups of
/// letters, digits, letters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    const LETTERS: &'static [u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    const DIGITS: &'static [u8] = b"0123456789";

    /// Generate a random code, e.g. `ABCDE-12345-FGHIJ`.
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let group = |alphabet: &[u8], len: usize, rng: &mut rand::rngs::ThreadRng| -> String {
            (0..len)
                .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
                .collect()
        };
        let code = format!(
            "{}-{}-{}",
            group(Self::LETTERS, 5, &mut rng),
            group(Self::DIGITS, 5, &mut rng),
            group(Self::LETTERS, 5, &mut rng),
        );
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RoomCode {
    fn from(s: String) -> Self {
        Self(s)
    }
}
impl From<&str> for RoomCode {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Server-minted opaque participant token. Fresh on every join/reconnect.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(Uuid);

impl ParticipantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}
impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}
impl std::str::FromStr for ParticipantId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Server-minted opaque identifier for an uploaded clip.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(Uuid);

impl VideoId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}
impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}
impl std::str::FromStr for VideoId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_code_format() {
        let code = RoomCode::generate();
        let parts: Vec<&str> = code.as_str().split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 5);
        assert_eq!(parts[1].len(), 5);
        assert_eq!(parts[2].len(), 5);
        assert!(parts[0].chars().all(|c| c.is_ascii_uppercase()));
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert!(parts[2].chars().all(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn room_codes_are_randomised() {
        let a = RoomCode::generate();
        let b = RoomCode::generate();
        assert_ne!(a, b);
    }
}
