use crate::store::StoreError;

/// Attempt counters are stored as a decimal integer, the encoding produced
/// by the store's atomic increment. Anything else is reported as corrupt so
/// the caller can discard it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct AttemptCount(pub u64);

impl AttemptCount {
    /// # Errors
    /// Returns `StoreError::Corrupt` for anything but ASCII digits.
    pub fn decode(key: &str, raw: &[u8]) -> Result<Self, StoreError> {
        std::str::from_utf8(raw)
            .ok()
            .map(str::trim)
            .filter(|text| !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|text| text.parse::<u64>().ok())
            .map(Self)
            .ok_or_else(|| StoreError::Corrupt {
                key: key.to_string(),
            })
    }

    #[must_use]
    pub fn encode(self) -> Vec<u8> {
        self.0.to_string().into_bytes()
    }
}
