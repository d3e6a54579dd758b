#![forbid(unsafe_code)]

use std::fmt;

/// Maximum symbol length in bytes; symbols are stored null-padded in the
/// shared region directory.
pub const TICKER_LEN: usize = 16;

// TickerSymbol is a fixed-size, Copy representation of a ticker so it can
// live inside the mmap directory without any heap pointers.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TickerSymbol([u8; TICKER_LEN]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickerError {
    #[error("ticker symbol is empty")]
    Empty,
    #[error("ticker symbol is {0} bytes, limit is 16")]
    TooLong(usize),
    #[error("ticker symbol must be printable ASCII")]
    NotAscii,
}

impl TickerSymbol {
    pub fn new(symbol: &str) -> Result<Self, TickerError> {
        let bytes = symbol.as_bytes();
        if bytes.is_empty() {
            return Err(TickerError::Empty);
        }
        if bytes.len() > TICKER_LEN {
            return Err(TickerError::TooLong(bytes.len()));
        }
        if !bytes.iter().all(|b| b.is_ascii_graphic()) {
            return Err(TickerError::NotAscii);
        }
        let mut raw = [0u8; TICKER_LEN];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(raw))
    }

    pub fn from_raw(raw: [u8; TICKER_LEN]) -> Self {
        Self(raw)
    }

    pub fn to_raw(self) -> [u8; TICKER_LEN] {
        self.0
    }

    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(TICKER_LEN);
        // constructor only admits ASCII; a corrupted directory reads as empty
        std::str::from_utf8(&self.0[..end]).unwrap_or("")
    }
}

impl fmt::Debug for TickerSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TickerSymbol({})", self.as_str())
    }
}

impl fmt::Display for TickerSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_round_trips_through_raw_bytes() {
        let sym = TickerSymbol::new("BRK.B").unwrap();
        assert_eq!(sym.as_str(), "BRK.B");
        assert_eq!(TickerSymbol::from_raw(sym.to_raw()), sym);
    }

    #[test]
    fn rejects_bad_symbols() {
        assert_eq!(TickerSymbol::new(""), Err(TickerError::Empty));
        assert_eq!(
            TickerSymbol::new("ABCDEFGHIJKLMNOPQ"),
            Err(TickerError::TooLong(17))
        );
        assert_eq!(TickerSymbol::new("A B"), Err(TickerError::NotAscii));
    }

    #[test]
    fn symbol_is_pod_sized() {
        assert_eq!(std::mem::size_of::<TickerSymbol>(), TICKER_LEN);
    }
}
