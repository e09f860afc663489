//! Serial capture configuration

use std::time::Duration;

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

/// Text encoding of a serial console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

impl TextEncoding {
    /// Decodes bytes only if they are valid in this encoding
    pub fn decode_strict(&self, bytes: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_string),
            TextEncoding::Latin1 => Some(Self::latin1(bytes)),
        }
    }

    /// Decodes bytes, replacing invalid sequences
    pub fn decode_lossy(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Latin1 => Self::latin1(bytes),
        }
    }

    fn latin1(bytes: &[u8]) -> String {
        bytes.iter().map(|&b| b as char).collect()
    }
}

/// Serial console capture settings
///
/// Defaults match a typical embedded console: 115200 8N1, 100 ms read
/// timeout, half a second of linger after the command ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialCaptureConfig {
    /// Device path, e.g. `/dev/ttyUSB0`
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Poll timeout of each read
    pub read_timeout: Duration,
    pub encoding: TextEncoding,
    /// How long to keep capturing after the primary command exits
    pub linger: Duration,
    /// Maximum number of bytes decoded into the result preview
    pub preview_bytes: usize,
}

impl SerialCaptureConfig {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout: Duration::from_millis(100),
            encoding: TextEncoding::Utf8,
            linger: Duration::from_millis(500),
            preview_bytes: 2000,
        }
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    pub fn preview_bytes(mut self, preview_bytes: usize) -> Self {
        self.preview_bytes = preview_bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SerialCaptureConfig::new("/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.linger, Duration::from_millis(500));
        assert_eq!(config.preview_bytes, 2000);
    }

    #[test]
    fn test_utf8_strict_rejects_invalid() {
        assert_eq!(
            TextEncoding::Utf8.decode_strict(b"boot ok\n"),
            Some("boot ok\n".to_string())
        );
        assert_eq!(TextEncoding::Utf8.decode_strict(&[0xff, 0xfe, 0x00]), None);
        assert_eq!(TextEncoding::Utf8.decode_lossy(&[b'a', 0xff]), "a\u{fffd}");
    }

    #[test]
    fn test_latin1_always_decodes() {
        assert_eq!(
            TextEncoding::Latin1.decode_strict(&[0x41, 0xe9]),
            Some("Aé".to_string())
        );
    }
}
