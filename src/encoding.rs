use std::borrow::Cow;
use std::fmt;

use anyhow::{Result, anyhow};
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8, UTF_16BE, UTF_16LE};

const BINARY_SNIFF_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingSource {
    Override,
    Bom,
    Detector,
    AssumedUtf8,
}

impl fmt::Display for EncodingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EncodingSource::Override => "override",
            EncodingSource::Bom => "bom",
            EncodingSource::Detector => "detector",
            EncodingSource::AssumedUtf8 => "assumed-utf8",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static Encoding,
    pub source: EncodingSource,
    pub had_errors: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EncodingStrategy {
    override_encoding: Option<&'static Encoding>,
}

impl EncodingStrategy {
    pub fn new(override_label: Option<&str>) -> Result<Self> {
        let override_encoding = match override_label {
            Some(label) => {
                let trimmed = label.trim();
                Some(
                    Encoding::for_label(trimmed.as_bytes())
                        .ok_or_else(|| anyhow!("unknown encoding override '{trimmed}'"))?,
                )
            }
            None => None,
        };
        Ok(Self { override_encoding })
    }

    pub fn describe(&self) -> String {
        match self.override_encoding {
            Some(enc) => format!("override ({}), auto-detect disabled", enc.name()),
            None => "auto-detect (BOM, then detector, then UTF-8)".to_string(),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> DecodedText {
        let (encoding, source) = match self.override_encoding {
            Some(enc) => (enc, EncodingSource::Override),
            None => detect_encoding(bytes),
        };
        let (text, _, had_errors) = encoding.decode(bytes);
        DecodedText {
            text: text.into_owned(),
            encoding,
            source,
            had_errors,
        }
    }
}

fn detect_encoding(bytes: &[u8]) -> (&'static Encoding, EncodingSource) {
    if let Some(encoding) = sniff_bom(bytes) {
        return (encoding, EncodingSource::Bom);
    }
    if std::str::from_utf8(bytes).is_ok() {
        return (UTF_8, EncodingSource::AssumedUtf8);
    }
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    (detector.guess(None, true), EncodingSource::Detector)
}

fn sniff_bom(bytes: &[u8]) -> Option<&'static Encoding> {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        Some(UTF_8)
    } else if bytes.starts_with(&[0xFF, 0xFE]) {
        Some(UTF_16LE)
    } else if bytes.starts_with(&[0xFE, 0xFF]) {
        Some(UTF_16BE)
    } else {
        None
    }
}

// Falls back to UTF-8 output for encodings encoding_rs cannot encode into.
pub fn encode_text<'a>(text: &'a str, encoding: &'static Encoding) -> (Cow<'a, [u8]>, bool) {
    let (bytes, _, had_errors) = encoding.encode(text);
    (bytes, had_errors)
}

pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_BYTES).any(|byte| *byte == 0)
}
