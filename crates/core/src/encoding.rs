//! Text decoding for archive documents and Unicode normalization of metadata.

use encoding_rs::Encoding;
use unicode_normalization::UnicodeNormalization;

use crate::package::Metadata;

/// Decode `bytes` strictly with the encoding named by `label`.
///
/// A byte-order mark overrides the label. Returns `Err` with a human-readable
/// detail when the label is unknown or the bytes are malformed.
pub fn decode_strict(bytes: &[u8], label: &str) -> Result<String, String> {
    let encoding = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| format!("unknown encoding label '{label}'"))?;
    let (encoding, body) = match Encoding::for_bom(bytes) {
        Some((bom_encoding, bom_len)) => (bom_encoding, &bytes[bom_len..]),
        None => (encoding, bytes),
    };
    encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .map(|text| text.into_owned())
        .ok_or_else(|| format!("malformed {} data", encoding.name()))
}

/// Decode a document without ever failing.
///
/// UTF-8 (with BOM handling) first, then the encoding named in the XML
/// declaration, then Windows-1252, which is what old producers usually meant.
pub fn decode_lossy(bytes: &[u8]) -> String {
    let (text, _, malformed) = encoding_rs::UTF_8.decode(bytes);
    if !malformed {
        return text.into_owned();
    }

    if let Some(encoding) = extract_xml_encoding(bytes).and_then(|l| Encoding::for_label(l.as_bytes()))
    {
        let (text, _, malformed) = encoding.decode(bytes);
        if !malformed {
            return text.into_owned();
        }
    }

    tracing::debug!("Falling back to Windows-1252 for a malformed UTF-8 document");
    let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    text.into_owned()
}

/// Pull the `encoding="…"` value out of a leading XML declaration.
pub fn extract_xml_encoding(bytes: &[u8]) -> Option<&str> {
    let prefix = &bytes[..bytes.len().min(100)];
    let xml_start = prefix.windows(5).position(|w| w == b"<?xml")?;
    let after_xml = &prefix[xml_start..];
    let decl_end = after_xml
        .windows(2)
        .position(|w| w == b"?>")
        .unwrap_or(after_xml.len());
    let decl = &after_xml[..decl_end];

    let enc_pos = decl
        .windows(9)
        .position(|w| w.eq_ignore_ascii_case(b"encoding="))?;
    let after_enc = &decl[enc_pos + 9..];
    let quote = *after_enc.first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let value_end = after_enc[1..].iter().position(|&b| b == quote)? + 1;
    std::str::from_utf8(&after_enc[1..value_end]).ok()
}

/// NFC-normalize every metadata field in place.
pub fn normalize_metadata(metadata: &mut Metadata) {
    for field in [
        &mut metadata.title,
        &mut metadata.creator,
        &mut metadata.language,
        &mut metadata.publisher,
        &mut metadata.description,
    ] {
        *field = field.nfc().collect();
    }
}
