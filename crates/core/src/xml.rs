//! Small helpers over quick-xml events shared by the package and NCX parsers.

use quick_xml::events::{BytesStart, BytesText};

/// Local (prefix-free) element name.
pub(crate) fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Qualified element name as written, e.g. `dc:title`.
pub(crate) fn qualified_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// Value of the attribute whose local name is `local`, entity-unescaped.
pub(crate) fn attr(e: &BytesStart<'_>, local: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local.as_bytes())
        .map(|a| match a.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
        })
}

/// Unescaped text content; unknown entities fall back to the raw text.
pub(crate) fn text(t: &BytesText<'_>) -> String {
    match t.unescape() {
        Ok(text) => text.into_owned(),
        Err(_) => String::from_utf8_lossy(t).into_owned(),
    }
}
