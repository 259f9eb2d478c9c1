//! Container resolver: `META-INF/container.xml` → package document path.

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;

use crate::archive::Archive;
use crate::error::EpubError;
use crate::security;
use crate::xml;

pub const CONTAINER_PATH: &str = "META-INF/container.xml";
pub const ENCRYPTION_PATH: &str = "META-INF/encryption.xml";

/// Locate the package document named by the first `rootfile` element.
///
/// The container descriptor is definitional for EPUB, so there is no fallback.
pub fn resolve_root_package_path(archive: &Archive) -> Result<String, EpubError> {
    let container = archive
        .read_text_lossy(CONTAINER_PATH)
        .ok_or_else(|| EpubError::InvalidEpub("missing container descriptor".into()))?;
    parse_container(&container)
}

/// Extract the `full-path` of the first `rootfile` element from container XML.
pub fn parse_container(container: &str) -> Result<String, EpubError> {
    let mut reader = XmlReader::from_str(container);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.local_name().as_ref() == b"rootfile" =>
            {
                return match xml::attr(e, "full-path") {
                    Some(path) if !path.trim().is_empty() => Ok(path.trim().to_string()),
                    _ => Err(EpubError::InvalidEpub(
                        "rootfile element has no full-path attribute".into(),
                    )),
                };
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EpubError::InvalidEpub(format!(
                    "Failed to parse container.xml: {e}"
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Err(EpubError::InvalidEpub(
        "No rootfile found in container.xml".into(),
    ))
}

/// Reject DRM-protected books. Font obfuscation entries are allowed.
pub fn check_encryption(archive: &Archive) -> Result<(), EpubError> {
    if let Some(encryption) = archive.read_text_lossy(ENCRYPTION_PATH) {
        security::check_epub_drm(&encryption)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::container_xml;

    #[test]
    fn finds_first_rootfile() {
        let xml = r#"<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
    <rootfile full-path="alt/other.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;
        assert_eq!(parse_container(xml).unwrap(), "OEBPS/content.opf");
    }

    #[test]
    fn missing_container_is_invalid_epub() {
        let archive = Archive::from_entries([("mimetype", "application/epub+zip")]);
        let err = resolve_root_package_path(&archive).unwrap_err();
        assert!(matches!(err, EpubError::InvalidEpub(ref m) if m.contains("container")));
    }

    #[test]
    fn container_without_rootfile_is_invalid_epub() {
        let err = parse_container("<container><rootfiles/></container>").unwrap_err();
        assert!(matches!(err, EpubError::InvalidEpub(_)));
    }

    #[test]
    fn resolves_from_archive() {
        let archive = Archive::from_entries([(CONTAINER_PATH, container_xml("content.opf"))]);
        assert_eq!(resolve_root_package_path(&archive).unwrap(), "content.opf");
    }

    #[test]
    fn drm_is_rejected() {
        let archive = Archive::from_entries([(
            ENCRYPTION_PATH,
            r#"<encryption><EncryptedData><resource xmlns="http://ns.adobe.com/adept"/></EncryptedData></encryption>"#,
        )]);
        assert!(matches!(
            check_encryption(&archive),
            Err(EpubError::Security(_))
        ));
    }
}
