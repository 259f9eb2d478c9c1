//! End-to-end tests: zip bytes in, rendered chapters and positions out.

use std::io::{Cursor, Write};

use folio_core::archive::Archive;
use folio_core::navigation::resolve_outline;
use folio_core::package::parse_package_document;
use folio_core::prelude::*;
use folio_core::rewrite::rewrite_chapter;
use proptest::prelude::*;

struct EpubBuilder {
    files: Vec<(String, String)>,
}

impl EpubBuilder {
    /// Container pointing at `package_path`, plus the given package document.
    fn new(package_path: &str, package: &str) -> Self {
        let container = format!(
            r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="{package_path}" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#
        );
        Self {
            files: vec![
                ("mimetype".into(), "application/epub+zip".into()),
                ("META-INF/container.xml".into(), container),
                (package_path.into(), package.into()),
            ],
        }
    }

    fn file(mut self, path: &str, content: &str) -> Self {
        self.files.push((path.into(), content.into()));
        self
    }

    fn build(&self) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let opts: zip::write::FileOptions<'_, ()> = zip::write::FileOptions::default();
        for (name, content) in &self.files {
            zip.start_file(name.as_str(), opts).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }
}

fn package(manifest: &str, spine: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>Fixture</dc:title></metadata>
  <manifest>{manifest}</manifest>
  <spine>{spine}</spine>
</package>"#
    )
}

fn chapter(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>c</title></head><body>{body}</body></html>"#
    )
}

fn two_chapter_book() -> Vec<u8> {
    EpubBuilder::new(
        "content.opf",
        &package(
            r#"<item id="c1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
               <item id="c2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
               <item id="img" href="images/cover.jpg" media-type="image/jpeg"/>"#,
            r#"<itemref idref="c1"/><itemref idref="c2"/>"#,
        ),
    )
    .file(
        "text/ch1.xhtml",
        &chapter(r#"<h1 id="start">One</h1><img src="../images/cover.jpg"/>"#),
    )
    .file("text/ch2.xhtml", &chapter("<p>Two</p>"))
    .file("images/cover.jpg", "JPEG")
    .build()
}

#[test]
fn valid_book_loads_and_first_chapter_has_markup() {
    let mut session = ReadingSession::default();
    session.load_book(&two_chapter_book()).unwrap();
    session.go_to_chapter(0, None).unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    let chapter = session.current_chapter().unwrap();
    assert!(!chapter.markup.trim().is_empty());
    assert_eq!(chapter.resources[0].archive_path, "images/cover.jpg");
}

#[test]
fn missing_container_is_invalid_epub() {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let opts: zip::write::FileOptions<'_, ()> = zip::write::FileOptions::default();
    zip.start_file("mimetype", opts).unwrap();
    zip.write_all(b"application/epub+zip").unwrap();
    let bytes = zip.finish().unwrap().into_inner();

    let mut session = ReadingSession::default();
    let err = session.load_book(&bytes).unwrap_err();
    assert!(matches!(err, EpubError::InvalidEpub(_)));
    assert!(!err.is_recoverable());
    assert_eq!(session.state(), SessionState::Error);
    assert!(session.metadata().is_none());
}

#[test]
fn unresolvable_spine_is_invalid_epub() {
    let bytes = EpubBuilder::new(
        "OEBPS/content.opf",
        &package(
            r#"<item id="c1" href="ch1.xhtml" media-type="application/xhtml+xml"/>"#,
            r#"<itemref idref="pruned"/><itemref idref="also-pruned"/>"#,
        ),
    )
    .file("OEBPS/ch1.xhtml", &chapter("<p>x</p>"))
    .build();

    let err = ReadingSession::default().load_book(&bytes).unwrap_err();
    assert!(matches!(err, EpubError::InvalidEpub(_)));
}

#[test]
fn next_past_the_end_is_a_noop() {
    let mut session = ReadingSession::default();
    session.load_book(&two_chapter_book()).unwrap();
    session.go_to_chapter(1, None).unwrap();

    assert!(!session.next().unwrap());
    assert_eq!(session.position().unwrap().spine_index, 1);
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn revisiting_a_chapter_gives_identical_markup() {
    let mut session = ReadingSession::default();
    session.load_book(&two_chapter_book()).unwrap();
    let first = session.current_chapter().unwrap().markup.clone();

    session.go_to_chapter(1, None).unwrap();
    session.go_to_chapter(0, None).unwrap();
    let again = session.current_chapter().unwrap().markup.clone();
    session.go_to_chapter(0, None).unwrap();

    assert_eq!(first, again);
    assert_eq!(session.current_chapter().unwrap().markup, again);
}

#[test]
fn script_is_removed_and_paragraph_kept() {
    let archive = Archive::default();
    let out = rewrite_chapter(
        "<script>alert(1)</script><p>ok</p>",
        "text/ch1.xhtml",
        &archive,
        &RenderOptions::default(),
    );
    assert!(out.markup.contains("<p>ok</p>"));
    assert!(!out.markup.contains("<script"));
}

#[test]
fn parent_relative_image_resolves_to_sibling_directory() {
    let archive = Archive::from_entries([("images/cover.jpg", "JPEG")]);
    let out = rewrite_chapter(
        r#"<img src="../images/cover.jpg">"#,
        "text/ch1.xhtml",
        &archive,
        &RenderOptions::default(),
    );
    assert_eq!(out.resources.len(), 1);
    assert_eq!(out.resources[0].archive_path, "images/cover.jpg");
}

#[test]
fn fragment_only_nav_entry_inherits_previous_file() {
    let nav = r##"<html xmlns:epub="http://www.idpf.org/2007/ops"><body>
<nav epub:type="toc"><ol>
  <li><a href="text/ch2.xhtml">Two</a></li>
  <li><a href="#later">Later in two</a></li>
</ol></nav></body></html>"##;
    let pkg = parse_package_document(
        &package(
            r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
               <item id="c1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
               <item id="c2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>"#,
            r#"<itemref idref="c1"/><itemref idref="c2"/>"#,
        ),
        "content.opf",
    );
    let archive = Archive::from_entries([("nav.xhtml", nav)]);

    let outline = resolve_outline(&archive, &pkg);
    assert_eq!(outline[1].target_href, outline[0].target_href);
    assert_eq!(outline[1].target_href, "text/ch2.xhtml");
    assert_eq!(outline[1].spine_index, 1);
    assert_eq!(outline[1].fragment.as_deref(), Some("later"));
}

proptest! {
    #[test]
    fn outline_without_navigation_lists_every_spine_item(count in 1usize..25) {
        let manifest: String = (0..count)
            .map(|i| format!(r#"<item id="c{i}" href="c{i}.xhtml" media-type="application/xhtml+xml"/>"#))
            .collect();
        let spine: String = (0..count).map(|i| format!(r#"<itemref idref="c{i}"/>"#)).collect();
        let pkg = parse_package_document(&package(&manifest, &spine), "OPS/content.opf");

        let outline = resolve_outline(&Archive::default(), &pkg);
        prop_assert_eq!(outline.len(), count);
        for (i, entry) in outline.iter().enumerate() {
            prop_assert_eq!(&entry.title, &format!("Chapter {}", i + 1));
            prop_assert_eq!(entry.spine_index, i);
            prop_assert_eq!(entry.depth, 1);
            prop_assert!(entry.fragment.is_none());
        }
    }
}
