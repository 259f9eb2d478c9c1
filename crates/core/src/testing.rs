//! In-memory EPUB fixtures for unit tests.

use std::io::{Cursor, Write};

pub(crate) fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let opts: zip::write::FileOptions<'_, ()> =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in entries {
        zip.start_file(*name, opts).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub(crate) fn container_xml(package_path: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="{package_path}" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#
    )
}

pub(crate) fn package_xml(metadata: &str, manifest: &str, spine_attrs: &str, spine: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">{metadata}</metadata>
  <manifest>{manifest}</manifest>
  <spine{spine_attrs}>{spine}</spine>
</package>"#
    )
}

pub(crate) const SAMPLE_NAV: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Contents</title></head>
<body>
  <nav epub:type="toc" id="toc">
    <ol>
      <li><a href="Text/ch1.xhtml">Chapter One</a>
        <ol>
          <li><a href="#part2">Part Two</a></li>
        </ol>
      </li>
      <li><a href="Text/ch2.xhtml">Chapter Two</a></li>
    </ol>
  </nav>
</body>
</html>"##;

pub(crate) const SAMPLE_CH1: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>One</title><link rel="stylesheet" type="text/css" href="../Styles/main.css"/></head>
<body>
  <h1 id="top">Chapter One</h1>
  <img src="../Images/cover.jpg" alt="cover"/>
  <script>alert(1)</script>
  <p id="part2">Part two starts here.</p>
</body>
</html>"#;

pub(crate) const SAMPLE_CH2: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>Two</title></head>
<body>
  <p>Second chapter. <a href="ch1.xhtml#part2">Back to part two</a></p>
</body>
</html>"#;

/// A small EPUB3 book: nav document, two chapters, a stylesheet and a cover image.
pub(crate) fn sample_epub() -> Vec<u8> {
    let container = container_xml("OEBPS/content.opf");
    let package = package_xml(
        r#"<dc:title>Sample Book</dc:title><dc:creator>Jane Doe</dc:creator><dc:language>en</dc:language>"#,
        r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
           <item id="ch1" href="Text/ch1.xhtml" media-type="application/xhtml+xml"/>
           <item id="ch2" href="Text/ch2.xhtml" media-type="application/xhtml+xml"/>
           <item id="css" href="Styles/main.css" media-type="text/css"/>
           <item id="cover-img" href="Images/cover.jpg" media-type="image/jpeg" properties="cover-image"/>"#,
        "",
        r#"<itemref idref="ch1"/><itemref idref="ch2"/>"#,
    );
    build_zip(&[
        ("mimetype", "application/epub+zip"),
        ("META-INF/container.xml", &container),
        ("OEBPS/content.opf", &package),
        ("OEBPS/nav.xhtml", SAMPLE_NAV),
        ("OEBPS/Text/ch1.xhtml", SAMPLE_CH1),
        ("OEBPS/Text/ch2.xhtml", SAMPLE_CH2),
        ("OEBPS/Styles/main.css", "p { margin: 0; }"),
        ("OEBPS/Images/cover.jpg", "JPEGDATA"),
    ])
}
