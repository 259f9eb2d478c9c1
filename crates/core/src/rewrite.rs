//! Chapter rewriting: strip active content, resolve images and stylesheets
//! against the archive, and serialize the body for display.
//!
//! [`rewrite_chapter`] is pure. Given the same markup, path and archive it
//! produces byte-identical output, including resource handle numbering.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use quick_xml::events::Event;
use quick_xml::{Reader as XmlReader, Writer as XmlWriter};
use scraper::{ElementRef, Html, Node};
use serde::{Deserialize, Serialize};

use crate::archive::Archive;
use crate::paths;

/// Elements removed together with everything inside them.
///
/// Attribute-level sanitization (inline `on*` handlers, `javascript:` URLs)
/// is not performed.
pub const STRIPPED_ELEMENTS: &[&str] = &["script", "iframe", "object", "embed"];

pub const HANDLE_PREFIX: &str = "blob:folio/";

pub const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["style", "xmp", "noembed", "noframes", "noscript", "plaintext"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Embed images as `data:` URIs instead of `blob:folio/<n>` handles.
    pub inline_images: bool,
    /// Carry `<style>` and stylesheet links from `<head>` into the output.
    pub keep_head_styles: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            inline_images: false,
            keep_head_styles: true,
        }
    }
}

/// An archive resource referenced by a handle in rewritten markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedResource {
    pub handle: String,
    pub archive_path: String,
    pub media_type: &'static str,
    pub data: Arc<[u8]>,
}

/// Display-ready chapter. Dropping it releases every materialized resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedChapter {
    pub path: String,
    pub markup: String,
    pub resources: Vec<MaterializedResource>,
    /// Fragment targets present in the chapter (`id`, and `name` on `<a>`).
    pub anchors: BTreeSet<String>,
}

impl RenderedChapter {
    pub fn has_anchor(&self, fragment: &str) -> bool {
        self.anchors.contains(fragment)
    }

    pub fn resource(&self, handle: &str) -> Option<&MaterializedResource> {
        self.resources.iter().find(|r| r.handle == handle)
    }
}

/// Turn XML self-closing tags of non-void elements (`<title/>`, `<a id="x"/>`)
/// into open/close pairs, which the HTML parser in [`rewrite_chapter`] would
/// otherwise read as unclosed start tags.
///
/// Markup that is not well-formed XML is returned unchanged.
pub fn expand_self_closing(markup: &str) -> Cow<'_, str> {
    let mut reader = XmlReader::from_str(markup);
    let mut writer = XmlWriter::new(Vec::with_capacity(markup.len() + 64));
    let mut expanded = false;

    loop {
        let written = match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
                if VOID_ELEMENTS.contains(&name.as_str()) {
                    writer.write_event(Event::Empty(e))
                } else {
                    expanded = true;
                    let end = e.to_end().into_owned();
                    writer
                        .write_event(Event::Start(e))
                        .and_then(|()| writer.write_event(Event::End(end)))
                }
            }
            Ok(event) => writer.write_event(event),
            Err(e) => {
                tracing::trace!("Chapter is not well-formed XML, parsing as HTML: {}", e);
                return Cow::Borrowed(markup);
            }
        };
        if let Err(e) = written {
            tracing::debug!("Could not re-serialize chapter: {}", e);
            return Cow::Borrowed(markup);
        }
    }

    if !expanded {
        return Cow::Borrowed(markup);
    }
    match String::from_utf8(writer.into_inner()) {
        Ok(out) => Cow::Owned(out),
        Err(_) => Cow::Borrowed(markup),
    }
}

/// Rewrite a chapter document located at `chapter_path` in `archive`.
pub fn rewrite_chapter(
    markup: &str,
    chapter_path: &str,
    archive: &Archive,
    options: &RenderOptions,
) -> RenderedChapter {
    let document = Html::parse_document(markup);
    let root = document.root_element();
    let section = |tag: &str| {
        root.children()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == tag)
    };

    let mut writer = Writer {
        archive,
        base_dir: paths::parent_dir(chapter_path),
        options,
        out: String::with_capacity(markup.len()),
        resources: Vec::new(),
        handles: HashMap::new(),
        anchors: BTreeSet::new(),
    };

    if options.keep_head_styles {
        if let Some(head) = section("head") {
            writer.head_styles(head);
        }
    }
    writer.children(section("body").unwrap_or(root));

    tracing::trace!(
        "Rewrote {} ({} bytes, {} resources, {} anchors)",
        chapter_path,
        writer.out.len(),
        writer.resources.len(),
        writer.anchors.len()
    );

    RenderedChapter {
        path: chapter_path.to_string(),
        markup: writer.out,
        resources: writer.resources,
        anchors: writer.anchors,
    }
}

struct Writer<'a> {
    archive: &'a Archive,
    base_dir: &'a str,
    options: &'a RenderOptions,
    out: String,
    resources: Vec<MaterializedResource>,
    /// archive path → handle, so repeated references share one resource
    handles: HashMap<String, String>,
    anchors: BTreeSet<String>,
}

impl Writer<'_> {
    fn head_styles(&mut self, head: ElementRef<'_>) {
        for el in head.children().filter_map(ElementRef::wrap) {
            match el.value().name() {
                "style" => {
                    let css: String = el.text().collect();
                    self.push_style(&css);
                }
                "link" if is_stylesheet_link(&el) => {
                    if let Some(css) = el.value().attr("href").and_then(|h| self.stylesheet(h)) {
                        self.push_style(&css);
                    }
                }
                _ => {}
            }
        }
    }

    fn children(&mut self, parent: ElementRef<'_>) {
        let raw = RAW_TEXT_ELEMENTS.contains(&parent.value().name());
        for child in parent.children() {
            match child.value() {
                Node::Element(_) => {
                    if let Some(el) = ElementRef::wrap(child) {
                        self.element(el);
                    }
                }
                Node::Text(text) if raw => self.out.push_str(text),
                Node::Text(text) => escape_text(&mut self.out, text),
                Node::Comment(comment) => {
                    self.out.push_str("<!--");
                    self.out.push_str(comment);
                    self.out.push_str("-->");
                }
                _ => {}
            }
        }
    }

    fn element(&mut self, el: ElementRef<'_>) {
        let name = el.value().name();
        if STRIPPED_ELEMENTS.contains(&name) {
            return;
        }

        if let Some(id) = el.value().id() {
            self.anchors.insert(id.to_string());
        }
        if name == "a" {
            if let Some(anchor) = el.value().attr("name") {
                self.anchors.insert(anchor.to_string());
            }
        }

        if name == "link" && is_stylesheet_link(&el) {
            if let Some(css) = el.value().attr("href").and_then(|h| self.stylesheet(h)) {
                self.push_style(&css);
                return;
            }
        }

        let image_attr = match name {
            "img" => Some("src"),
            "image" => Some("href"),
            _ => None,
        };

        self.out.push('<');
        self.out.push_str(name);
        for (attr, value) in el.value().attrs.iter() {
            let local: &str = &attr.local;
            let value: &str = value;
            let value = match image_attr {
                Some(target) if target == local => self
                    .image_ref(value)
                    .unwrap_or_else(|| value.to_string()),
                _ => value.to_string(),
            };
            self.out.push(' ');
            // foreign content keeps prefixes such as xlink: and xmlns:
            if let Some(prefix) = &attr.prefix {
                self.out.push_str(prefix);
                self.out.push(':');
            }
            self.out.push_str(local);
            self.out.push_str("=\"");
            escape_attr(&mut self.out, &value);
            self.out.push('"');
        }
        self.out.push('>');

        if VOID_ELEMENTS.contains(&name) {
            return;
        }
        self.children(el);
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
    }

    /// Archive path for a chapter-relative reference, if it points into the archive.
    fn locate(&self, href: &str) -> Option<String> {
        let (file, _) = paths::split_fragment(href.trim());
        if file.is_empty() || paths::is_external(file) {
            return None;
        }
        let resolved = paths::resolve_relative(self.base_dir, file);
        let found = self.archive.resolve_entry(&resolved).map(str::to_string);
        if found.is_none() {
            tracing::debug!("Unresolved reference {} (looked for {})", href, resolved);
        }
        found
    }

    /// Replacement `src` for an image, or `None` to keep the original reference.
    fn image_ref(&mut self, src: &str) -> Option<String> {
        let path = self.locate(src)?;
        if let Some(handle) = self.handles.get(&path) {
            return Some(handle.clone());
        }
        let data = self.archive.lookup_shared(&path)?;
        let media_type = paths::media_type_for_path(&path);

        let handle = if self.options.inline_images {
            format!("data:{};base64,{}", media_type, BASE64.encode(&data))
        } else {
            let handle = format!("{}{}", HANDLE_PREFIX, self.resources.len() + 1);
            self.resources.push(MaterializedResource {
                handle: handle.clone(),
                archive_path: path.clone(),
                media_type,
                data,
            });
            handle
        };
        self.handles.insert(path, handle.clone());
        Some(handle)
    }

    fn stylesheet(&self, href: &str) -> Option<String> {
        let path = self.locate(href)?;
        self.archive.read_text_lossy(&path)
    }

    fn push_style(&mut self, css: &str) {
        self.out.push_str("<style>");
        // keep inlined CSS from closing the element early
        self.out.push_str(&css.replace("</", "<\\/"));
        self.out.push_str("</style>");
    }
}

fn is_stylesheet_link(el: &ElementRef<'_>) -> bool {
    el.value()
        .attr("rel")
        .is_some_and(|rel| {
            rel.split_whitespace()
                .any(|t| t.eq_ignore_ascii_case("stylesheet"))
        })
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}
