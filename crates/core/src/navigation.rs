//! Navigation resolver: table of contents from a nav document or a legacy NCX,
//! falling back to one entry per spine item.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::archive::Archive;
use crate::package::{Package, SpineItem, NCX_MEDIA_TYPE};
use crate::paths;
use crate::xml;

/// One flattened table-of-contents row. `depth` encodes nesting (1 = top level).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub title: String,
    /// Archive-absolute path; empty when the link could not be resolved.
    pub target_href: String,
    pub fragment: Option<String>,
    /// Best-effort spine match, `0` when nothing matched.
    pub spine_index: usize,
    pub depth: u32,
}

/// An outline entry with its nested entries, rebuilt from depth annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutlineNode {
    pub entry: OutlineEntry,
    pub children: Vec<OutlineNode>,
}

/// A link as written in a navigation document, before path resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NavLink {
    pub title: String,
    pub href: String,
    pub depth: u32,
}

/// Which navigation dialect produced the links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NavSource {
    /// EPUB 3 XHTML nav document.
    Modern { path: String, links: Vec<NavLink> },
    /// EPUB 2 NCX. Depth comes from `playOrder`, see [`parse_ncx`].
    Legacy { path: String, links: Vec<NavLink> },
    None,
}

/// Build the outline for a parsed package. Never fails.
pub fn resolve_outline(archive: &Archive, package: &Package) -> Vec<OutlineEntry> {
    match locate_navigation(archive, package) {
        NavSource::Modern { path, links } => {
            tracing::debug!("Outline from nav document {} ({} links)", path, links.len());
            resolve_links(&path, &links, package, true)
        }
        NavSource::Legacy { path, links } => {
            tracing::debug!("Outline from NCX {} ({} links)", path, links.len());
            resolve_links(&path, &links, package, false)
        }
        NavSource::None => {
            tracing::debug!("No usable navigation document, using spine order");
            flat_outline(&package.spine)
        }
    }
}

/// Find and parse the first navigation source that yields links.
pub(crate) fn locate_navigation(archive: &Archive, package: &Package) -> NavSource {
    if let Some(nav) = package.manifest.find_by_property("nav") {
        let path = package.resolve_href(&nav.href);
        match archive.read_text_lossy(&path) {
            Some(content) => {
                let links = parse_nav_document(&content);
                if !links.is_empty() {
                    return NavSource::Modern { path, links };
                }
                tracing::debug!("Nav document {} has no toc links", path);
            }
            None => tracing::warn!("Nav document {} is missing from the archive", path),
        }
    }

    let ncx = package
        .spine_toc
        .as_deref()
        .and_then(|id| package.manifest.get(id))
        .or_else(|| package.manifest.find_by_media_type(NCX_MEDIA_TYPE));
    if let Some(ncx) = ncx {
        let path = package.resolve_href(&ncx.href);
        match archive.read_text_lossy(&path) {
            Some(content) => {
                let links = parse_ncx(&content);
                if !links.is_empty() {
                    return NavSource::Legacy { path, links };
                }
                tracing::debug!("NCX {} has no navPoints", path);
            }
            None => tracing::warn!("NCX {} is missing from the archive", path),
        }
    }

    NavSource::None
}

/// One "Chapter N" entry per spine item.
pub fn flat_outline(spine: &[SpineItem]) -> Vec<OutlineEntry> {
    spine
        .iter()
        .enumerate()
        .map(|(index, item)| OutlineEntry {
            title: format!("Chapter {}", index + 1),
            target_href: item.resolved_href.clone(),
            fragment: None,
            spine_index: index,
            depth: 1,
        })
        .collect()
}

fn resolve_links(
    nav_path: &str,
    links: &[NavLink],
    package: &Package,
    inherit_file: bool,
) -> Vec<OutlineEntry> {
    let base_dir = paths::parent_dir(nav_path);
    let mut entries: Vec<OutlineEntry> = Vec::with_capacity(links.len());

    for link in links {
        let (file, fragment) = paths::split_fragment(&link.href);
        let target_href = if file.is_empty() {
            // same-page deep links point at the previous entry's document
            match entries.last() {
                Some(prev) if inherit_file => prev.target_href.clone(),
                _ => String::new(),
            }
        } else if paths::is_external(file) {
            file.to_string()
        } else {
            paths::resolve_relative(base_dir, file)
        };

        let spine_index = package.spine_index_of(&target_href).unwrap_or(0);

        entries.push(OutlineEntry {
            title: link.title.clone(),
            target_href,
            fragment: fragment.map(str::to_string),
            spine_index,
            depth: link.depth,
        });
    }
    entries
}

fn is_toc_attr(name: &str, value: &str) -> bool {
    let typed = (name == "type" || name.ends_with(":type"))
        && value.split_whitespace().any(|t| t == "toc");
    typed || (name == "role" && value.trim() == "doc-toc")
}

/// Links inside list items of the `toc` nav. Anchors without `href` are skipped.
///
/// Nav documents are XHTML, so they are read as XML first. Documents that are
/// not well-formed go through the HTML parser instead.
pub(crate) fn parse_nav_document(content: &str) -> Vec<NavLink> {
    match parse_nav_xml(content) {
        Some(links) => links,
        None => {
            tracing::debug!("Nav document is not well-formed XML, parsing as HTML");
            parse_nav_html(content)
        }
    }
}

/// Element open inside the toc nav.
struct NavFrame {
    name: String,
    /// A list item whose list sits inside another list item.
    nested: bool,
}

struct PendingLink {
    href: String,
    depth: u32,
    title: String,
    /// Open elements inside the anchor.
    open: usize,
}

/// `None` when the document is not well-formed.
fn parse_nav_xml(content: &str) -> Option<Vec<NavLink>> {
    let mut reader = XmlReader::from_str(content);
    let mut buf = Vec::new();
    let mut links = Vec::new();
    // empty until the toc nav opens
    let mut stack: Vec<NavFrame> = Vec::new();
    let mut pending: Option<PendingLink> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = xml::local_name(e);
                if stack.is_empty() {
                    if name == "nav" && has_toc_attr(e) {
                        stack.push(NavFrame { name, nested: false });
                    }
                } else if let Some(link) = pending.as_mut() {
                    link.open += 1;
                } else {
                    let nested = name == "li" && nested_list_item(&stack);
                    if name == "a" {
                        pending = start_link(e, &stack);
                    }
                    stack.push(NavFrame { name, nested });
                }
            }
            Ok(Event::Empty(ref e)) if !stack.is_empty() && pending.is_none() => {
                if xml::local_name(e) == "a" {
                    if let Some(link) = start_link(e, &stack) {
                        links.push(finish_link(link));
                    }
                }
            }
            Ok(Event::Text(ref t)) => {
                if let Some(link) = pending.as_mut() {
                    // HTML entities such as &nbsp; are not XML
                    link.title.push_str(&t.unescape().ok()?);
                }
            }
            Ok(Event::CData(ref t)) => {
                if let Some(link) = pending.as_mut() {
                    link.title.push_str(&String::from_utf8_lossy(t));
                }
            }
            Ok(Event::End(_)) if !stack.is_empty() => {
                if let Some(link) = pending.as_mut() {
                    if link.open > 0 {
                        link.open -= 1;
                        buf.clear();
                        continue;
                    }
                }
                if let Some(frame) = stack.pop() {
                    if frame.name == "a" {
                        if let Some(link) = pending.take() {
                            links.push(finish_link(link));
                        }
                    }
                }
                if stack.is_empty() {
                    return Some(links);
                }
            }
            Ok(Event::Eof) => return Some(links),
            Err(e) => {
                tracing::trace!("Nav XML error: {}", e);
                return None;
            }
            _ => {}
        }
        buf.clear();
    }
}

fn has_toc_attr(e: &BytesStart<'_>) -> bool {
    e.attributes().flatten().any(|a| {
        let name = String::from_utf8_lossy(a.key.as_ref());
        let value = String::from_utf8_lossy(&a.value);
        is_toc_attr(&name, &value)
    })
}

fn nested_list_item(stack: &[NavFrame]) -> bool {
    match stack {
        [.., grand, list] => {
            matches!(list.name.as_str(), "ul" | "ol") && grand.name == "li"
        }
        _ => false,
    }
}

/// Anchors count only inside a list item.
fn start_link(e: &BytesStart<'_>, stack: &[NavFrame]) -> Option<PendingLink> {
    if !stack.iter().any(|f| f.name == "li") {
        return None;
    }
    Some(PendingLink {
        href: xml::attr(e, "href")?,
        depth: 1 + stack.iter().filter(|f| f.nested).count() as u32,
        title: String::new(),
        open: 0,
    })
}

fn finish_link(link: PendingLink) -> NavLink {
    NavLink {
        title: link.title.trim().to_string(),
        href: link.href,
        depth: link.depth,
    }
}

fn is_toc_nav(nav: &ElementRef<'_>) -> bool {
    nav.value().attrs().any(|(name, value)| is_toc_attr(name, value))
}

fn parse_nav_html(content: &str) -> Vec<NavLink> {
    let document = Html::parse_document(content);
    let (Ok(nav_selector), Ok(link_selector)) = (Selector::parse("nav"), Selector::parse("li a"))
    else {
        return Vec::new();
    };

    let Some(nav) = document.select(&nav_selector).find(is_toc_nav) else {
        return Vec::new();
    };

    nav.select(&link_selector)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?;
            Some(NavLink {
                title: anchor.text().collect::<String>().trim().to_string(),
                href: href.to_string(),
                depth: nav_depth(&anchor, &nav),
            })
        })
        .collect()
}

/// 1 + the number of enclosing list items whose list is itself inside a list item.
fn nav_depth(anchor: &ElementRef<'_>, nav: &ElementRef<'_>) -> u32 {
    let mut depth = 1;
    let enclosing = anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .take_while(|el| el != nav);
    for el in enclosing {
        if el.value().name() != "li" {
            continue;
        }
        let list = el.parent().and_then(ElementRef::wrap);
        let nested = list.is_some_and(|list| {
            matches!(list.value().name(), "ul" | "ol")
                && list
                    .parent()
                    .and_then(ElementRef::wrap)
                    .is_some_and(|p| p.value().name() == "li")
        });
        if nested {
            depth += 1;
        }
    }
    depth
}

struct NavPointFrame {
    slot: usize,
    depth: u32,
    title: Option<String>,
    src: Option<String>,
}

/// Walk `navPoint` elements in document order.
///
/// Depth is taken from the `playOrder` attribute, which is really a reading
/// sequence number. Producers vary too much for any corrected heuristic, so
/// the value is used as-is (missing or unparsable → 1).
pub(crate) fn parse_ncx(content: &str) -> Vec<NavLink> {
    let mut reader = XmlReader::from_str(content);
    let mut buf = Vec::new();
    let mut slots: Vec<Option<NavLink>> = Vec::new();
    let mut frames: Vec<NavPointFrame> = Vec::new();
    let mut label_text: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"navPoint" => {
                    let depth = xml::attr(e, "playOrder")
                        .and_then(|v| v.trim().parse::<u32>().ok())
                        .unwrap_or(1)
                        .max(1);
                    slots.push(None);
                    frames.push(NavPointFrame {
                        slot: slots.len() - 1,
                        depth,
                        title: None,
                        src: None,
                    });
                }
                b"text" => {
                    if frames.last().is_some_and(|f| f.title.is_none()) {
                        label_text = Some(String::new());
                    }
                }
                b"content" => set_src(&mut frames, e),
                _ => {}
            },
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"content" => {
                set_src(&mut frames, e)
            }
            Ok(Event::Text(ref t)) => {
                if let Some(label) = label_text.as_mut() {
                    label.push_str(&xml::text(t));
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"text" => {
                    if let (Some(label), Some(frame)) = (label_text.take(), frames.last_mut()) {
                        frame.title = Some(label.trim().to_string());
                    }
                }
                b"navPoint" => {
                    if let Some(frame) = frames.pop() {
                        let title = frame.title.unwrap_or_default();
                        let src = frame.src.unwrap_or_default();
                        if !title.is_empty() && !src.is_empty() {
                            slots[frame.slot] = Some(NavLink {
                                title,
                                href: src,
                                depth: frame.depth,
                            });
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!("NCX is malformed, keeping {} parsed entries: {}", slots.len(), e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    slots.into_iter().flatten().collect()
}

fn set_src(frames: &mut [NavPointFrame], e: &BytesStart<'_>) {
    if let Some(frame) = frames.last_mut() {
        if frame.src.is_none() {
            frame.src = xml::attr(e, "src");
        }
    }
}

/// Rebuild the tree from depth annotations: an entry is a child of the
/// nearest preceding entry with a smaller depth.
pub fn build_outline_tree(entries: &[OutlineEntry]) -> Vec<OutlineNode> {
    let mut roots = Vec::new();
    let mut open: Vec<OutlineNode> = Vec::new();

    for entry in entries {
        while open.last().is_some_and(|n| n.entry.depth >= entry.depth) {
            close_node(&mut open, &mut roots);
        }
        open.push(OutlineNode {
            entry: entry.clone(),
            children: Vec::new(),
        });
    }
    while !open.is_empty() {
        close_node(&mut open, &mut roots);
    }
    roots
}

fn close_node(open: &mut Vec<OutlineNode>, roots: &mut Vec<OutlineNode>) {
    if let Some(node) = open.pop() {
        match open.last_mut() {
            Some(parent) => parent.children.push(node),
            None => roots.push(node),
        }
    }
}
