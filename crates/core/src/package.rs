//! Package parser: OPF → metadata, manifest, spine, cover.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use serde::{Deserialize, Serialize};

use crate::archive::Archive;
use crate::encoding;
use crate::error::EpubError;
use crate::paths;
use crate::xml;

pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

pub const UNTITLED_PLACEHOLDER: &str = "Untitled Book";
pub const UNKNOWN_AUTHOR_PLACEHOLDER: &str = "Unknown Author";

/// Book metadata. Absent fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    pub creator: String,
    pub language: String,
    pub publisher: String,
    pub description: String,
}

impl Metadata {
    /// Title for display, with a placeholder when the book has none.
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            UNTITLED_PLACEHOLDER
        } else {
            &self.title
        }
    }

    /// Creator for display, with a placeholder when the book has none.
    pub fn display_creator(&self) -> &str {
        if self.creator.is_empty() {
            UNKNOWN_AUTHOR_PLACEHOLDER
        } else {
            &self.creator
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    /// Path relative to the package document's folder.
    pub href: String,
    pub media_type: String,
    pub properties: Vec<String>,
}

impl ManifestEntry {
    pub fn has_property(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

/// Manifest entries in document order, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
    index: HashMap<String, usize>,
}

impl Manifest {
    /// Insert an entry. A duplicate id replaces the earlier entry in place.
    pub fn insert(&mut self, entry: ManifestEntry) {
        match self.index.get(&entry.id) {
            Some(&slot) => self.entries[slot] = entry,
            None => {
                self.index.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&ManifestEntry> {
        self.index.get(id).map(|&slot| &self.entries[slot])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter()
    }

    /// First entry (in document order) carrying `property`.
    pub fn find_by_property(&self, property: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.has_property(property))
    }

    pub fn find_by_media_type(&self, media_type: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.media_type == media_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpineItem {
    pub id: String,
    /// Archive-absolute path of the content document.
    pub resolved_href: String,
    pub media_type: String,
}

#[derive(Debug, Clone)]
pub struct Package {
    pub package_path: String,
    /// Directory of the package document with a trailing slash, or `""`.
    pub root_folder: String,
    pub version: Option<String>,
    pub metadata: Metadata,
    pub manifest: Manifest,
    pub spine: Vec<SpineItem>,
    /// The spine's `toc` attribute (legacy NCX reference), if any.
    pub spine_toc: Option<String>,
    pub cover: Option<ManifestEntry>,
}

impl Package {
    /// Archive-absolute path for a manifest href (literal concatenation).
    pub fn resolve_href(&self, href: &str) -> String {
        format!("{}{}", self.root_folder, href)
    }

    /// Archive-absolute path of the cover image, if one was declared.
    pub fn cover_path(&self) -> Option<String> {
        self.cover.as_ref().map(|c| self.resolve_href(&c.href))
    }

    /// Spine position of an archive path. Empty paths match nothing.
    pub fn spine_index_of(&self, resolved_href: &str) -> Option<usize> {
        if resolved_href.is_empty() {
            return None;
        }
        self.spine
            .iter()
            .position(|item| item.resolved_href == resolved_href)
    }
}

/// Read and parse the package document named by the container.
pub fn parse_package(archive: &Archive, package_path: &str) -> Result<Package, EpubError> {
    let content = archive
        .read_text_lossy(package_path)
        .ok_or_else(|| EpubError::InvalidEpub("missing package document".into()))?;
    Ok(parse_package_document(&content, package_path))
}

/// A direct child of `<metadata>`, kept until the two-pass field lookup.
#[derive(Debug)]
struct MetaField {
    qualified: String,
    local: String,
    text: String,
}

/// Parse OPF XML. Malformed trailing XML truncates the parse rather than failing it.
pub fn parse_package_document(content: &str, package_path: &str) -> Package {
    let mut reader = XmlReader::from_str(content);
    let mut buf = Vec::new();

    let mut version = None;
    let mut manifest = Manifest::default();
    let mut spine_ids = Vec::new();
    let mut spine_toc = None;
    let mut fields: Vec<MetaField> = Vec::new();

    // local names of the currently open elements
    let mut stack: Vec<String> = Vec::new();
    // index into `fields` and the stack depth it was opened at
    let mut capturing: Option<(usize, usize)> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = xml::local_name(e);
                let parent = stack.last().map(String::as_str);
                match (parent, name.as_str()) {
                    (_, "package") => version = xml::attr(e, "version"),
                    (Some("metadata"), _) if capturing.is_none() => {
                        fields.push(MetaField {
                            qualified: xml::qualified_name(e),
                            local: name.clone(),
                            text: String::new(),
                        });
                        capturing = Some((fields.len() - 1, stack.len()));
                    }
                    (Some("manifest"), "item") => add_manifest_item(&mut manifest, e),
                    (Some("spine"), "itemref") => spine_ids.extend(xml::attr(e, "idref")),
                    (_, "spine") => spine_toc = xml::attr(e, "toc"),
                    _ => {}
                }
                stack.push(name);
            }
            Ok(Event::Empty(ref e)) => {
                let name = xml::local_name(e);
                match (stack.last().map(String::as_str), name.as_str()) {
                    (Some("metadata"), _) if capturing.is_none() => fields.push(MetaField {
                        qualified: xml::qualified_name(e),
                        local: name.clone(),
                        text: String::new(),
                    }),
                    (Some("manifest"), "item") => add_manifest_item(&mut manifest, e),
                    (Some("spine"), "itemref") => spine_ids.extend(xml::attr(e, "idref")),
                    (_, "spine") => spine_toc = xml::attr(e, "toc"),
                    _ => {}
                }
            }
            Ok(Event::Text(ref t)) => {
                if let Some((field, _)) = capturing {
                    fields[field].text.push_str(&xml::text(t));
                }
            }
            Ok(Event::CData(ref t)) => {
                if let Some((field, _)) = capturing {
                    fields[field].text.push_str(&String::from_utf8_lossy(t));
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
                if matches!(capturing, Some((_, depth)) if depth == stack.len()) {
                    capturing = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!("Package document {} is malformed, using what parsed: {}", package_path, e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    let mut metadata = Metadata {
        title: lookup_field(&fields, "title"),
        creator: lookup_field(&fields, "creator"),
        language: lookup_field(&fields, "language"),
        publisher: lookup_field(&fields, "publisher"),
        description: lookup_field(&fields, "description"),
    };
    encoding::normalize_metadata(&mut metadata);

    let root_folder = paths::root_folder(package_path).to_string();
    let spine = spine_ids
        .iter()
        .filter_map(|idref| match manifest.get(idref) {
            Some(entry) => Some(SpineItem {
                id: idref.clone(),
                resolved_href: format!("{}{}", root_folder, entry.href),
                media_type: entry.media_type.clone(),
            }),
            None => {
                tracing::debug!("Spine references unknown manifest id '{}', skipping", idref);
                None
            }
        })
        .collect();
    let cover = resolve_cover(&manifest).cloned();

    Package {
        package_path: package_path.to_string(),
        root_folder,
        version,
        metadata,
        manifest,
        spine,
        spine_toc,
        cover,
    }
}

fn add_manifest_item(manifest: &mut Manifest, e: &quick_xml::events::BytesStart<'_>) {
    let Some(id) = xml::attr(e, "id") else {
        tracing::debug!("Manifest item without id, skipping");
        return;
    };
    manifest.insert(ManifestEntry {
        id,
        href: xml::attr(e, "href").unwrap_or_default(),
        media_type: xml::attr(e, "media-type").unwrap_or_default(),
        properties: xml::attr(e, "properties")
            .map(|p| p.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
    });
}

/// Two-pass lookup: the `dc:`-prefixed element first, then the same local name
/// in any namespace. Producers disagree on which form they write.
fn lookup_field(fields: &[MetaField], local: &str) -> String {
    let prefixed = format!("dc:{local}");
    fields
        .iter()
        .find(|f| f.qualified == prefixed)
        .or_else(|| fields.iter().find(|f| f.local == local))
        .map(|f| f.text.trim().to_string())
        .unwrap_or_default()
}

/// `cover-image` property first, then an image whose id mentions "cover".
pub fn resolve_cover(manifest: &Manifest) -> Option<&ManifestEntry> {
    manifest.find_by_property("cover-image").or_else(|| {
        manifest
            .iter()
            .find(|e| e.id.to_lowercase().contains("cover") && e.is_image())
    })
}
