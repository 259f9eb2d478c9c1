//! Archive-internal path arithmetic.
//!
//! Archive paths are slash-separated and relative to the archive root. The
//! resolution here is deliberately shallow: one leading `./` is stripped and a
//! single `../` level is collapsed. Multi-level ascent is left as-is, so a few
//! exotic references stay unresolved instead of resolving differently from
//! other readers.

/// Directory component of an archive path, without the trailing slash.
/// Returns `""` for entries at the archive root.
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..i]).unwrap_or("")
}

/// Directory component of an archive path including the trailing slash,
/// or `""` at the archive root. This is the form manifest hrefs are appended to.
pub fn root_folder(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..=i]).unwrap_or("")
}

/// Split an href into its file part and optional fragment.
/// `"ch1.xhtml#sec"` → `("ch1.xhtml", Some("sec"))`; an empty fragment is `None`.
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((file, fragment)) if !fragment.is_empty() => (file, Some(fragment)),
        Some((file, _)) => (file, None),
        None => (href, None),
    }
}

/// Whether an href carries a URI scheme (`http:`, `https:`, `data:`, `mailto:`…)
/// and so never points into the archive.
pub fn is_external(href: &str) -> bool {
    if href.starts_with("//") {
        return true;
    }
    match href.split_once(':') {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme.as_bytes()[0].is_ascii_alphabetic()
                && scheme
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.'))
        }
        None => false,
    }
}

/// Resolve `href` against the directory `base_dir` (as returned by [`parent_dir`]).
///
/// `../images/cover.jpg` from `text` resolves to `images/cover.jpg`.
pub fn resolve_relative(base_dir: &str, href: &str) -> String {
    let href = href.strip_prefix("./").unwrap_or(href);
    let joined = if base_dir.is_empty() {
        href.to_string()
    } else {
        format!("{base_dir}/{href}")
    };
    collapse_parent_once(&joined)
}

/// Remove the first `segment/../` pair from a path. Only one level is collapsed.
pub fn collapse_parent_once(path: &str) -> String {
    let Some(pos) = path.find("/../") else {
        return path.to_string();
    };
    let start = path[..pos].rfind('/').map(|i| i + 1).unwrap_or(0);
    if &path[start..pos] == ".." {
        // "../../x": the preceding segment is itself an ascent; nothing to collapse
        return path.to_string();
    }
    format!("{}{}", &path[..start], &path[pos + 4..])
}

/// Best-effort media type for a resource, from its file extension.
pub fn media_type_for_path(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "css" => "text/css",
        "xhtml" | "xht" => "application/xhtml+xml",
        "html" | "htm" => "text/html",
        "ncx" => "application/x-dtbncx+xml",
        "otf" => "font/otf",
        "ttf" => "font/ttf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parent_and_root_folder() {
        assert_eq!(parent_dir("OEBPS/text/ch1.xhtml"), "OEBPS/text");
        assert_eq!(parent_dir("ch1.xhtml"), "");
        assert_eq!(root_folder("OEBPS/content.opf"), "OEBPS/");
        assert_eq!(root_folder("a/b/content.opf"), "a/b/");
        assert_eq!(root_folder("content.opf"), "");
    }

    #[test]
    fn fragments() {
        assert_eq!(split_fragment("ch1.xhtml#sec"), ("ch1.xhtml", Some("sec")));
        assert_eq!(split_fragment("#sec"), ("", Some("sec")));
        assert_eq!(split_fragment("ch1.xhtml#"), ("ch1.xhtml", None));
        assert_eq!(split_fragment("ch1.xhtml"), ("ch1.xhtml", None));
    }

    #[test]
    fn external_hrefs() {
        assert!(is_external("http://example.com/a.png"));
        assert!(is_external("https://example.com"));
        assert!(is_external("data:image/png;base64,AAAA"));
        assert!(is_external("mailto:someone@example.com"));
        assert!(is_external("//cdn.example.com/x.css"));
        assert!(!is_external("images/a.png"));
        assert!(!is_external("../images/a.png"));
        assert!(!is_external("a.xhtml#b:c"));
    }

    #[test]
    fn resolves_parent_reference_from_subdirectory() {
        assert_eq!(resolve_relative("text", "../images/cover.jpg"), "images/cover.jpg");
        assert_eq!(
            resolve_relative("OEBPS/text", "../images/cover.jpg"),
            "OEBPS/images/cover.jpg"
        );
    }

    #[test]
    fn strips_leading_dot_slash() {
        assert_eq!(resolve_relative("OEBPS", "./img/a.png"), "OEBPS/img/a.png");
        assert_eq!(resolve_relative("", "./img/a.png"), "img/a.png");
    }

    #[test]
    fn collapses_only_one_level() {
        assert_eq!(resolve_relative("a/b", "../../c.png"), "a/../c.png");
        assert_eq!(resolve_relative("", "../c.png"), "../c.png");
    }

    #[test]
    fn media_types() {
        assert_eq!(media_type_for_path("images/Cover.JPG"), "image/jpeg");
        assert_eq!(media_type_for_path("style/main.css"), "text/css");
        assert_eq!(media_type_for_path("noext"), "application/octet-stream");
    }

    proptest! {
        #[test]
        fn plain_relative_paths_join_with_base(
            base in "[a-z]{1,8}(/[a-z]{1,8}){0,2}",
            file in "[a-z]{1,8}\\.xhtml",
        ) {
            prop_assert_eq!(resolve_relative(&base, &file), format!("{}/{}", base, file));
        }

        #[test]
        fn one_parent_step_lands_in_sibling_dir(
            base in "[a-z]{1,8}(/[a-z]{1,8}){0,2}",
            dir in "[a-z]{1,8}",
            file in "[a-z]{1,8}\\.png",
        ) {
            let expected_base = root_folder(&base).to_string();
            let resolved = resolve_relative(&base, &format!("../{}/{}", dir, file));
            prop_assert_eq!(resolved, format!("{}{}/{}", expected_base, dir, file));
        }
    }
}
