//! Reading session: one open book, a reading position, and the rendered
//! current chapter.
//!
//! Loading a book replaces the whole session state. Navigation re-renders
//! chapters through [`crate::rewrite`] and releases the previous chapter's
//! resources when its [`RenderedChapter`] is dropped.

use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use serde::Serialize;

use crate::archive::Archive;
use crate::container;
use crate::error::EpubError;
use crate::navigation::{self, OutlineEntry};
use crate::package::{self, Metadata, Package, SpineItem};
use crate::paths;
use crate::progress::{emit_progress, LoadStage, ProgressHandler};
use crate::rewrite::{self, RenderOptions, RenderedChapter};
use crate::security::SecurityLimits;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Empty,
    Loading,
    Ready,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Empty => "empty",
            SessionState::Loading => "loading",
            SessionState::Ready => "ready",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadingPosition {
    pub spine_index: usize,
    pub fragment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub limits: SecurityLimits,
    pub render: RenderOptions,
}

/// Cover image bytes, shared with the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cover {
    pub archive_path: String,
    pub media_type: String,
    pub data: Arc<[u8]>,
}

#[derive(Debug)]
struct Book {
    archive: Archive,
    package: Package,
    outline: Vec<OutlineEntry>,
}

#[derive(Debug, Default)]
pub struct ReadingSession {
    options: SessionOptions,
    state: SessionState,
    book: Option<Book>,
    position: ReadingPosition,
    chapter: Option<RenderedChapter>,
    last_error: Option<String>,
}

impl ReadingSession {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Open a book from raw archive bytes and render its first chapter.
    ///
    /// Container, package and empty-spine failures abort the load and leave
    /// no book open. A first chapter that cannot be fetched keeps the book
    /// open in the `Error` state.
    pub fn load_book(&mut self, bytes: &[u8]) -> Result<(), EpubError> {
        self.load_book_with_progress(bytes, None)
    }

    pub fn load_book_with_progress(
        &mut self,
        bytes: &[u8],
        progress: Option<&dyn ProgressHandler>,
    ) -> Result<(), EpubError> {
        self.close();
        self.state = SessionState::Loading;

        let book = match open_book(bytes, &self.options.limits, progress) {
            Ok(book) => book,
            Err(e) => {
                tracing::warn!("Failed to load book: {}", e);
                self.fail(&e);
                return Err(e);
            }
        };
        tracing::info!(
            "Loaded '{}' ({} spine items, {} outline entries)",
            book.package.metadata.display_title(),
            book.package.spine.len(),
            book.outline.len()
        );
        self.book = Some(book);

        emit_progress(progress, LoadStage::RenderFirstChapter, None);
        if let Err(e) = self.go_to_chapter(0, None) {
            tracing::warn!("Book loaded but first chapter failed: {}", e);
        }
        Ok(())
    }

    /// Discard the open book and everything rendered from it.
    pub fn close(&mut self) {
        self.book = None;
        self.chapter = None;
        self.position = ReadingPosition::default();
        self.state = SessionState::Empty;
        self.last_error = None;
    }

    /// Display the chapter at `index`, optionally positioned at `fragment`.
    ///
    /// Re-requesting the current chapter reuses its rendering and only updates
    /// the fragment. A missing chapter file leaves the previous chapter and
    /// position in place.
    pub fn go_to_chapter(&mut self, index: usize, fragment: Option<&str>) -> Result<(), EpubError> {
        let book = self.book.as_ref().ok_or(EpubError::NoBookLoaded)?;
        let len = book.package.spine.len();
        if index >= len {
            return Err(EpubError::OutOfRange { index, len });
        }

        let is_current = index == self.position.spine_index
            && self
                .chapter
                .as_ref()
                .is_some_and(|c| c.path == book.package.spine[index].resolved_href);
        if is_current {
            self.position.fragment = self.known_fragment(fragment);
            self.state = SessionState::Ready;
            self.last_error = None;
            return Ok(());
        }

        self.state = SessionState::Loading;
        match render_chapter(book, index, &self.options.render) {
            Ok(chapter) => {
                tracing::debug!("Showing chapter {} ({})", index, chapter.path);
                self.chapter = Some(chapter);
                self.position = ReadingPosition {
                    spine_index: index,
                    fragment: self.known_fragment(fragment),
                };
                self.state = SessionState::Ready;
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Navigation to chapter {} failed: {}", index, e);
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Advance one chapter. Returns `false` at the end of the spine.
    pub fn next(&mut self) -> Result<bool, EpubError> {
        if !self.has_next()? {
            return Ok(false);
        }
        self.go_to_chapter(self.position.spine_index + 1, None)?;
        Ok(true)
    }

    /// Go back one chapter. Returns `false` at the start of the spine.
    pub fn previous(&mut self) -> Result<bool, EpubError> {
        if !self.has_previous()? {
            return Ok(false);
        }
        self.go_to_chapter(self.position.spine_index - 1, None)?;
        Ok(true)
    }

    pub fn has_next(&self) -> Result<bool, EpubError> {
        let book = self.book.as_ref().ok_or(EpubError::NoBookLoaded)?;
        Ok(self.position.spine_index + 1 < book.package.spine.len())
    }

    pub fn has_previous(&self) -> Result<bool, EpubError> {
        self.book.as_ref().ok_or(EpubError::NoBookLoaded)?;
        Ok(self.position.spine_index > 0)
    }

    pub fn go_to_outline_entry(&mut self, entry: &OutlineEntry) -> Result<(), EpubError> {
        self.go_to_chapter(entry.spine_index, entry.fragment.as_deref())
    }

    /// Move to an anchor in the current chapter. Returns `false` if the
    /// chapter has no such anchor or no chapter is displayed.
    pub fn go_to_fragment(&mut self, fragment: &str) -> Result<bool, EpubError> {
        if self.book.is_none() {
            return Err(EpubError::NoBookLoaded);
        }
        let Some(chapter) = self.chapter.as_ref() else {
            return Ok(false);
        };
        if !chapter.has_anchor(fragment) {
            tracing::debug!("No anchor '{}' in {}", fragment, chapter.path);
            return Ok(false);
        }
        self.position.fragment = Some(fragment.to_string());
        Ok(true)
    }

    /// Follow an href found in the current chapter's markup.
    ///
    /// Fragment-only links stay in the chapter; links to other spine documents
    /// switch chapters. External links and hrefs outside the spine return
    /// `false` and leave the position alone.
    pub fn follow_link(&mut self, href: &str) -> Result<bool, EpubError> {
        let book = self.book.as_ref().ok_or(EpubError::NoBookLoaded)?;
        let (file, fragment) = paths::split_fragment(href.trim());

        if file.is_empty() {
            return match fragment {
                Some(fragment) => self.go_to_fragment(fragment),
                None => Ok(false),
            };
        }
        if paths::is_external(file) {
            return Ok(false);
        }

        let current = &book.package.spine[self.position.spine_index].resolved_href;
        let target = paths::resolve_relative(paths::parent_dir(current), file);
        let target = book
            .archive
            .resolve_entry(&target)
            .unwrap_or(target.as_str())
            .to_string();
        let index = book.package.spine.iter().position(|item| {
            item.resolved_href == target
                || book.archive.resolve_entry(&item.resolved_href) == Some(target.as_str())
        });

        match index {
            Some(index) => {
                self.go_to_chapter(index, fragment)?;
                Ok(true)
            }
            None => {
                tracing::debug!("Link {} does not point into the spine", href);
                Ok(false)
            }
        }
    }

    pub fn cover(&self) -> Option<Cover> {
        let book = self.book.as_ref()?;
        let entry = book.package.cover.as_ref()?;
        let path = book.package.resolve_href(&entry.href);
        let stored = book.archive.resolve_entry(&path)?;
        Some(Cover {
            archive_path: stored.to_string(),
            media_type: entry.media_type.clone(),
            data: book.archive.lookup_shared(stored)?,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Message of the failure that put the session in the `Error` state.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        self.book.is_some()
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.book.as_ref().map(|b| &b.package.metadata)
    }

    pub fn outline(&self) -> &[OutlineEntry] {
        self.book.as_ref().map(|b| b.outline.as_slice()).unwrap_or_default()
    }

    pub fn spine(&self) -> &[SpineItem] {
        self.book
            .as_ref()
            .map(|b| b.package.spine.as_slice())
            .unwrap_or_default()
    }

    pub fn package(&self) -> Option<&Package> {
        self.book.as_ref().map(|b| &b.package)
    }

    /// Current position, or `None` when no book is open.
    pub fn position(&self) -> Option<&ReadingPosition> {
        self.book.as_ref().map(|_| &self.position)
    }

    pub fn current_chapter(&self) -> Option<&RenderedChapter> {
        self.chapter.as_ref()
    }

    fn known_fragment(&self, fragment: Option<&str>) -> Option<String> {
        let fragment = fragment?;
        match &self.chapter {
            Some(chapter) if chapter.has_anchor(fragment) => Some(fragment.to_string()),
            _ => {
                tracing::debug!("Fragment '{}' not found, showing chapter start", fragment);
                None
            }
        }
    }

    fn fail(&mut self, error: &EpubError) {
        self.state = SessionState::Error;
        self.last_error = Some(error.to_string());
    }
}

fn open_book(
    bytes: &[u8],
    limits: &SecurityLimits,
    progress: Option<&dyn ProgressHandler>,
) -> Result<Book, EpubError> {
    emit_progress(progress, LoadStage::OpenArchive, None);
    let archive = Archive::open_with_limits(bytes, limits)?;
    container::check_encryption(&archive)?;

    emit_progress(progress, LoadStage::ResolveContainer, None);
    let package_path = container::resolve_root_package_path(&archive)?;

    emit_progress(progress, LoadStage::ParsePackage, Some(&package_path));
    let package = package::parse_package(&archive, &package_path)?;
    if package.spine.is_empty() {
        return Err(EpubError::InvalidEpub("No readable content found".into()));
    }

    emit_progress(progress, LoadStage::ResolveOutline, None);
    let outline = navigation::resolve_outline(&archive, &package);

    Ok(Book {
        archive,
        package,
        outline,
    })
}

fn render_chapter(
    book: &Book,
    index: usize,
    options: &RenderOptions,
) -> Result<RenderedChapter, EpubError> {
    let item = &book.package.spine[index];
    let not_found = || EpubError::ChapterNotFound {
        index,
        href: item.resolved_href.clone(),
    };
    let stored = book
        .archive
        .resolve_entry(&item.resolved_href)
        .ok_or_else(not_found)?;
    let markup = book.archive.read_text_lossy(stored).ok_or_else(not_found)?;
    let markup = if item.media_type == rewrite::XHTML_MEDIA_TYPE {
        rewrite::expand_self_closing(&markup)
    } else {
        Cow::Borrowed(markup.as_str())
    };
    Ok(rewrite::rewrite_chapter(
        &markup,
        &item.resolved_href,
        &book.archive,
        options,
    ))
}

/// A session shared between threads. Operations never wait: while one
/// load or navigation is running, others fail with [`EpubError::Busy`].
#[derive(Debug, Clone, Default)]
pub struct SharedSession {
    inner: Arc<Mutex<ReadingSession>>,
}

impl SharedSession {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ReadingSession::new(options))),
        }
    }

    fn try_session(&self) -> Result<MutexGuard<'_, ReadingSession>, EpubError> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(EpubError::Busy),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        }
    }

    /// Run `f` with exclusive access to the session.
    pub fn with<R>(
        &self,
        f: impl FnOnce(&mut ReadingSession) -> Result<R, EpubError>,
    ) -> Result<R, EpubError> {
        let mut session = self.try_session()?;
        f(&mut *session)
    }

    pub fn load_book(&self, bytes: &[u8]) -> Result<(), EpubError> {
        self.with(|s| s.load_book(bytes))
    }

    pub fn go_to_chapter(&self, index: usize, fragment: Option<&str>) -> Result<(), EpubError> {
        self.with(|s| s.go_to_chapter(index, fragment))
    }

    pub fn next(&self) -> Result<bool, EpubError> {
        self.with(ReadingSession::next)
    }

    pub fn previous(&self) -> Result<bool, EpubError> {
        self.with(ReadingSession::previous)
    }

    pub fn follow_link(&self, href: &str) -> Result<bool, EpubError> {
        self.with(|s| s.follow_link(href))
    }

    pub fn close(&self) -> Result<(), EpubError> {
        self.with(|s| {
            s.close();
            Ok(())
        })
    }

    /// Current state; `Loading` while another caller holds the session.
    pub fn state(&self) -> SessionState {
        match self.try_session() {
            Ok(session) => session.state(),
            Err(_) => SessionState::Loading,
        }
    }

    pub fn position(&self) -> Result<Option<ReadingPosition>, EpubError> {
        self.with(|s| Ok(s.position().cloned()))
    }
}
