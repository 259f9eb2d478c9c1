//! Progress reporting for book loading.

use std::fmt;

/// Stages of [`crate::session::ReadingSession::load_book_with_progress`], in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    OpenArchive,
    ResolveContainer,
    ParsePackage,
    ResolveOutline,
    RenderFirstChapter,
}

impl LoadStage {
    pub const COUNT: u64 = 5;

    /// 1-based position of the stage.
    pub fn step(self) -> u64 {
        match self {
            LoadStage::OpenArchive => 1,
            LoadStage::ResolveContainer => 2,
            LoadStage::ParsePackage => 3,
            LoadStage::ResolveOutline => 4,
            LoadStage::RenderFirstChapter => 5,
        }
    }
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadStage::OpenArchive => "open archive",
            LoadStage::ResolveContainer => "resolve container",
            LoadStage::ParsePackage => "parse package",
            LoadStage::ResolveOutline => "resolve outline",
            LoadStage::RenderFirstChapter => "render first chapter",
        };
        f.write_str(name)
    }
}

/// Event emitted when a load stage starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: LoadStage,
    pub current: u64,
    pub total: u64,
    pub message: Option<String>,
}

/// Receives progress updates. Implement this to drive a status line or spinner.
pub trait ProgressHandler: Send {
    fn on_progress(&self, event: ProgressEvent);
}

/// A no-op progress handler for when progress reporting is not needed.
pub struct NoopProgress;

impl ProgressHandler for NoopProgress {
    fn on_progress(&self, _event: ProgressEvent) {}
}

/// Helper to emit a progress event if a handler is provided.
pub fn emit_progress(handler: Option<&dyn ProgressHandler>, stage: LoadStage, message: Option<&str>) {
    if let Some(h) = handler {
        h.on_progress(ProgressEvent {
            stage,
            current: stage.step(),
            total: LoadStage::COUNT,
            message: message.map(|s| s.to_string()),
        });
    }
}
