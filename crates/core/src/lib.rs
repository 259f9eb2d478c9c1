pub mod archive;
pub mod config;
pub mod container;
pub mod encoding;
pub mod error;
pub mod navigation;
pub mod package;
pub mod paths;
pub mod progress;
pub mod rewrite;
pub mod security;
pub mod session;

mod xml;

#[cfg(test)]
mod testing;

pub mod prelude {
    pub use crate::error::*;
    pub use crate::navigation::{OutlineEntry, OutlineNode};
    pub use crate::package::{ManifestEntry, Metadata, SpineItem};
    pub use crate::rewrite::{RenderOptions, RenderedChapter};
    pub use crate::session::{ReadingPosition, ReadingSession, SessionOptions, SessionState, SharedSession};
}
