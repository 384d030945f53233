//! Exporter provider interface

use super::source::{Chapter, Novel};
use crate::core::error::Result;
use async_trait::async_trait;

/// Capability contract for exporters (epub, txt, audio, ...)
#[async_trait]
pub trait NovelExporter: Send + Sync {
    /// Extension of the files this exporter writes, without the dot
    fn file_extension(&self) -> &str;

    /// Write `novel` with the given chapters to `output`
    ///
    /// Returns the extension of what was written, which may differ from
    /// [`file_extension`](Self::file_extension) when the exporter picks a
    /// container per input.
    async fn export(
        &self,
        novel: &Novel,
        chapters: &[Chapter],
        output: &mut (dyn std::io::Write + Send),
    ) -> Result<String>;
}
