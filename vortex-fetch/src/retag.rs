//! Title/artist tag rewriting for delivered audio

use std::path::{Path, PathBuf};

use lofty::config::WriteOptions;
use lofty::prelude::*;
use lofty::tag::Tag;

use crate::error::{FetchError, FetchResult};

/// Write `title` and `artist` into the primary tag of `path`
///
/// Creates the tag when the file has none.
pub async fn retag_audio(path: &Path, title: &str, artist: &str) -> FetchResult<()> {
    let path: PathBuf = path.to_path_buf();
    let title = title.to_string();
    let artist = artist.to_string();

    tokio::task::spawn_blocking(move || write_tags(&path, &title, &artist))
        .await
        .map_err(|e| FetchError::Unexpected(format!("tag task failed: {e}")))?
}

fn write_tags(path: &Path, title: &str, artist: &str) -> FetchResult<()> {
    let mut tagged_file =
        lofty::read_from_path(path).map_err(|e| FetchError::TagWriteFailed(e.to_string()))?;

    if tagged_file.primary_tag().is_none() {
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(Tag::new(tag_type));
    }

    let Some(tag) = tagged_file.primary_tag_mut() else {
        return Err(FetchError::TagWriteFailed(format!(
            "no writable tag for {}",
            path.display()
        )));
    };

    tag.set_title(title.to_string());
    tag.set_artist(artist.to_string());
    tag.save_to_path(path, WriteOptions::default())
        .map_err(|e| FetchError::TagWriteFailed(e.to_string()))?;

    tracing::debug!(file = %path.display(), title, artist, "Rewrote audio tags");
    Ok(())
}
