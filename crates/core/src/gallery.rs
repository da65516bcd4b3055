//! Local-only gallery persistence.
//!
//! The gallery never travels in the remote settings payload; it lives in
//! a single JSON file mapping story id to image list, read back on story
//! load and rewritten on every gallery change.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use log::warn;

use crate::errors::Result;
use crate::replica::{ReplicaEvent, ReplicaEventSink};

/// File-backed story-id → gallery map.
#[derive(Debug)]
pub struct GalleryStore {
    path: PathBuf,
}

impl GalleryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> Result<HashMap<String, Vec<String>>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let bytes = fs::read(&self.path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Gallery for `story`; empty when the story has none saved.
    pub fn load(&self, story: &str) -> Result<Vec<String>> {
        let mut all = self.read_all()?;
        Ok(all.remove(story).unwrap_or_default())
    }

    /// Write back `story`'s gallery, leaving other stories untouched.
    pub fn save(&self, story: &str, images: &[String]) -> Result<()> {
        let mut all = self.read_all()?;
        all.insert(story.to_string(), images.to_vec());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(&all)?)?;
        Ok(())
    }
}

/// Replica sink writing gallery changes through to the local store.
/// Write failures are logged and dropped.
pub struct GallerySink(pub Arc<GalleryStore>);

impl ReplicaEventSink for GallerySink {
    fn on_event(&self, event: &ReplicaEvent) {
        if let ReplicaEvent::GalleryChanged {
            story: Some(story),
            images,
        } = event
        {
            if let Err(err) = self.0.save(story, images) {
                warn!("[Gallery] failed to persist gallery for {}: {}", story, err);
            }
        }
    }
}
