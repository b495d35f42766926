use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use crate::emote::Emote;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("no emotes found")]
    NoEmotesFound,
}

#[derive(Debug, Default)]
struct Indices {
    exact: HashMap<String, Emote>,
    folded: HashMap<String, Vec<Emote>>,
}

impl Indices {
    fn build(emotes: Vec<Emote>) -> Self {
        let mut indices = Indices::default();
        for emote in emotes {
            indices
                .folded
                .entry(emote.name.to_lowercase())
                .or_default()
                .push(emote.clone());
            indices.exact.insert(emote.name.clone(), emote);
        }
        indices
    }
}

/// Known emotes for one channel, indexed by exact name and by lowercase name.
///
/// Both indices live behind a single `Arc` that is swapped on refresh, so a
/// reader always sees one complete generation.
#[derive(Debug, Default)]
pub struct EmoteCatalog {
    current: RwLock<Arc<Indices>>,
}

impl EmoteCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh(&self, emotes: Vec<Emote>) -> Result<usize, CatalogError> {
        if emotes.is_empty() {
            return Err(CatalogError::NoEmotesFound);
        }

        let indices = Arc::new(Indices::build(emotes));
        let loaded = indices.exact.len();
        // A poisoned lock still holds a whole generation; the swap below is a
        // single pointer store.
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = indices;
        Ok(loaded)
    }

    pub fn lookup_exact(&self, token: &str) -> Option<Emote> {
        self.snapshot().exact.get(token).cloned()
    }

    pub fn lookup_fold(&self, token: &str) -> Vec<Emote> {
        self.snapshot()
            .folded
            .get(&token.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.snapshot().exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<Indices> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
