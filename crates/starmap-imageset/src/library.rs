//! A named collection of imagesets loaded from a RON file.

use std::path::Path;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::{Imageset, ImagesetError};

/// Imagesets available to a viewer, in file order.
#[derive(Clone, Debug, Default)]
pub struct ImagesetLibrary {
    imagesets: Vec<Arc<Imageset>>,
}

impl ImagesetLibrary {
    /// Load a library from a RON list of imageset descriptors.
    pub fn load(path: &Path) -> Result<Self, ImagesetError> {
        let contents = std::fs::read_to_string(path).map_err(ImagesetError::Io)?;
        let library = Self::from_ron_str(&contents)?;
        tracing::info!(
            "Loaded {} imagesets from {}",
            library.len(),
            path.display()
        );
        Ok(library)
    }

    /// Parse and validate a RON list of imageset descriptors.
    pub fn from_ron_str(contents: &str) -> Result<Self, ImagesetError> {
        let parsed: Vec<Imageset> = ron::from_str(contents).map_err(ImagesetError::Parse)?;
        let mut names = FxHashSet::default();
        for set in &parsed {
            set.validate()?;
            if !names.insert(set.name.clone()) {
                return Err(ImagesetError::DuplicateName(set.name.clone()));
            }
        }
        Ok(Self {
            imagesets: parsed.into_iter().map(Arc::new).collect(),
        })
    }

    /// Look up an imageset by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Imageset>> {
        self.imagesets.iter().find(|s| s.name == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Imageset>> {
        self.imagesets.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.imagesets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.imagesets.is_empty()
    }
}
