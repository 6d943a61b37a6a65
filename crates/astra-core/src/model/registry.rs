use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::{Catalog, LoadedModel, ModelDescriptor, ModelLoader};
use crate::error::{CoreError, Result};

/// One lazily filled cache cell per model name.
type Slot = Arc<Mutex<Option<Arc<LoadedModel>>>>;

/// Lazily loads models on first use and keeps them for the process lifetime.
///
/// Every catalog name owns its own slot mutex, so two requests racing on the
/// same uncached model load it exactly once while loads of different models
/// proceed in parallel.  The outer map lock is only held long enough to fetch
/// or create a slot.
pub struct ModelRegistry {
    catalog: Arc<Catalog>,
    loader: Arc<dyn ModelLoader>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.slots.lock().map(|s| s.len()).unwrap_or(0);
        write!(f, "ModelRegistry({} models, {count} slots)", self.catalog.len())
    }
}

impl ModelRegistry {
    pub fn new(catalog: Arc<Catalog>, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            catalog,
            loader,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Descriptor for `name`, or [`CoreError::UnknownModel`].
    pub fn descriptor(&self, name: &str) -> Result<Arc<ModelDescriptor>> {
        self.catalog
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownModel {
                name: name.to_owned(),
            })
    }

    /// Return the loaded model for `name`, loading it on first use.
    ///
    /// # Errors
    ///
    /// - [`CoreError::UnknownModel`] if `name` is not in the catalog.
    /// - [`CoreError::ModelMissing`] if the artifact is not on disk.
    /// - Whatever the loader returns; failed loads are not cached.
    pub fn get(&self, name: &str) -> Result<Arc<LoadedModel>> {
        let descriptor = self.descriptor(name)?;
        let slot = self.slot(name)?;

        let mut cell = slot.lock().map_err(|_| CoreError::LockPoisoned {
            operation: "lock model slot",
        })?;
        if let Some(model) = cell.as_ref() {
            debug!(model = %name, "model cache hit");
            return Ok(Arc::clone(model));
        }

        if !descriptor.path.exists() {
            return Err(CoreError::ModelMissing {
                name: name.to_owned(),
                path: descriptor.path.clone(),
            });
        }

        info!(model = %name, path = %descriptor.path.display(), "loading model");
        let handle = self.loader.load(&descriptor)?;
        let model = Arc::new(LoadedModel { descriptor, handle });
        *cell = Some(Arc::clone(&model));
        Ok(model)
    }

    /// `true` once `name` has been loaded successfully.  A load still in
    /// flight reports `false`.
    pub fn is_loaded(&self, name: &str) -> bool {
        let Ok(slots) = self.slots.lock() else {
            return false;
        };
        slots
            .get(name)
            .and_then(|slot| slot.try_lock().ok().map(|cell| cell.is_some()))
            .unwrap_or(false)
    }

    fn slot(&self, name: &str) -> Result<Slot> {
        let mut slots = self.slots.lock().map_err(|_| CoreError::LockPoisoned {
            operation: "lock model slots",
        })?;
        Ok(Arc::clone(slots.entry(name.to_owned()).or_default()))
    }
}
