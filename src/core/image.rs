//! Image references and the resolver that makes them locally available.

use crate::core::engine::{ContainerEngine, image_reference};
use crate::core::error::{EngineError, HiveError, ImageError, PathError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Directory holding a build context. When set the image is built instead of pulled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_path: Option<PathBuf>,
}

impl ImageRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: None,
            build_path: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        self.tag = (!tag.is_empty()).then_some(tag);
        self
    }

    pub fn with_build_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.build_path = Some(path.into());
        self
    }

    /// `name[:tag]`
    pub fn reference(&self) -> String {
        image_reference(&self.name, self.tag.as_deref())
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference())
    }
}

/// Makes images available on the engine, building or pulling on demand.
#[derive(Clone)]
pub struct ImageResolver {
    engine: Arc<dyn ContainerEngine>,
}

impl ImageResolver {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    pub fn exists(&self, image: &ImageRef) -> Result<bool, HiveError> {
        Ok(self.engine.image_exists(&image.name, image.tag.as_deref())?)
    }

    /// Ensures `image` is present locally.
    ///
    /// An image that already exists is left alone unless `rebuild` is set. Otherwise it is
    /// built from `build_path` when one is configured, or pulled. Existence is re-checked
    /// afterwards and never cached.
    pub fn ensure(&self, image: &ImageRef, rebuild: bool) -> Result<(), HiveError> {
        if image.name.trim().is_empty() {
            return Err(ImageError::Undefined.into());
        }
        if !rebuild && self.exists(image)? {
            debug!(image = %image, "image already present");
            return Ok(());
        }

        match &image.build_path {
            Some(path) => self.build(image, path)?,
            None => self.pull(image)?,
        }

        if !self.exists(image)? {
            return Err(ImageError::Missing(image.reference()).into());
        }
        Ok(())
    }

    fn build(&self, image: &ImageRef, path: &Path) -> Result<(), ImageError> {
        if path.as_os_str().is_empty() {
            return Err(PathError::Undefined.into());
        }
        if !path.is_dir() {
            return Err(PathError::Missing(path.to_path_buf()).into());
        }
        info!(image = %image, path = %path.display(), "building image");
        self.engine
            .build_image(path, &image.reference())
            .map_err(|source| ImageError::BuildFailed {
                image: image.reference(),
                source,
            })
    }

    fn pull(&self, image: &ImageRef) -> Result<(), ImageError> {
        info!(image = %image, "pulling image");
        match self.engine.pull_image(&image.name, image.tag.as_deref()) {
            Ok(()) => Ok(()),
            Err(EngineError::NotFound(_)) => Err(ImageError::Missing(image.reference())),
            Err(source) => Err(ImageError::PullFailed {
                image: image.reference(),
                source,
            }),
        }
    }

    /// Fails with [`ImageError::Invalid`] unless the engine can inspect `image`.
    pub fn validate(&self, image: &ImageRef) -> Result<(), HiveError> {
        match self.engine.inspect_image(&image.reference())? {
            Some(_) => Ok(()),
            None => Err(ImageError::Invalid(image.reference()).into()),
        }
    }

    /// Removes dangling images and returns their ids.
    pub fn clean(&self) -> Result<Vec<String>, HiveError> {
        let removed = self.engine.remove_dangling_images()?;
        if !removed.is_empty() {
            info!(count = removed.len(), "removed dangling images");
        }
        Ok(removed)
    }
}
