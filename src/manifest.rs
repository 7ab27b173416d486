//! Control-plane manifest lifecycle on the primary cluster

use std::sync::Arc;

use tracing::info;

use crate::apply::{ApplyTarget, DeclarativeApplier, ManifestBundle};
use crate::config::Settings;
use crate::error::Result;

/// Installs and removes the connector's own deployment
pub struct ManifestLifecycle {
    applier: Arc<dyn DeclarativeApplier>,
    bundle: ManifestBundle,
}

impl ManifestLifecycle {
    pub fn new(applier: Arc<dyn DeclarativeApplier>, settings: &Settings) -> Self {
        Self {
            applier,
            bundle: ManifestBundle::Kustomization(settings.manifest_ref.clone()),
        }
    }

    pub fn bundle(&self) -> &ManifestBundle {
        &self.bundle
    }

    pub async fn apply(&self) -> Result<()> {
        self.applier.apply(ApplyTarget::Primary, &self.bundle).await?;
        info!(bundle = ?self.bundle, "Control-plane manifest applied");
        Ok(())
    }

    pub async fn remove(&self) -> Result<()> {
        self.applier.remove(ApplyTarget::Primary, &self.bundle).await?;
        info!(bundle = ?self.bundle, "Control-plane manifest removed");
        Ok(())
    }
}
