//! Resolution of a component definition to a runnable local image.
//!
//! Registry-backed components are pulled (after a login where needed);
//! builder components are rendered and built on the fly. Either way the
//! orchestrator receives a [`ResolvedImage`] it can hand straight to the
//! run invocation.

pub mod registry;

use std::time::Duration;

use tracing::info;

use crate::builder::{BuildParams, ImageBuilder};
use crate::component::{ComponentDefinition, RegistryKind};
use crate::error::ResolveError;
use crate::retry::RetryPolicy;

/// How the image got onto this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOrigin {
    Pulled,
    Built,
}

/// A locally available image ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    /// Reference to pass to the engine: `uri:tag`, `uri@digest` or a
    /// unique local `builder-<uuid>` tag.
    pub reference: String,
    pub origin: ImageOrigin,
    /// Content digest, when the engine reports one. Built images have
    /// none until pushed.
    pub digest: Option<String>,
}

/// Resolves component definitions to local images.
#[derive(Debug, Clone)]
pub struct ImageResolver {
    retry: RetryPolicy,
    builder: ImageBuilder,
}

impl Default for ImageResolver {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            builder: ImageBuilder::default(),
        }
    }
}

impl ImageResolver {
    pub fn new(retry: RetryPolicy, build_timeout: Duration) -> Self {
        Self {
            retry,
            builder: ImageBuilder::new(build_timeout),
        }
    }

    pub async fn resolve(
        &self,
        component: &ComponentDefinition,
        params: &BuildParams,
    ) -> Result<ResolvedImage, ResolveError> {
        match component.registry {
            RegistryKind::Builder => self.build(component, params).await,
            _ => {
                let digest = registry::pull(component, &self.retry).await?;
                Ok(ResolvedImage {
                    reference: component.image_reference(),
                    origin: ImageOrigin::Pulled,
                    digest,
                })
            }
        }
    }

    /// The definition's image reference is the build parent; the recipe
    /// says what to lay on top of it.
    async fn build(
        &self,
        component: &ComponentDefinition,
        params: &BuildParams,
    ) -> Result<ResolvedImage, ResolveError> {
        let recipe =
            component
                .build_options
                .as_ref()
                .ok_or_else(|| ResolveError::InvalidDefinition {
                    component: component.id.clone(),
                    reason: "builder component without build options".to_string(),
                })?;

        let parent = component.image_reference();
        let tag = self.builder.build(&parent, recipe, params).await?;
        info!(component = %component.id, tag = %tag, "Component image built");
        Ok(ResolvedImage {
            reference: tag,
            origin: ImageOrigin::Built,
            digest: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_builder_without_recipe_is_invalid() {
        let component: ComponentDefinition = serde_json::from_value(json!({
            "id": "acme.custom",
            "type": "builder",
            "uri": "php",
            "tag": "8.2"
        }))
        .unwrap();
        let resolver = ImageResolver::default();
        let err = resolver
            .resolve(&component, &BuildParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_resolved_image_shapes() {
        let pulled = ResolvedImage {
            reference: "acme/x:1.0".to_string(),
            origin: ImageOrigin::Pulled,
            digest: Some("acme/x@sha256:ab".to_string()),
        };
        let built = ResolvedImage {
            reference: "builder-0f8fad5b-d9cb-469f-a165-70867728950e".to_string(),
            origin: ImageOrigin::Built,
            digest: None,
        };
        assert_ne!(pulled, built);
        assert!(built.reference.starts_with("builder-"));
    }
}
