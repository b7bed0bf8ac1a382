//! OCI distribution registry client.

use async_trait::async_trait;
use hostit_core::deployer::{ImageRef, ImageRegistry};
use hostit_core::{Error, Result};
use reqwest::StatusCode;
use reqwest::header::ACCEPT;

const MANIFEST_TYPES: &str = "application/vnd.oci.image.index.v1+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.docker.distribution.manifest.v2+json";

/// Checks image presence with a manifest `HEAD` request.
pub struct OciRegistry {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl OciRegistry {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }

    pub fn manifest_url(&self, image: &ImageRef) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            self.base_url.trim_end_matches('/'),
            image.repository,
            image.tag
        )
    }
}

#[async_trait]
impl ImageRegistry for OciRegistry {
    async fn has_image(&self, image: &ImageRef) -> Result<bool> {
        let mut request = self
            .client
            .head(self.manifest_url(image))
            .header(ACCEPT, MANIFEST_TYPES);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Registry(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Error::Registry(format!(
                "manifest lookup for {} returned {}",
                image, status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_url() {
        let registry = OciRegistry::new("https://registry.example/", None);
        let image = ImageRef {
            registry: "registry.example".to_string(),
            repository: "server-builds/hostit-site".to_string(),
            tag: "dep-1".to_string(),
        };
        assert_eq!(
            registry.manifest_url(&image),
            "https://registry.example/v2/server-builds/hostit-site/manifests/dep-1"
        );
    }
}
