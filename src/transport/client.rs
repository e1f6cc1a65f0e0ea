use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::config::BackendSettings;

/// HTTP client for the backend. Cheap to clone; clones share one connection pool.
#[derive(Clone, Debug)]
pub struct BackendClient {
    agent: ureq::Agent,
    base_url: Url,
    internal_key: String,
}

impl BackendClient {
    pub fn new(settings: &BackendSettings) -> Result<Self> {
        let mut base_url = Url::parse(&settings.base_url)
            .with_context(|| format!("parse backend url {}", settings.base_url))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("backend url {} cannot be a base", settings.base_url));
        }
        // Url::join drops the last path segment unless the base ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.request_timeout)
            .build();
        Ok(Self {
            agent,
            base_url,
            internal_key: settings.internal_key.clone(),
        })
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("join {} onto {}", path, self.base_url))
    }

    pub(crate) fn agent(&self) -> &ureq::Agent {
        &self.agent
    }

    pub(crate) fn internal_key(&self) -> &str {
        &self.internal_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_keep_base_path() -> Result<()> {
        let client = BackendClient::new(&BackendSettings {
            base_url: "http://localhost:3000/api/v1".to_string(),
            ..BackendSettings::default()
        })?;
        assert_eq!(
            client.endpoint("ai/detect")?.as_str(),
            "http://localhost:3000/api/v1/ai/detect"
        );
        Ok(())
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let settings = BackendSettings {
            base_url: "not a url".to_string(),
            ..BackendSettings::default()
        };
        assert!(BackendClient::new(&settings).is_err());
    }
}
