// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use snafu::ensure;

use crate::{
    error::{BoxedError, ConfigurationSnafu, Result},
    types::RemoteRef,
};

/// A short-lived location a chunk's bytes can be fetched from.
///
/// Single use: a location is resolved right before one transfer attempt and
/// dropped afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLocation {
    pub url:        String,
    pub expires_at: Option<Timestamp>,
}

impl AccessLocation {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url:        url.into(),
            expires_at: None,
        }
    }

    #[must_use]
    pub const fn with_expiry(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    #[must_use]
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Turns a chunk's remote reference into a fetchable location.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    /// `Ok(None)` means the remote record exists but holds no object, which
    /// no amount of retrying will fix.
    async fn resolve(&self, remote_ref: &RemoteRef) -> Result<Option<AccessLocation>, BoxedError>;
}

/// Resolver that substitutes the reference into a URL template such as
/// `https://cdn.example.com/objects/{ref}`.
#[derive(Debug, Clone)]
pub struct UrlTemplateResolver {
    template: String,
    ttl:      Option<Duration>,
}

impl UrlTemplateResolver {
    pub const PLACEHOLDER: &'static str = "{ref}";

    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        ensure!(
            template.contains(Self::PLACEHOLDER),
            ConfigurationSnafu {
                message: format!("url template {template:?} has no {{ref}} placeholder"),
            }
        );
        Ok(Self {
            template,
            ttl: None,
        })
    }

    /// Stamp resolved locations with an expiry `ttl` from now.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[async_trait]
impl LocationResolver for UrlTemplateResolver {
    async fn resolve(&self, remote_ref: &RemoteRef) -> Result<Option<AccessLocation>, BoxedError> {
        let location = AccessLocation::new(
            self.template
                .replace(Self::PLACEHOLDER, remote_ref.as_str()),
        );
        Ok(Some(match self.ttl {
            Some(ttl) => location.with_expiry(Timestamp::now().checked_add(ttl)?),
            None => location,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_template_substitution() {
        let resolver = UrlTemplateResolver::new("http://127.0.0.1:9000/objects/{ref}").unwrap();
        let location = resolver
            .resolve(&RemoteRef::new("abc123"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(location.url, "http://127.0.0.1:9000/objects/abc123");
        assert!(location.expires_at.is_none());
    }

    #[test]
    fn test_template_without_placeholder() {
        assert!(UrlTemplateResolver::new("http://example.com/").is_err());
    }

    #[tokio::test]
    async fn test_expiry() {
        let resolver = UrlTemplateResolver::new("http://h/{ref}")
            .unwrap()
            .with_ttl(Duration::from_secs(60));
        let location = resolver
            .resolve(&RemoteRef::new("x"))
            .await
            .unwrap()
            .unwrap();
        let now = Timestamp::now();
        assert!(!location.is_expired_at(now));
        assert!(location.is_expired_at(now.checked_add(jiff::SignedDuration::from_secs(120)).unwrap()));
    }
}
