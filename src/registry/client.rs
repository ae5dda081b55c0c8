//! Registry v2 client: auth resolution, digest fetching, tag listing.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::MANIFEST_ACCEPT_HEADER;
use crate::error::{DrydockError, Result};
use crate::registry::auth::{auth_for_host, RegistryAuthEntry};
use crate::registry::challenge::{AuthFlow, ChallengeResponse};
use crate::registry::library::LibraryHelper;
use crate::registry::token::TokenCache;

/// The slice of the registry the detection engine depends on; mocked in tests.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Manifest digest for `image:tag`, as the registry publishes it.
    async fn fetch_digest(&self, image: &str, tag: &str) -> Result<String>;

    /// Every tag currently published for `image`.
    async fn list_tags(&self, image: &str) -> Result<Vec<String>>;
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct TagListResponse {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

pub struct RegistryClient {
    http: reqwest::Client,
    library: Arc<LibraryHelper>,
    auths: Vec<RegistryAuthEntry>,
    tokens: Mutex<TokenCache>,
}

impl RegistryClient {
    pub fn new(
        http: reqwest::Client,
        library: Arc<LibraryHelper>,
        auths: Vec<RegistryAuthEntry>,
    ) -> Self {
        RegistryClient {
            http,
            library,
            auths,
            tokens: Mutex::new(TokenCache::new()),
        }
    }

    /// `https://host[:port]` of the registry serving `image`.
    fn registry_url(&self, image: &str) -> String {
        format!("https://{}", self.registry_host(image))
    }

    fn registry_host(&self, image: &str) -> String {
        let normalized = self.library.normalize_image_name(image);
        normalized
            .split('/')
            .next()
            .unwrap_or(&normalized)
            .to_string()
    }

    /// Resolves the Authorization header to use for `image`, or `None` when
    /// the registry serves anonymously.
    pub async fn resolve_auth_header(&self, image: &str) -> Result<Option<String>> {
        let host = self.registry_host(image);
        let credentials = auth_for_host(&self.auths, &host);
        let scope_path = self.library.scope_for_image(image);

        // Cached bearer tokens short-circuit the whole negotiation
        if let Some(token) = self.tokens.lock().expect("token cache poisoned").get(&scope_path) {
            tracing::debug!(image = %image, "Using cached bearer token");
            return Ok(Some(format!("Bearer {}", token)));
        }

        let challenge = self.probe_challenge(image, credentials).await?;
        let flow = AuthFlow::NoAuthTried.advance(&challenge, credentials, &scope_path)?;

        match flow {
            AuthFlow::NoAuthRequired => Ok(None),
            AuthFlow::BasicAccepted { header } => Ok(Some(header)),
            AuthFlow::ChallengeParsed {
                realm,
                service,
                scope,
            } => {
                let token = self
                    .fetch_token(&realm, &service, &scope, &scope_path, credentials)
                    .await?;
                let flow = AuthFlow::ChallengeParsed {
                    realm,
                    service,
                    scope,
                }
                .with_token(&token)?;
                Ok(flow.header().map(str::to_string))
            }
            other => Err(DrydockError::Auth(format!(
                "challenge evaluation ended in unexpected state {:?}",
                other
            ))),
        }
    }

    async fn probe_challenge(
        &self,
        image: &str,
        credentials: Option<&str>,
    ) -> Result<ChallengeResponse> {
        let url = format!("{}/v2/", self.registry_url(image));
        let mut request = self.http.get(&url);
        if let Some(encoded) = credentials {
            request = request.header("Authorization", format!("Basic {}", encoded));
        }

        let response = request.send().await?;
        Ok(ChallengeResponse {
            status: response.status().as_u16(),
            www_authenticate: response
                .headers()
                .get("www-authenticate")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        })
    }

    async fn fetch_token(
        &self,
        realm: &str,
        service: &str,
        scope: &str,
        scope_path: &str,
        credentials: Option<&str>,
    ) -> Result<String> {
        let url = format!("{}?service={}&scope={}", realm, service, scope);
        tracing::debug!(url = %url, "Requesting bearer token");

        let mut request = self.http.get(&url);
        // Private registries hand out scoped tokens only to known users
        if let Some(encoded) = credentials {
            request = request.header("Authorization", format!("Basic {}", encoded));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DrydockError::Auth(format!(
                "token endpoint {} returned status {}",
                realm, status
            )));
        }

        let body: TokenResponse = response.json().await?;
        let token = body.token.ok_or_else(|| {
            DrydockError::Auth(format!("token endpoint {} returned no token", realm))
        })?;

        self.tokens
            .lock()
            .expect("token cache poisoned")
            .insert(scope_path.to_string(), token.clone(), body.expires_in);

        Ok(token)
    }

    /// Fetches the manifest digest for `image:tag` from the registry. The
    /// digest is read from the response header of a body-less HEAD request,
    /// which does not count against hub rate limits.
    pub async fn fetch_digest(&self, image: &str, tag: &str) -> Result<String> {
        tracing::debug!(image = %image, tag = %tag, "Fetching remote digest");

        let name = self.library.image_name_without_registry(image);
        let url = format!("{}/v2/{}/manifests/{}", self.registry_url(image), name, tag);

        let mut request = self
            .http
            .head(&url)
            .header("Accept", MANIFEST_ACCEPT_HEADER);
        if let Some(header) = self.resolve_auth_header(image).await? {
            request = request.header("Authorization", header);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() != 200 {
            tracing::info!(
                image = %image,
                tag = %tag,
                status = status.as_u16(),
                "Registry denied manifest request"
            );
            return Err(DrydockError::DigestFetch {
                status: status.as_u16(),
            });
        }

        // A 200 without the digest header is a protocol violation; surface
        // it instead of treating the image as current.
        response
            .headers()
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                DrydockError::Registry(format!(
                    "manifest response for {}:{} carried no docker-content-digest header",
                    image, tag
                ))
            })
    }

    /// Lists every published tag for `image`.
    pub async fn list_tags(&self, image: &str) -> Result<Vec<String>> {
        let name = self.library.image_name_without_registry(image);
        let url = format!("{}/v2/{}/tags/list", self.registry_url(image), name);

        let mut request = self.http.get(&url);
        if let Some(header) = self.resolve_auth_header(image).await? {
            request = request.header("Authorization", header);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DrydockError::Registry(format!(
                "tag list for {} returned status {}",
                image, status
            )));
        }

        let body: TagListResponse = response.json().await?;
        Ok(body.tags.unwrap_or_default())
    }
}

#[async_trait]
impl ManifestSource for RegistryClient {
    async fn fetch_digest(&self, image: &str, tag: &str) -> Result<String> {
        RegistryClient::fetch_digest(self, image, tag).await
    }

    async fn list_tags(&self, image: &str) -> Result<Vec<String>> {
        RegistryClient::list_tags(self, image).await
    }
}
