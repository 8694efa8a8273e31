use crate::config::settings::Target;
use crate::registry::cache::ExistenceCache;
use crate::registry::{Credential, RegistryError, TargetRegistry};
use crate::skopeo;
use async_trait::async_trait;
use aws_sdk_ecr::types::{ImageScanningConfiguration, ImageTagMutability};
use base64::Engine;
use base64::engine::general_purpose;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// Credentials are swapped this long before they expire.
const RENEW_BEFORE_EXPIRY_SECS: i64 = 120;
const RENEW_RETRY_BASE_SECS: u64 = 30;
const RENEW_RETRY_MAX_SECS: u64 = 300;

/// Target registry client for Amazon ECR.
///
/// Owns the credential (renewed by a background task) and the existence
/// cache. Existence probes go through the external inspect tool so that the
/// check exercises the same data path the copy will.
pub struct EcrRegistry {
    endpoint: String,
    client: aws_sdk_ecr::Client,
    credential: RwLock<Credential>,
    cache: ExistenceCache,
    tag_mutability: String,
    scan_on_push: bool,
}

impl EcrRegistry {
    /// Connect to ECR and perform the initial blocking credential fetch.
    /// Failing here must fail process startup: a webhook that cannot reach
    /// its mirror has nothing to offer.
    pub async fn login(target: &Target) -> Result<Arc<Self>, RegistryError> {
        let endpoint = format!(
            "{}.dkr.ecr.{}.amazonaws.com",
            target.account_id, target.region
        );
        let aws = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(target.region.clone()))
            .load()
            .await;
        let client = aws_sdk_ecr::Client::new(&aws);
        let credential = fetch_credential(&client).await?;
        info!(
            endpoint,
            expires_at = %credential.expires_at,
            "Authenticated against target registry"
        );
        Ok(Arc::new(Self {
            endpoint,
            client,
            credential: RwLock::new(credential),
            cache: ExistenceCache::new(target.cache_capacity),
            tag_mutability: target.repository.tag_mutability.clone(),
            scan_on_push: target.repository.scan_on_push,
        }))
    }

    /// Spawn the renewal task. The credential is replaced atomically shortly
    /// before expiry; on renewal failure the previous one stays in effect
    /// until it actually expires.
    pub fn spawn_renewal(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        tokio::spawn(async move { registry.renewal_loop().await });
    }

    async fn renewal_loop(&self) {
        loop {
            let expires_at = self.credential.read().await.expires_at;
            let wake = expires_at - Duration::seconds(RENEW_BEFORE_EXPIRY_SECS);
            let delay = (wake - Utc::now()).to_std().unwrap_or_default();
            debug!(
                delay_secs = delay.as_secs(),
                "Waiting before credential renewal"
            );
            sleep(delay).await;

            let mut retry_delay = RENEW_RETRY_BASE_SECS;
            loop {
                match fetch_credential(&self.client).await {
                    Ok(fresh) => {
                        info!(expires_at = %fresh.expires_at, "Renewed target registry credential");
                        *self.credential.write().await = fresh;
                        break;
                    }
                    Err(e) => {
                        error!(
                            error = %e,
                            retry_in_secs = retry_delay,
                            "Credential renewal failed, keeping previous credential"
                        );
                        sleep(std::time::Duration::from_secs(retry_delay)).await;
                        retry_delay = (retry_delay * 2).min(RENEW_RETRY_MAX_SECS);
                    }
                }
            }
        }
    }
}

async fn fetch_credential(client: &aws_sdk_ecr::Client) -> Result<Credential, RegistryError> {
    let response = client
        .get_authorization_token()
        .send()
        .await
        .map_err(|e| RegistryError::CredentialFetch(e.to_string()))?;
    let auth = response
        .authorization_data()
        .first()
        .ok_or_else(|| RegistryError::CredentialFetch("empty authorization data".to_string()))?;
    let token = auth
        .authorization_token()
        .ok_or_else(|| RegistryError::CredentialFetch("missing authorization token".to_string()))?;
    let decoded = general_purpose::STANDARD
        .decode(token)
        .map_err(|e| RegistryError::CredentialFetch(format!("token decode: {}", e)))?;
    let token = String::from_utf8(decoded)
        .map_err(|e| RegistryError::CredentialFetch(format!("token encoding: {}", e)))?;
    let expires_at = auth
        .expires_at()
        .and_then(|ts| DateTime::from_timestamp(ts.secs(), 0))
        .unwrap_or_else(|| Utc::now() + Duration::hours(12));
    Ok(Credential::new(token, expires_at))
}

#[async_trait]
impl TargetRegistry for EcrRegistry {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn credentials(&self) -> String {
        self.credential.read().await.expose().to_string()
    }

    async fn image_exists(&self, reference: &str) -> bool {
        if self.cache.contains(reference) {
            crate::prometheus::EXISTENCE_CACHE_HITS.inc();
            return true;
        }
        let credentials = self.credentials().await;
        match skopeo::inspect(reference, Some(&credentials)).await {
            Ok(_) => {
                self.cache.insert(reference.to_string());
                true
            }
            Err(e) => {
                debug!(reference, error = %e, "Image not present in target registry");
                false
            }
        }
    }

    async fn create_repository(&self, name: &str) -> Result<(), RegistryError> {
        if self.cache.contains(name) {
            return Ok(());
        }
        let result = self
            .client
            .create_repository()
            .repository_name(name)
            .image_tag_mutability(ImageTagMutability::from(self.tag_mutability.as_str()))
            .image_scanning_configuration(
                ImageScanningConfiguration::builder()
                    .scan_on_push(self.scan_on_push)
                    .build(),
            )
            .send()
            .await;
        match result {
            Ok(_) => {
                info!(repository = name, "Created repository in target registry");
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if !service_error.is_repository_already_exists_exception() {
                    return Err(RegistryError::RepositoryCreate {
                        name: name.to_string(),
                        reason: service_error.to_string(),
                    });
                }
            }
        }
        self.cache.insert(name.to_string());
        Ok(())
    }
}
