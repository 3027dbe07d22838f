//! Measurement-server discovery.
//!
//! The configuration endpoint returns a JSON document naming the three
//! URLs the test needs: a large download target, an upload target, and a
//! small-payload probe target. Reference servers emit the `*_https_*`
//! key spelling, so both forms deserialize.

use crate::constants::USER_AGENT;
use crate::errors::TestError;
use serde::Deserialize;
use url::Url;

/// The URL set served by the configuration endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigUrls {
    #[serde(alias = "large_https_download_url")]
    pub large_download_url: String,
    #[serde(alias = "small_https_download_url")]
    pub small_download_url: String,
    #[serde(alias = "https_upload_url")]
    pub upload_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigResponse {
    #[serde(default)]
    pub version: Option<u32>,
    pub urls: ConfigUrls,
}

/// Validated target URLs.
#[derive(Debug, Clone)]
pub struct TargetUrls {
    pub large_download: Url,
    pub small_download: Url,
    pub upload: Url,
}

/// The test configuration fetched from the discovery endpoint.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub urls: ConfigUrls,
    /// Where the configuration came from, for error messages.
    pub source: String,
}

impl TestConfig {
    /// Fetch the configuration from `https://<host_port>/<path>`.
    pub async fn fetch(
        host_port: &str,
        path: &str,
        insecure_skip_verify: bool,
    ) -> Result<Self, TestError> {
        let source = format!(
            "https://{}/{}",
            host_port,
            path.trim_matches('/')
        );

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(insecure_skip_verify)
            .build()
            .map_err(|e| {
                TestError::config("could not build configuration client")
                    .with_source(e)
            })?;

        let response = client
            .get(&source)
            .send()
            .await
            .map_err(|e| {
                TestError::config(format!(
                    "could not reach configuration endpoint {}",
                    source
                ))
                .with_source(e)
            })?
            .error_for_status()
            .map_err(|e| {
                TestError::config(format!(
                    "configuration endpoint {} returned an error",
                    source
                ))
                .with_source(e)
            })?;

        let parsed: ConfigResponse =
            response.json().await.map_err(|e| {
                TestError::config(format!(
                    "could not parse configuration from {}",
                    source
                ))
                .with_source(e)
            })?;

        Ok(Self { urls: parsed.urls, source })
    }

    /// Parse and validate the three target URLs.
    pub fn validate(&self) -> Result<TargetUrls, TestError> {
        Ok(TargetUrls {
            large_download: parse_target(
                &self.urls.large_download_url,
                "large download",
                &self.source,
            )?,
            small_download: parse_target(
                &self.urls.small_download_url,
                "small download",
                &self.source,
            )?,
            upload: parse_target(
                &self.urls.upload_url,
                "upload",
                &self.source,
            )?,
        })
    }
}

fn parse_target(
    raw: &str,
    role: &str,
    source: &str,
) -> Result<Url, TestError> {
    let url = Url::parse(raw).map_err(|e| {
        TestError::config(format!(
            "invalid {} URL {:?} returned from {}",
            role, raw, source
        ))
        .with_source(e)
    })?;
    if url.host_str().is_none() {
        return Err(TestError::config(format!(
            "{} URL {:?} returned from {} has no host",
            role, raw, source
        )));
    }
    Ok(url)
}
