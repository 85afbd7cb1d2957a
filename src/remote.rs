use std::time::Duration;

use anyhow::bail;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::web::{ClusterRequest, ClusterResponse, HealthResponse};

const CLUSTER_PATH: &str = "/cluster_keys";
const HEALTH_PATH: &str = "/health";
/// Addresses may be configured with either endpoint attached.
const ENDPOINTS: [&str; 2] = [CLUSTER_PATH, HEALTH_PATH];

/// Client for a running `keycluster daemon`.
pub struct ClusterClient {
    remote_addr: String,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum WebResponse<T> {
    Error { error: String },
    Data(T),
}

impl ClusterClient {
    pub fn new(addr: &str, timeout: Option<Duration>) -> anyhow::Result<ClusterClient> {
        let addr = addr.strip_suffix('/').unwrap_or(addr);
        let remote_addr = ENDPOINTS
            .iter()
            .find_map(|endpoint| addr.strip_suffix(endpoint))
            .unwrap_or(addr)
            .to_string();

        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(ClusterClient {
            remote_addr,
            client: builder.build()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.remote_addr, path)
    }

    /// Ask the daemon to cluster `keys`. `None` uses the daemon's default
    /// threshold.
    pub fn cluster(
        &self,
        keys: &[String],
        threshold: Option<f32>,
    ) -> anyhow::Result<Vec<Vec<String>>> {
        let url = self.url(CLUSTER_PATH);
        log::info!("requesting clusters for {} keys from {url}", keys.len());

        let request = ClusterRequest {
            keys: keys.to_vec(),
            threshold,
        };
        let resp = self.client.post(&url).json(&request).send()?;
        let response: ClusterResponse = handle_response(resp)?;

        if response.clusters.is_empty() {
            bail!("daemon returned no clusters for {} keys", keys.len());
        }

        log::info!(
            "received {} clusters (reduced from {} keys)",
            response.clusters.len(),
            keys.len()
        );
        Ok(response.clusters)
    }

    /// Like [`ClusterClient::cluster`], but never fails: when the daemon is
    /// unreachable or errors, every key becomes its own cluster.
    pub fn cluster_or_singletons(&self, keys: &[String], threshold: Option<f32>) -> Vec<Vec<String>> {
        match self.cluster(keys, threshold) {
            Ok(clusters) => clusters,
            Err(err) => {
                log::warn!(
                    "clustering daemon failed ({err:#}), falling back to {} single-key clusters",
                    keys.len()
                );
                singletons(keys)
            }
        }
    }

    pub fn health(&self) -> anyhow::Result<HealthResponse> {
        let resp = self.client.get(self.url(HEALTH_PATH)).send()?;
        handle_response(resp)
    }
}

/// One cluster per key, in input order.
pub fn singletons(keys: &[String]) -> Vec<Vec<String>> {
    keys.iter().map(|key| vec![key.clone()]).collect()
}

fn handle_response<T>(response: reqwest::blocking::Response) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let text = response.text()?;

    let web_response = serde_json::from_str::<WebResponse<T>>(&text).map_err(|err| {
        log::error!("{err}. tried to parse ({status}): {text:?}");
        err
    })?;

    match web_response {
        WebResponse::Data(data) => Ok(data),
        WebResponse::Error { error } => {
            bail!("{status}: {error}")
        }
    }
}
