use indexmap::IndexMap;
use log::{debug, info};
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::error::{FlakeLensError, Result};

use super::observations::Observation;

/// Prometheus Pushgateway sink.
pub struct PushGateway {
    client: Client,
    endpoint: String,
    job: String,
}

impl PushGateway {
    /// Creates a sink for `endpoint`, assuming plain HTTP when no scheme is
    /// given.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: &str, job: &str) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/');
        let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };

        Ok(Self {
            client: Client::builder().build()?,
            endpoint,
            job: job.to_string(),
        })
    }

    pub fn push_url(&self) -> String {
        format!(
            "{}/metrics/job/{}",
            self.endpoint,
            urlencoding::encode(&self.job)
        )
    }

    /// Replaces the job's metric group on the gateway with `observations`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails, the gateway is unreachable, or it
    /// answers with a non-success status.
    pub async fn push(&self, observations: &[Observation]) -> Result<()> {
        let body = encode(observations)?;
        let url = self.push_url();
        debug!("Pushing {} observation(s) to {url}", observations.len());

        let response = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, TextEncoder::new().format_type())
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FlakeLensError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        info!(
            "Pushed {} observation(s) to Pushgateway job {}",
            observations.len(),
            self.job
        );
        Ok(())
    }
}

/// Registers the observations as gauges and renders the text exposition.
///
/// # Errors
///
/// Returns an error if a metric name or label set is invalid.
pub fn encode(observations: &[Observation]) -> Result<String> {
    let registry = Registry::new();
    let mut gauges: IndexMap<&str, GaugeVec> = IndexMap::new();

    for observation in observations {
        let gauge = match gauges.get(observation.name.as_str()) {
            Some(gauge) => gauge.clone(),
            None => {
                let label_names: Vec<&str> = observation
                    .labels
                    .iter()
                    .map(|(name, _)| name.as_str())
                    .collect();
                let gauge = GaugeVec::new(
                    Opts::new(observation.name.as_str(), observation.help.as_str()),
                    &label_names,
                )?;
                registry.register(Box::new(gauge.clone()))?;
                gauges.insert(observation.name.as_str(), gauge.clone());
                gauge
            }
        };

        let label_values: Vec<&str> = observation
            .labels
            .iter()
            .map(|(_, value)| value.as_str())
            .collect();
        gauge
            .get_metric_with_label_values(&label_values)?
            .set(observation.value);
    }

    let mut buffer = String::new();
    TextEncoder::new().encode_utf8(&registry.gather(), &mut buffer)?;
    Ok(buffer)
}
