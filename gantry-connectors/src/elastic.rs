//! Elasticsearch index listing.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::error::{ConnectorError, Result};
use gantry::config::ElasticsearchConfig;
use gantry::discovery::{ElasticIndexResolver, ResolvedIndices};

#[derive(Debug, Deserialize)]
struct NamedEntry {
    name: String,
}

/// Body of `GET /_resolve/index/<pattern>`.
#[derive(Debug, Default, Deserialize)]
struct ResolveIndexResponse {
    #[serde(default)]
    indices: Vec<NamedEntry>,
    #[serde(default)]
    aliases: Vec<NamedEntry>,
    #[serde(default)]
    data_streams: Vec<NamedEntry>,
}

impl From<ResolveIndexResponse> for ResolvedIndices {
    fn from(response: ResolveIndexResponse) -> Self {
        let names = |entries: Vec<NamedEntry>| entries.into_iter().map(|e| e.name).collect();
        ResolvedIndices {
            indices: names(response.indices),
            aliases: names(response.aliases),
            data_streams: names(response.data_streams),
        }
    }
}

pub struct ElasticClient {
    client: Client,
    url: Url,
    user: Option<String>,
    password: Option<String>,
}

impl ElasticClient {
    pub fn new(url: &str, user: Option<String>, password: Option<String>) -> Result<Self> {
        let mut url = Url::parse(url)?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(Self {
            client: Client::new(),
            url,
            user,
            password,
        })
    }

    /// `None` when no Elasticsearch URL is configured.
    pub fn from_config(config: &ElasticsearchConfig) -> Result<Option<Self>> {
        match &config.url {
            Some(url) => Self::new(url, config.user.clone(), config.password.clone()).map(Some),
            None => Ok(None),
        }
    }

    fn resolve_url(&self, pattern: &str) -> Result<Url> {
        Ok(self.url.join(&format!("_resolve/index/{}", pattern))?)
    }

    /// Names matching `pattern`; `None` when Elasticsearch reports 404.
    pub async fn resolve_index(&self, pattern: &str) -> Result<Option<ResolvedIndices>> {
        let mut request = self.client.get(self.resolve_url(pattern)?);
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ConnectorError::Status {
                backend: "elasticsearch",
                status: status.as_u16(),
                body,
            });
        }
        let parsed: ResolveIndexResponse = serde_json::from_str(&body)?;
        Ok(Some(parsed.into()))
    }
}

#[async_trait]
impl ElasticIndexResolver for ElasticClient {
    async fn resolve(&self, pattern: &str) -> gantry::Result<Option<ResolvedIndices>> {
        Ok(self.resolve_index(pattern).await?)
    }

    fn backend_name(&self) -> &'static str {
        "elasticsearch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url() {
        let client = ElasticClient::new("http://es:9200/proxy", None, None).unwrap();
        assert_eq!(
            client.resolve_url("logs-*").unwrap().as_str(),
            "http://es:9200/proxy/_resolve/index/logs-*"
        );
        let client = ElasticClient::new("http://es:9200", None, None).unwrap();
        assert_eq!(
            client.resolve_url("*").unwrap().as_str(),
            "http://es:9200/_resolve/index/*"
        );
    }

    #[test]
    fn test_response_names() {
        let body = r#"{
            "indices": [
                {"name": "logs-1", "attributes": ["open"]},
                {"name": ".ds-metrics-000001", "attributes": ["hidden"], "data_stream": "metrics"}
            ],
            "aliases": [{"name": "logs", "indices": ["logs-1"]}],
            "data_streams": [{"name": "metrics", "backing_indices": [".ds-metrics-000001"], "timestamp_field": "@timestamp"}]
        }"#;
        let parsed: ResolveIndexResponse = serde_json::from_str(body).unwrap();
        let resolved = ResolvedIndices::from(parsed);
        assert_eq!(resolved.indices, vec!["logs-1", ".ds-metrics-000001"]);
        assert_eq!(resolved.aliases, vec!["logs"]);
        assert_eq!(resolved.data_streams, vec!["metrics"]);
    }

    #[test]
    fn test_from_config() {
        assert!(ElasticClient::from_config(&ElasticsearchConfig::default())
            .unwrap()
            .is_none());
        let config = ElasticsearchConfig {
            url: Some("http://es:9200".into()),
            ..Default::default()
        };
        assert!(ElasticClient::from_config(&config).unwrap().is_some());
    }
}
