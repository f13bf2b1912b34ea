//! ClickHouse over its HTTP interface.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{ConnectorError, Result};
use gantry::config::ClickhouseConfig;
use gantry::ingest::{BackendExecutor, QuerySettings};

pub struct ClickhouseClient {
    client: Client,
    url: Url,
    database: String,
    user: Option<String>,
    password: Option<String>,
}

impl ClickhouseClient {
    pub fn new(config: &ClickhouseConfig) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            url: Url::parse(&config.url)?,
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Endpoint for one statement. The database and every setting travel as
    /// query parameters.
    pub fn statement_url(&self, settings: &QuerySettings) -> Url {
        let mut url = self.url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("database", &self.database);
            for (key, value) in settings {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    /// Run `sql` and return the raw response body.
    pub async fn execute(&self, sql: &str, settings: &QuerySettings) -> Result<String> {
        let mut request = self
            .client
            .post(self.statement_url(settings))
            .body(sql.to_string());
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ConnectorError::Status {
                backend: "clickhouse",
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        tracing::trace!("clickhouse answered {} bytes", body.len());
        Ok(body)
    }

    /// Run a SELECT and decode each returned row.
    pub async fn query_rows<T: DeserializeOwned>(&self, sql: &str) -> Result<Vec<T>> {
        let body = self
            .execute(&format!("{} FORMAT JSONEachRow", sql), &QuerySettings::new())
            .await?;
        parse_json_each_row(&body)
    }

    pub async fn ping(&self) -> Result<()> {
        self.execute("SELECT 1", &QuerySettings::new()).await?;
        Ok(())
    }
}

/// Decode a `JSONEachRow` response: one JSON object per line.
pub fn parse_json_each_row<T: DeserializeOwned>(body: &str) -> Result<Vec<T>> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(ConnectorError::from))
        .collect()
}

#[async_trait]
impl BackendExecutor for ClickhouseClient {
    async fn exec(&self, query: &str, settings: &QuerySettings) -> gantry::Result<()> {
        self.execute(query, settings).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "clickhouse"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry::ingest::insert_settings;
    use serde::Deserialize;

    fn client() -> ClickhouseClient {
        ClickhouseClient::new(&ClickhouseConfig {
            url: "http://clickhouse:8123".into(),
            database: "logs db".into(),
            user: Some("default".into()),
            password: None,
        })
        .unwrap()
    }

    #[test]
    fn test_statement_url_carries_settings() {
        let url = client().statement_url(&insert_settings(true));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("database".to_string(), "logs db".to_string()));
        assert!(pairs.contains(&("async_insert".to_string(), "1".to_string())));
        assert!(pairs.contains(&("date_time_input_format".to_string(), "best_effort".to_string())));
        assert_eq!(url.host_str(), Some("clickhouse"));
    }

    #[test]
    fn test_invalid_url() {
        let config = ClickhouseConfig {
            url: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(
            ClickhouseClient::new(&config),
            Err(ConnectorError::InvalidUrl(_))
        ));
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        name: String,
        n: u32,
    }

    #[test]
    fn test_parse_json_each_row() {
        let body = "{\"name\":\"a\",\"n\":1}\n{\"name\":\"b\",\"n\":2}\n\n";
        let rows: Vec<Row> = parse_json_each_row(body).unwrap();
        assert_eq!(
            rows,
            vec![
                Row { name: "a".into(), n: 1 },
                Row { name: "b".into(), n: 2 },
            ]
        );
        assert!(parse_json_each_row::<Row>("").unwrap().is_empty());
        assert!(parse_json_each_row::<Row>("{broken").is_err());
    }

    #[test]
    fn test_status_error_becomes_backend_error() {
        let err: gantry::Error = ConnectorError::Status {
            backend: "clickhouse",
            status: 500,
            body: "Code: 60. Table does not exist".into(),
        }
        .into();
        assert!(matches!(err, gantry::Error::Backend(ref m) if m.contains("Code: 60")));
    }
}
