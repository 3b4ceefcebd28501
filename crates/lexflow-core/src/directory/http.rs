//! HTTP case directory client

use super::{CaseDirectory, CaseQuery, CaseRecord};
use async_trait::async_trait;
use lexflow_common::{Error, Result};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Directory backed by `GET <base_url>/cases?case_no=..&client_email=..`
///
/// 200 returns a [`CaseRecord`], 404 means no match.
pub struct HttpCaseDirectory {
    base_url: String,
    client: Client,
}

impl HttpCaseDirectory {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl CaseDirectory for HttpCaseDirectory {
    async fn lookup(&self, query: &CaseQuery) -> Result<Option<CaseRecord>> {
        if query.case_no.is_none() && query.client_email.is_none() {
            return Ok(None);
        }

        let mut params = Vec::new();
        if let Some(case_no) = &query.case_no {
            params.push(("case_no", case_no.as_str()));
        }
        if let Some(email) = &query.client_email {
            params.push(("client_email", email.as_str()));
        }

        let response = self
            .client
            .get(format!("{}/cases", self.base_url))
            .query(&params)
            .send()
            .await
            .map_err(|e| Error::External(format!("Case directory unreachable: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(?params, "No case found");
                Ok(None)
            }
            status if status.is_success() => response
                .json::<CaseRecord>()
                .await
                .map(Some)
                .map_err(|e| Error::External(format!("Invalid case directory response: {}", e))),
            status => Err(Error::External(format!(
                "Case directory returned status {}",
                status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_lookup_found_and_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cases"))
            .and(query_param("case_no", "2024-117"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "case_no": "2024-117",
                "client_name": "Jane Doe"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cases"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let directory = HttpCaseDirectory::new(server.uri()).unwrap();
        let found = directory
            .lookup(&CaseQuery {
                case_no: Some("2024-117".to_string()),
                client_email: None,
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.client_name.as_deref(), Some("Jane Doe"));

        let missing = directory
            .lookup(&CaseQuery {
                case_no: Some("9999".to_string()),
                client_email: None,
            })
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
