//! Public URLs embedded in notifications and error responses

use lexflow_common::types::BatchId;

/// Builds approval and edit links from the public base URL
#[derive(Debug, Clone)]
pub struct Links {
    base_url: String,
}

impl Links {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Quick-approval link carrying the raw token
    pub fn approve_url(&self, token: &str) -> String {
        format!("{}/public/approve/{}", self.base_url, token)
    }

    /// Operator page for reviewing and editing a batch
    pub fn edit_url(&self, batch_id: BatchId) -> String {
        format!("{}/batches/{}", self.base_url, batch_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_trim_trailing_slash() {
        let links = Links::new("https://firm.example/");
        assert_eq!(links.approve_url("abc"), "https://firm.example/public/approve/abc");
        let id = uuid::Uuid::nil();
        assert_eq!(
            links.edit_url(id),
            "https://firm.example/batches/00000000-0000-0000-0000-000000000000"
        );
    }
}
