//! Case/Client directory
//!
//! Resolves the case and client behind a message so action templates can
//! use `{Client_Name}`, `{Case_No}` and friends. Case records live in the
//! practice-management system; this is only the lookup boundary.

mod http;

pub use http::HttpCaseDirectory;

use async_trait::async_trait;
use lexflow_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Case and client data used for placeholder resolution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub case_no: String,
    #[serde(default)]
    pub case_title: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub responsible_lawyer: Option<String>,
}

impl CaseRecord {
    /// Placeholder values contributed by this record
    pub fn placeholders(&self) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        values.insert("Case_No".to_string(), self.case_no.clone());
        let optional = [
            ("Case_Title", &self.case_title),
            ("Client_Name", &self.client_name),
            ("Client_Email", &self.client_email),
            ("Responsible_Lawyer", &self.responsible_lawyer),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                values.insert(name.to_string(), value.clone());
            }
        }
        values
    }
}

/// Lookup keys, most specific first
#[derive(Debug, Clone, Default)]
pub struct CaseQuery {
    pub case_no: Option<String>,
    pub client_email: Option<String>,
}

/// Case/Client directory trait
#[async_trait]
pub trait CaseDirectory: Send + Sync {
    async fn lookup(&self, query: &CaseQuery) -> Result<Option<CaseRecord>>;
}

/// Fixed in-memory directory
#[derive(Debug, Clone, Default)]
pub struct MemoryCaseDirectory {
    records: Vec<CaseRecord>,
}

impl MemoryCaseDirectory {
    pub fn new(records: Vec<CaseRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl CaseDirectory for MemoryCaseDirectory {
    async fn lookup(&self, query: &CaseQuery) -> Result<Option<CaseRecord>> {
        if let Some(case_no) = &query.case_no {
            if let Some(record) = self.records.iter().find(|r| r.case_no.eq_ignore_ascii_case(case_no)) {
                return Ok(Some(record.clone()));
            }
        }
        if let Some(email) = &query.client_email {
            let found = self.records.iter().find(|r| {
                r.client_email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
            });
            return Ok(found.cloned());
        }
        Ok(None)
    }
}
