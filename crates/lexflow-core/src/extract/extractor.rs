//! Field Extractor
//!
//! For every directive the value is the first whitespace-delimited token
//! right after the anchor text. A missing anchor leaves the field absent and
//! never stops the remaining directives. Directives run in order, so a later
//! directive targeting the same field overwrites an earlier value.

use crate::text::message_body;
use lexflow_common::types::MessageSource;
use lexflow_storage::models::{InboundMessage, MapDirective};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Extracted fields plus the directives that found nothing
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub fields: BTreeMap<String, String>,
    /// Target fields whose directive found no value
    pub misses: Vec<String>,
}

/// Field Extractor
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldExtractor;

impl FieldExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, message: &InboundMessage, directives: &[MapDirective]) -> ExtractionResult {
        let body = message_body(message);
        let mut result = ExtractionResult::default();

        for directive in directives {
            let source = match directive.source {
                MessageSource::Subject => Some(message.subject.as_str()),
                MessageSource::Body => Some(body.as_ref()),
                MessageSource::Attachment => None,
            };

            match source.and_then(|text| Self::value_after(text, &directive.anchor_text)) {
                Some(value) => {
                    result
                        .fields
                        .insert(directive.target_field.clone(), value.to_string());
                }
                None => {
                    debug!(
                        message_id = %message.id,
                        target_field = %directive.target_field,
                        "Anchor not found"
                    );
                    result.misses.push(directive.target_field.clone());
                }
            }
        }

        result
    }

    /// First token following the first occurrence of `anchor`
    fn value_after<'a>(text: &'a str, anchor: &str) -> Option<&'a str> {
        if anchor.is_empty() {
            return None;
        }
        let start = text.find(anchor)? + anchor.len();
        text[start..].split_whitespace().next()
    }
}
