//! Fingerprint summary written as one JSON line per fingerprinted packet.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Coarse classification of a destination address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationClass {
    Loopback,
    Private,
    Multicast,
    LinkLocal,
    Global,
}

/// Result attached to a summary when analysis is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub dst_class: DestinationClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Flow key plus the fingerprints extracted from one packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintSummary {
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    /// Fingerprint kind (e.g. "tcp") to fingerprint string, sorted by kind.
    pub fingerprints: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    /// Packet timestamp in fractional seconds since the epoch.
    pub event_start: f64,
}

impl FingerprintSummary {
    /// Serialize to a single JSON line.
    pub fn to_json(&self) -> Result<String, SummaryError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON line produced by [`FingerprintSummary::to_json`].
    pub fn from_json(line: &str) -> Result<Self, SummaryError> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Errors that can occur when encoding or decoding summaries.
#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FingerprintSummary {
        let mut fingerprints = BTreeMap::new();
        fingerprints.insert("tcp".to_string(), "(faf0)((0204))".to_string());
        FingerprintSummary {
            src_ip: "10.0.0.1".to_string(),
            dst_ip: "93.184.216.34".to_string(),
            src_port: 51000,
            dst_port: 443,
            protocol: 6,
            fingerprints,
            analysis: None,
            event_start: 1_700_000_000.25,
        }
    }

    // ===========================================
    // Test Category A — Encoding
    // ===========================================

    #[test]
    fn test_to_json_is_single_line() {
        let json = sample().to_json().expect("serialize");
        assert!(!json.contains('\n'));
        assert!(json.starts_with('{'));
    }

    #[test]
    fn test_analysis_omitted_when_absent() {
        let json = sample().to_json().expect("serialize");
        assert!(!json.contains("analysis"));
    }

    #[test]
    fn test_analysis_serialized_snake_case() {
        let mut summary = sample();
        summary.analysis = Some(AnalysisResult {
            dst_class: DestinationClass::LinkLocal,
            label: Some("curl".to_string()),
        });
        let json = summary.to_json().expect("serialize");
        assert!(json.contains("\"dst_class\":\"link_local\""));
        assert!(json.contains("\"label\":\"curl\""));
    }

    #[test]
    fn test_from_json_restores_summary() {
        let summary = sample();
        let restored = FingerprintSummary::from_json(&summary.to_json().expect("serialize"))
            .expect("deserialize");
        assert_eq!(summary, restored);
    }

    // ===========================================
    // Test Category B — Error Cases
    // ===========================================

    #[test]
    fn test_from_json_invalid() {
        let result = FingerprintSummary::from_json("not json");
        assert!(matches!(result, Err(SummaryError::Json(_))));
    }
}
