//! CI and static-analysis report records.
//!
//! Reports attach to a review's head commit, not its anchor: they describe
//! a concrete built/analyzed version of the change. Both record kinds are
//! written by external tooling and only ever read here, so their schemas
//! stay deliberately small.

use serde::{Deserialize, Serialize};

use crate::records::Record;
use crate::utils::normalize_timestamp;

/// Conventional status string for a passing CI run.
pub const CI_STATUS_SUCCESS: &str = "success";
/// Conventional status string for a failing CI run.
pub const CI_STATUS_FAILURE: &str = "failure";

/// A continuous-integration result for one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiReport {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    /// Where the build/test output lives.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// Free-form status; `success` and `failure` by convention.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
}

impl CiReport {
    pub fn new(timestamp: &str, url: &str, status: &str) -> CiReport {
        CiReport {
            timestamp: normalize_timestamp(timestamp),
            url: url.to_string(),
            status: status.to_string(),
        }
    }
}

impl Record for CiReport {
    fn normalize(&mut self) {
        self.timestamp = normalize_timestamp(&self.timestamp);
    }

    fn timestamp(&self) -> &str {
        &self.timestamp
    }
}

/// A pointer to a fetchable static-analysis (lint) result document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl AnalysisReport {
    pub fn new(timestamp: &str, url: &str) -> AnalysisReport {
        AnalysisReport {
            timestamp: normalize_timestamp(timestamp),
            url: url.to_string(),
        }
    }
}

impl Record for AnalysisReport {
    fn normalize(&mut self) {
        self.timestamp = normalize_timestamp(&self.timestamp);
    }

    fn timestamp(&self) -> &str {
        &self.timestamp
    }
}
