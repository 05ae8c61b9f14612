//! Things and inclusion reports.
//!
//! A thing is a logical device grouping services under one bus address. The
//! registry creates things at inclusion and re-emits the inclusion report
//! whenever the service set changes at runtime.

use crate::spec::ServiceSpecification;
use serde::{Deserialize, Serialize};

/// Stable vendor metadata carried by the inclusion report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
}

/// Inclusion report: stable metadata plus the current service set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InclusionReport {
    pub address: String,
    pub groups: Vec<String>,
    #[serde(default)]
    pub product: ProductInfo,
    pub services: Vec<ServiceSpecification>,
}

impl InclusionReport {
    pub fn new(address: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            address: address.into(),
            groups,
            product: ProductInfo::default(),
            services: Vec::new(),
        }
    }
}
