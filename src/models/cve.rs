//! The CVE records as returned by the NVD CVE API 2.0.
//! https://nvd.nist.gov/developers/vulnerabilities
//!
//! Every field is optional: the API omits what it doesn't know, and a
//! missing field only leaves an empty cell in the CSV.

use log::trace;
use serde::{Deserialize, Deserializer};
use serde_json::{Number, Value};
use thiserror::Error;

use super::CveRow;

/// The reasons why a single CVE can't be turned into a [`CveRow`].
#[derive(Debug, Error)]
pub enum RecordError {
    /// The JSON doesn't have the expected shape (not an object, wrong types).
    #[error("malformed CVE record: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The english description exists but has no text.
    #[error("english description of {0} has no value")]
    MissingDescription(String),
}

/// Represents a vulnerability returned in the `vulnerabilities` list.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Vulnerability {
    /// The CVE.
    pub cve: CVE,
}

/// Represents a CVE as returned as part of the Vulnerability.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CVE {
    /// The CVE identifier.
    /// Example: CVE-2012-6708
    pub id: Option<String>,
    /// The source identifier.
    /// Example: cve@mitre.org
    #[serde(rename = "sourceIdentifier")]
    pub source_identifier: Option<String>,
    /// When the CVE was published.
    /// Example: 2018-01-18T23:29:00.213
    pub published: Option<String>,
    /// When the CVE was modified.
    /// Example: 2023-11-07T02:13:33.290
    #[serde(rename = "lastModified")]
    pub last_modified: Option<String>,
    /// The status of the vulnerability.
    /// Example: Modified
    #[serde(rename = "vulnStatus")]
    pub vuln_status: Option<String>,
    /// The descriptions of the CVE, one per language.
    /// Example: [{"lang": "en", "value": "jQuery before 1.9.0 is vulnerable to [...]"}]
    pub descriptions: Vec<CVEDescription>,
    /// The metrics related to the CVE.
    pub metrics: CVEMetrics,
}

/// Represents a description as part of a CVE.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CVEDescription {
    /// The language of the description.
    /// Example: en
    pub lang: Option<String>,
    /// The content of the description.
    /// None when the key is missing, Some(None) when it is null.
    #[serde(deserialize_with = "present")]
    pub value: Option<Option<String>>,
}

/// Marks a field as present, even when its value is null.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Represents the metrics as part of a CVE.
/// Only CVSS 3.x is exported, CVSS 2 and 4 are ignored.
///
/// The metrics are kept raw: only the first metric of the selected
/// version is decoded, the others may be malformed.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CVEMetrics {
    /// The data about CVSS 3.1
    #[serde(rename = "cvssMetricV31")]
    pub cvss_metric_v31: Option<Vec<Value>>,
    /// The data about CVSS 3.0
    #[serde(rename = "cvssMetricV30")]
    pub cvss_metric_v30: Option<Vec<Value>>,
}

/// Represents a CVSS 3.x metric.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CVSSMetric {
    /// The CVSS data
    #[serde(rename = "cvssData")]
    pub cvss_data: CVSS3Data,
    /// The exploitability score.
    #[serde(rename = "exploitabilityScore")]
    pub exploitability_score: Option<Number>,
    /// The impact score.
    #[serde(rename = "impactScore")]
    pub impact_score: Option<Number>,
}

/// Represents the CVSS 3 data.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CVSS3Data {
    /// The base severity.
    /// Example: HIGH
    #[serde(rename = "baseSeverity")]
    pub base_severity: Option<String>,
    /// The base score.
    #[serde(rename = "baseScore")]
    pub base_score: Option<Number>,
    /// Attack vector.
    #[serde(rename = "attackVector")]
    pub attack_vector: Option<String>,
    /// Confidentiality impact
    #[serde(rename = "confidentialityImpact")]
    pub confidentiality_impact: Option<String>,
    /// Integrity impact.
    #[serde(rename = "integrityImpact")]
    pub integrity_impact: Option<String>,
    /// Availability impact.
    #[serde(rename = "availabilityImpact")]
    pub availability_impact: Option<String>,
}

impl CVE {
    /// Returns the first english description.
    /// A CVE without an english description gets an empty one.
    pub fn english_description(&self) -> Result<String, RecordError> {
        match self
            .descriptions
            .iter()
            .find(|d| d.lang.as_deref() == Some("en"))
        {
            Some(description) => match &description.value {
                Some(value) => Ok(value.clone().unwrap_or_default()),
                None => Err(RecordError::MissingDescription(
                    self.id.clone().unwrap_or_default(),
                )),
            },
            None => Ok(String::new()),
        }
    }

    /// Returns the CVSS metric to export.
    /// CVSS 3.1 is preferred, CVSS 3.0 is used when there is no 3.1 metric.
    pub fn cvss_metric(&self) -> Result<Option<CVSSMetric>, RecordError> {
        let v31 = self.metrics.cvss_metric_v31.as_deref().unwrap_or_default();
        let v30 = self.metrics.cvss_metric_v30.as_deref().unwrap_or_default();
        let selected = if v31.is_empty() { v30 } else { v31 };
        match selected.first() {
            Some(metric) => Ok(Some(CVSSMetric::deserialize(metric)?)),
            None => Ok(None),
        }
    }
}

impl TryFrom<&Value> for CveRow {
    type Error = RecordError;

    /// Flattens one entry of the `vulnerabilities` list.
    fn try_from(item: &Value) -> Result<Self, Self::Error> {
        trace!("Running CveRow::try_from()");
        let vulnerability = Vulnerability::deserialize(item)?;
        let cve = vulnerability.cve;
        let description = cve.english_description()?;
        // Without metric, every score is empty
        let metric = cve.cvss_metric()?.unwrap_or_default();
        let data = metric.cvss_data;

        Ok(CveRow {
            description,
            base_severity: data.base_severity,
            base_score: data.base_score,
            attack_vector: data.attack_vector,
            confidentiality_impact: data.confidentiality_impact,
            integrity_impact: data.integrity_impact,
            availability_impact: data.availability_impact,
            exploitability_score: metric.exploitability_score,
            impact_score: metric.impact_score,
            id: cve.id,
            source_identifier: cve.source_identifier,
            published: cve.published,
            last_modified: cve.last_modified,
            vuln_status: cve.vuln_status,
        })
    }
}
