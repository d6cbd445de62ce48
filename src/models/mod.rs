//! In this module are declared the entities manipulated by this program

pub mod cve;

use serde_json::Number;

/// The columns of the CSV file, in the order they are written.
pub const FIELDNAMES: [&str; 14] = [
    "id",
    "sourceIdentifier",
    "published",
    "lastModified",
    "vulnStatus",
    "description",
    "baseSeverity",
    "baseScore",
    "attackVector",
    "confidentialityImpact",
    "integrityImpact",
    "availabilityImpact",
    "exploitabilityScore",
    "impactScore",
];

/// Represents one line of the CSV file.
///
/// It's the flat version of a CVE returned by the NVD. Every field
/// missing in the CVE is kept as `None` and written as an empty cell.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CveRow {
    /// The CVE identifier.
    /// Example: CVE-2012-6708
    pub id: Option<String>,
    /// The source identifier.
    /// Example: cve@mitre.org
    pub source_identifier: Option<String>,
    /// When the CVE was published.
    /// Example: 2018-01-18T23:29:00.213
    pub published: Option<String>,
    /// When the CVE was modified.
    pub last_modified: Option<String>,
    /// The status of the vulnerability.
    /// Example: Modified
    pub vuln_status: Option<String>,
    /// The first english description, empty if there is none.
    pub description: String,
    /// Example: CRITICAL
    pub base_severity: Option<String>,
    /// Example: 9.8
    pub base_score: Option<Number>,
    /// Example: NETWORK
    pub attack_vector: Option<String>,
    pub confidentiality_impact: Option<String>,
    pub integrity_impact: Option<String>,
    pub availability_impact: Option<String>,
    pub exploitability_score: Option<Number>,
    pub impact_score: Option<Number>,
}

impl CveRow {
    /// Returns the cells of the row, in the order of [`FIELDNAMES`].
    pub fn cells(&self) -> [String; 14] {
        [
            text(&self.id),
            text(&self.source_identifier),
            text(&self.published),
            text(&self.last_modified),
            text(&self.vuln_status),
            self.description.clone(),
            text(&self.base_severity),
            number(&self.base_score),
            text(&self.attack_vector),
            text(&self.confidentiality_impact),
            text(&self.integrity_impact),
            text(&self.availability_impact),
            number(&self.exploitability_score),
            number(&self.impact_score),
        ]
    }
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

// serde_json renders 10.0 as "10.0", like the API does
fn number(value: &Option<Number>) -> String {
    value.as_ref().map(|n| n.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_row_is_empty() {
        let row = CveRow::default();
        assert!(row.cells().iter().all(|c| c.is_empty()));
    }

    #[test]
    fn cells_follow_fieldnames_order() {
        let row = CveRow {
            id: Some("CVE-2024-0001".to_string()),
            vuln_status: Some("Analyzed".to_string()),
            description: "A flaw".to_string(),
            base_score: serde_json::from_str("10.0").ok(),
            impact_score: serde_json::from_str("5.9").ok(),
            ..Default::default()
        };
        let cells = row.cells();
        assert_eq!(FIELDNAMES.len(), cells.len());
        assert_eq!("CVE-2024-0001", cells[0]);
        assert_eq!("Analyzed", cells[4]);
        assert_eq!("A flaw", cells[5]);
        assert_eq!("10.0", cells[7]);
        assert_eq!("", cells[12]);
        assert_eq!("5.9", cells[13]);
    }
}
