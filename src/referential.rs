use serde::{Deserialize, Serialize};

/// Reference-data object: taxon group, taxon name, qualitative value...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferentialRef {
    pub id: i64,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Taxon names only: the reference taxon shared by a name and its synonyms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_taxon_id: Option<i64>,
}

pub type QualitativeValue = ReferentialRef;

impl ReferentialRef {
    pub fn new(id: i64, label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            name: Some(name.into()),
            reference_taxon_id: None,
        }
    }

    pub fn with_reference_taxon(mut self, reference_taxon_id: i64) -> Self {
        self.reference_taxon_id = Some(reference_taxon_id);
        self
    }

    /// `label - name`, or whichever is present.
    pub fn display(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !self.label.is_empty() => format!("{} - {}", self.label, name),
            Some(name) => name.to_string(),
            None => self.label.clone(),
        }
    }
}

/// Same id, or both absent.
pub fn same_ref_id(a: Option<&ReferentialRef>, b: Option<&ReferentialRef>) -> bool {
    a.map(|r| r.id) == b.map(|r| r.id)
}
