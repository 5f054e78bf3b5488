//! Category buckets derived from the record collection

use std::collections::HashMap;

use super::record::RepositoryRecord;

/// Name of the implicit bucket holding every record
pub const ALL_CATEGORY: &str = "all";

/// Bucket name -> record identifiers, rebuilt whenever the collection changes
#[derive(Debug, Clone)]
pub struct CategoryIndex {
    names: Vec<String>,
    members: HashMap<String, Vec<String>>,
}

impl Default for CategoryIndex {
    fn default() -> Self {
        let mut members = HashMap::new();
        members.insert(ALL_CATEGORY.to_string(), Vec::new());
        Self {
            names: vec![ALL_CATEGORY.to_string()],
            members,
        }
    }
}

impl CategoryIndex {
    /// Build the index from records in listing order
    pub fn build<'a>(records: impl IntoIterator<Item = &'a RepositoryRecord>) -> Self {
        let mut index = Self::default();

        for record in records {
            index
                .members
                .entry(ALL_CATEGORY.to_string())
                .or_default()
                .push(record.identifier.clone());

            // Uncategorized records only live in the implicit bucket
            if record.category.is_empty() || record.category == ALL_CATEGORY {
                continue;
            }

            if !index.members.contains_key(&record.category) {
                index.names.push(record.category.clone());
            }
            index
                .members
                .entry(record.category.clone())
                .or_default()
                .push(record.identifier.clone());
        }

        index
    }

    /// Bucket names, `all` first, then categories in first-seen order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Identifiers in a bucket, empty for an unknown bucket
    pub fn members(&self, category: &str) -> &[String] {
        self.members
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
