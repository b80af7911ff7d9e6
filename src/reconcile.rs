use std::collections::BTreeMap;

use crate::domain::{DatasetRecord, FileRecord};
use crate::error::ResolverError;

/// Records that several index nodes may return under the same id.
pub trait Keyed {
    fn record_id(&self) -> &str;
}

impl Keyed for FileRecord {
    fn record_id(&self) -> &str {
        &self.record_id
    }
}

impl Keyed for DatasetRecord {
    fn record_id(&self) -> &str {
        &self.record_id
    }
}

/// Collapses duplicates returned by different endpoints.
///
/// Identical copies of a record become one; copies that disagree on any field are an
/// error. The result is ordered by record id, so merging twice changes nothing.
pub fn merge<T: Keyed + PartialEq>(records: Vec<T>) -> Result<Vec<T>, ResolverError> {
    let mut groups: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.record_id().to_string())
            .or_default()
            .push(record);
    }

    let mut merged = Vec::with_capacity(groups.len());
    for (id, group) in groups {
        let mut members = group.into_iter();
        let Some(first) = members.next() else {
            continue;
        };
        if members.any(|other| other != first) {
            return Err(ResolverError::InconsistentRecord { id });
        }
        merged.push(first);
    }
    Ok(merged)
}

/// Splits records by the identifier they belong to.
pub fn group_by<T, F>(records: Vec<T>, key: F) -> BTreeMap<String, Vec<T>>
where
    F: Fn(&T) -> &str,
{
    let mut groups: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for record in records {
        groups.entry(key(&record).to_string()).or_default().push(record);
    }
    groups
}
