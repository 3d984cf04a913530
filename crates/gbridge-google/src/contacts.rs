//! The merged contact cache and its queries.

use std::collections::HashSet;

use gbridge_core::{Contact, ContactSource, LocalStore, StoreResult, normalize_phone};

/// Digit queries this short never match phone numbers.
const MIN_DIGIT_QUERY: usize = 3;

pub(crate) fn data_key(source: ContactSource) -> &'static str {
    match source {
        ContactSource::Personal => "gbridge.contacts.personal",
        ContactSource::Directory => "gbridge.contacts.directory",
    }
}

/// Replaces every contact whose id appears in `delta` and appends the rest.
///
/// Contacts absent from `delta` are kept: deletions upstream are not
/// observed.
pub fn merge(mut existing: Vec<Contact>, delta: Vec<Contact>) -> Vec<Contact> {
    let replaced: HashSet<&str> = delta.iter().map(|c| c.id.as_str()).collect();
    existing.retain(|c| !replaced.contains(c.id.as_str()));
    existing.extend(delta);
    existing
}

/// Contacts whose name contains `query` (case-insensitive), or whose
/// numbers contain its digits when it has at least three.
pub fn search(contacts: &[Contact], query: &str) -> Vec<Contact> {
    let needle = query.to_lowercase();
    let digits = normalize_phone(query);
    let check_digits = digits.len() >= MIN_DIGIT_QUERY;

    contacts
        .iter()
        .filter(|c| {
            c.display_name.to_lowercase().contains(&needle)
                || (check_digits && c.joined_phones().contains(&digits))
        })
        .cloned()
        .collect()
}

/// Contacts owning at least one of `numbers`, compared after normalization.
pub fn match_numbers(contacts: &[Contact], numbers: &[String]) -> Vec<Contact> {
    let wanted: Vec<String> = numbers
        .iter()
        .map(|n| normalize_phone(n))
        .filter(|n| !n.is_empty())
        .collect();
    if wanted.is_empty() {
        return Vec::new();
    }
    contacts
        .iter()
        .filter(|c| c.has_any_phone(&wanted))
        .cloned()
        .collect()
}

/// Read access to the cached collections in the shared store.
///
/// Only the sync engine writes them.
#[derive(Debug, Clone)]
pub struct ContactStore {
    store: LocalStore,
}

impl ContactStore {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub async fn collection(&self, source: ContactSource) -> StoreResult<Vec<Contact>> {
        Ok(self.store.get_as(data_key(source)).await?.unwrap_or_default())
    }

    /// Directory contacts followed by personal contacts.
    pub async fn all(&self) -> StoreResult<Vec<Contact>> {
        let mut contacts = self.collection(ContactSource::Directory).await?;
        contacts.extend(self.collection(ContactSource::Personal).await?);
        Ok(contacts)
    }

    pub async fn search(&self, query: &str) -> StoreResult<Vec<Contact>> {
        Ok(search(&self.all().await?, query))
    }

    pub async fn match_numbers(&self, numbers: &[String]) -> StoreResult<Vec<Contact>> {
        Ok(match_numbers(&self.all().await?, numbers))
    }
}
