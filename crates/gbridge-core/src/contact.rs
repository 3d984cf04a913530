//! Contact types shared by the sync engine, the controller and clients.
//!
//! Contacts come from two independent remote collections: the user's own
//! contact list and, for accounts that belong to an organization, the
//! domain directory. Both are flattened into [`Contact`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Everything that is not a digit or a leading `+`.
static NON_DIALABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\d+]").expect("invalid regex"));

/// Strips a phone number (or any string) down to digits and `+`.
///
/// `"(555) 555-1212"` becomes `"5555551212"`, `"+1 212 555"` becomes
/// `"+1212555"`.
pub fn normalize_phone(raw: &str) -> String {
    NON_DIALABLE_RE.replace_all(raw, "").into_owned()
}

/// Which remote collection a contact was pulled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactSource {
    /// The signed-in user's personal contacts.
    Personal,
    /// The organization's user directory.
    Directory,
}

impl ContactSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Directory => "directory",
        }
    }
}

impl fmt::Display for ContactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A phone number attached to a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneNumber {
    /// The number as entered upstream, formatting included.
    pub number: String,
    /// Upstream label such as `mobile` or `work`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl PhoneNumber {
    pub fn new(number: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            kind: None,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// The number with formatting removed.
    pub fn normalized(&self) -> String {
        normalize_phone(&self.number)
    }
}

/// A contact from either collection.
///
/// `id` is unique within its source only. The same person may appear once
/// per collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub display_name: String,
    pub source_type: ContactSource,
    #[serde(default)]
    pub phone_numbers: Vec<PhoneNumber>,
    #[serde(default)]
    pub emails: Vec<String>,
}

impl Contact {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, source: ContactSource) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            source_type: source,
            phone_numbers: Vec::new(),
            emails: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_phone(mut self, phone: PhoneNumber) -> Self {
        self.phone_numbers.push(phone);
        self
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.emails.push(email.into());
        self
    }

    /// All phone numbers concatenated after normalization.
    pub fn joined_phones(&self) -> String {
        self.phone_numbers
            .iter()
            .map(PhoneNumber::normalized)
            .collect()
    }

    /// Returns true if any of this contact's numbers is in `numbers`.
    ///
    /// `numbers` is expected to be normalized already.
    pub fn has_any_phone(&self, numbers: &[String]) -> bool {
        self.phone_numbers
            .iter()
            .any(|p| numbers.iter().any(|n| *n == p.normalized()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_formatting() {
        assert_eq!(normalize_phone("(555) 555-1212"), "5555551212");
        assert_eq!(normalize_phone("+1 (212) 555-0100"), "+12125550100");
        assert_eq!(normalize_phone("alice"), "");
    }

    #[test]
    fn joined_phones_concatenates_normalized() {
        let contact = Contact::new("1", "Alice", ContactSource::Personal)
            .with_phone(PhoneNumber::new("(555) 555-1212").with_kind("mobile"))
            .with_phone(PhoneNumber::new("+44 20 7946"));
        assert_eq!(contact.joined_phones(), "5555551212+44207946");
    }

    #[test]
    fn has_any_phone_compares_normalized() {
        let contact = Contact::new("1", "Alice", ContactSource::Directory)
            .with_phone(PhoneNumber::new("212-555-0100"));
        assert!(contact.has_any_phone(&["2125550100".to_string()]));
        assert!(!contact.has_any_phone(&["212555".to_string()]));
    }

    #[test]
    fn contact_wire_shape() {
        let contact = Contact::new("c1", "Bob", ContactSource::Personal)
            .with_phone(PhoneNumber::new("555").with_kind("work"))
            .with_email("bob@example.com");
        let json = serde_json::to_value(&contact).unwrap();
        assert_eq!(json["displayName"], "Bob");
        assert_eq!(json["sourceType"], "personal");
        assert_eq!(json["phoneNumbers"][0]["kind"], "work");
        assert_eq!(json["emails"][0], "bob@example.com");
    }
}
