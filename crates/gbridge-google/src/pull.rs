//! Paginated pulls of the two remote contact collections.
//!
//! Both pulls follow `nextPageToken` until the last page and only then hand
//! back the accumulated contacts, so a half-finished pull is never visible.
//! Either returns `Ok(None)` if any page came back empty-handed (no token or
//! no response), in which case the whole pull is abandoned.

use gbridge_core::{Contact, ContactSource, PhoneNumber};
use serde::Deserialize;
use tracing::debug;

use crate::api::{ApiRequest, GoogleApi};
use crate::error::GoogleResult;

const PERSON_FIELDS: &str = "names,emailAddresses,phoneNumbers";
const PEOPLE_PAGE_SIZE: u32 = 200;
const DIRECTORY_PAGE_SIZE: u32 = 500;

/// Result of a personal-contacts pull.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonalPull {
    pub contacts: Vec<Contact>,
    /// Cursor to present on the next pull, from the final page.
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionsPage {
    #[serde(default)]
    connections: Vec<Person>,
    next_page_token: Option<String>,
    next_sync_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    resource_name: String,
    #[serde(default)]
    names: Vec<PersonName>,
    #[serde(default)]
    phone_numbers: Vec<TypedValue>,
    #[serde(default)]
    email_addresses: Vec<TypedValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonName {
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct TypedValue {
    #[serde(default)]
    value: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl From<Person> for Contact {
    fn from(person: Person) -> Self {
        let id = person
            .resource_name
            .strip_prefix("people/")
            .unwrap_or(&person.resource_name)
            .to_string();
        let name = person
            .names
            .into_iter()
            .next()
            .map(|n| n.display_name)
            .unwrap_or_default();
        Contact {
            id,
            display_name: name,
            source_type: ContactSource::Personal,
            phone_numbers: person.phone_numbers.into_iter().map(phone).collect(),
            emails: person.email_addresses.into_iter().map(|e| e.value).collect(),
        }
    }
}

fn phone(value: TypedValue) -> PhoneNumber {
    PhoneNumber {
        number: value.value,
        kind: value.kind,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsersPage {
    #[serde(default)]
    users: Vec<DirectoryUser>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectoryUser {
    id: String,
    #[serde(default)]
    name: Option<DirectoryName>,
    #[serde(default)]
    phones: Vec<TypedValue>,
    #[serde(default)]
    emails: Vec<DirectoryEmail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryName {
    #[serde(default)]
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct DirectoryEmail {
    #[serde(default)]
    address: String,
}

impl From<DirectoryUser> for Contact {
    fn from(user: DirectoryUser) -> Self {
        Contact {
            id: user.id,
            display_name: user.name.map(|n| n.full_name).unwrap_or_default(),
            source_type: ContactSource::Directory,
            phone_numbers: user.phones.into_iter().map(phone).collect(),
            emails: user.emails.into_iter().map(|e| e.address).collect(),
        }
    }
}

impl GoogleApi {
    /// Pulls personal contacts changed since `cursor`, or all of them.
    pub async fn pull_personal(&self, cursor: Option<&str>) -> GoogleResult<Option<PersonalPull>> {
        let url = format!("{}/people/me/connections", self.endpoints().people);
        let mut contacts = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let request = ApiRequest::get(url.clone())
                .with_param("personFields", PERSON_FIELDS)
                .with_param("pageSize", PEOPLE_PAGE_SIZE)
                .with_param("requestSyncToken", true)
                .with_optional_param("syncToken", cursor)
                .with_optional_param("pageToken", page_token.as_deref());

            let Some(page) = self.fetch_as::<ConnectionsPage>(request).await? else {
                return Ok(None);
            };
            pages += 1;
            contacts.extend(page.connections.into_iter().map(Contact::from));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => {
                    debug!(pages, contacts = contacts.len(), incremental = cursor.is_some(), "pulled personal contacts");
                    return Ok(Some(PersonalPull {
                        contacts,
                        next_cursor: page.next_sync_token,
                    }));
                }
            }
        }
    }

    /// Pulls the full organization directory.
    pub async fn pull_directory(&self) -> GoogleResult<Option<Vec<Contact>>> {
        let url = format!("{}/users", self.endpoints().directory);
        let mut contacts = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let request = ApiRequest::get(url.clone())
                .with_param("customer", "my_customer")
                .with_param("viewType", "domain_public")
                .with_param("projection", "full")
                .with_param("orderBy", "email")
                .with_param("sortOrder", "ASCENDING")
                .with_param("showdeleted", false)
                .with_param("maxResults", DIRECTORY_PAGE_SIZE)
                .with_optional_param("pageToken", page_token.as_deref());

            let Some(page) = self.fetch_as::<UsersPage>(request).await? else {
                return Ok(None);
            };
            contacts.extend(page.users.into_iter().map(Contact::from));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => {
                    debug!(contacts = contacts.len(), "pulled directory");
                    return Ok(Some(contacts));
                }
            }
        }
    }
}
