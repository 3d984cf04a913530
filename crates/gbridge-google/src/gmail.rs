//! Recent mail threads exchanged with a contact.

use futures_util::future::join_all;
use gbridge_core::Activity;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::{ApiRequest, GoogleApi};
use crate::error::{GoogleError, GoogleResult};

const MAX_THREADS: u32 = 5;

#[derive(Debug, Default, Deserialize)]
struct ThreadList {
    #[serde(default)]
    threads: Vec<ThreadRef>,
}

#[derive(Debug, Deserialize)]
struct ThreadRef {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct Thread {
    id: String,
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Default, Deserialize)]
struct Message {
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

impl Message {
    fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .as_ref()?
            .headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.value.as_str())
    }
}

impl From<Thread> for Activity {
    fn from(thread: Thread) -> Self {
        let subject = thread
            .messages
            .first()
            .and_then(|m| m.header("Subject"))
            .unwrap_or_default()
            .to_string();
        let time = thread
            .messages
            .last()
            .and_then(|m| m.header("Date"))
            .unwrap_or_default()
            .to_string();
        Activity {
            id: thread.id,
            subject,
            time,
        }
    }
}

/// Gmail search for threads with any of `emails` in the last 60 days.
pub fn thread_query(emails: &[String]) -> String {
    let terms = emails
        .iter()
        .map(|e| format!("from:{e} to:{e}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!("{{{terms}}} newer_than:60d -in:draft -in:chat")
}

impl GoogleApi {
    /// Up to five recent threads involving any of `emails`.
    ///
    /// No request is made for an empty list.
    pub async fn activities(&self, emails: &[String]) -> GoogleResult<Vec<Activity>> {
        if emails.is_empty() {
            return Ok(Vec::new());
        }

        let base = format!("{}/users/me/threads", self.endpoints().gmail);
        let list: Option<ThreadList> = self
            .fetch_as(
                ApiRequest::get(base.clone())
                    .with_param("maxResults", MAX_THREADS)
                    .with_param("q", thread_query(emails)),
            )
            .await?;
        let Some(list) = list else {
            return Ok(Vec::new());
        };

        let fetches = list
            .threads
            .iter()
            .map(|t| self.fetch_as::<Thread>(ApiRequest::get(format!("{base}/{}", t.id))));
        let mut activities = Vec::with_capacity(list.threads.len());
        for (thread_ref, result) in list.threads.iter().zip(join_all(fetches).await) {
            match result? {
                Some(thread) => activities.push(Activity::from(thread)),
                None => warn!(thread_id = %thread_ref.id, "thread fetch returned nothing"),
            }
        }
        debug!(count = activities.len(), "loaded mail activities");
        Ok(activities)
    }

    /// Web link to a thread in the signed-in user's inbox.
    pub async fn thread_link(&self, thread_id: &str) -> GoogleResult<String> {
        let email = self
            .user_info()
            .await?
            .and_then(|u| u.email)
            .ok_or_else(|| GoogleError::authentication("no signed-in user"))?;
        Ok(format!(
            "{}/{}/#inbox/{}",
            self.endpoints().mail_web,
            urlencoding::encode(&email),
            urlencoding::encode(thread_id)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gbridge_core::LocalStore;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::auth::tests::authorized_manager;
    use crate::config::GoogleEndpoints;

    async fn api_for(server: &MockServer) -> GoogleApi {
        let manager = authorized_manager(LocalStore::in_memory(), &server.uri()).await;
        GoogleApi::new(manager, reqwest::Client::new(), GoogleEndpoints::with_base(&server.uri()))
    }

    fn message(headers: &[(&str, &str)]) -> serde_json::Value {
        let headers: Vec<_> = headers
            .iter()
            .map(|(name, value)| json!({"name": name, "value": value}))
            .collect();
        json!({"payload": {"headers": headers}})
    }

    #[test]
    fn query_covers_every_address() {
        let q = thread_query(&["a@x.io".to_string(), "b@y.io".to_string()]);
        assert_eq!(
            q,
            "{from:a@x.io to:a@x.io from:b@y.io to:b@y.io} newer_than:60d -in:draft -in:chat"
        );
    }

    #[test]
    fn subject_from_first_date_from_last() {
        let thread: Thread = serde_json::from_value(json!({
            "id": "t1",
            "messages": [
                message(&[("Subject", "Hello"), ("Date", "Mon, 1 Jan")]),
                message(&[("Subject", "Re: Hello"), ("Date", "Tue, 2 Jan")]),
            ]
        }))
        .unwrap();
        let activity = Activity::from(thread);
        assert_eq!(activity.subject, "Hello");
        assert_eq!(activity.time, "Tue, 2 Jan");
    }

    #[test]
    fn missing_headers_are_empty() {
        let thread: Thread = serde_json::from_value(json!({"id": "t1", "messages": [{}]})).unwrap();
        let activity = Activity::from(thread);
        assert_eq!(activity.subject, "");
        assert_eq!(activity.time, "");
    }

    #[tokio::test]
    async fn empty_email_list_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let api = api_for(&server).await;
        assert!(api.activities(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn threads_are_expanded_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/threads"))
            .and(query_param("maxResults", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "threads": [{"id": "a"}, {"id": "b"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        for id in ["a", "b"] {
            Mock::given(method("GET"))
                .and(path(format!("/gmail/v1/users/me/threads/{id}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "id": id,
                    "messages": [message(&[("Subject", id), ("Date", "today")])]
                })))
                .expect(1)
                .mount(&server)
                .await;
        }

        let api = api_for(&server).await;
        let activities = api.activities(&["ann@x.io".to_string()]).await.unwrap();
        let subjects: Vec<_> = activities.iter().map(|a| a.subject.as_str()).collect();
        assert_eq!(subjects, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn no_threads_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resultSizeEstimate": 0})))
            .mount(&server)
            .await;
        let api = api_for(&server).await;
        assert!(api.activities(&["ann@x.io".to_string()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn thread_link_escapes_email_and_thread_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo/v2/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"email": "ann@corp.example"})))
            .mount(&server)
            .await;
        let api = api_for(&server).await;
        let link = api.thread_link("t42").await.unwrap();
        assert_eq!(link, format!("{}/mail/u/ann%40corp.example/#inbox/t42", server.uri()));

        let link = api.thread_link("a/b#c?d&e").await.unwrap();
        assert_eq!(
            link,
            format!("{}/mail/u/ann%40corp.example/#inbox/a%2Fb%23c%3Fd%26e", server.uri())
        );
    }
}
