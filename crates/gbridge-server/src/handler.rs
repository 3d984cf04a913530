//! Request/response dispatch.

use std::sync::Arc;

use gbridge_core::StorageChange;
use gbridge_google::{GoogleError, GoogleErrorCode, SyncError};
use gbridge_protocol::{ContextKind, ErrorCode, Request, Response, accept};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::controller::Controller;
use crate::error::{ServerError, ServerResult};
use crate::socket::Connection;

fn upstream_code(code: GoogleErrorCode) -> ErrorCode {
    match code {
        GoogleErrorCode::Authentication | GoogleErrorCode::Authorization => ErrorCode::Unauthorized,
        GoogleErrorCode::RateLimited => ErrorCode::RateLimited,
        GoogleErrorCode::NotFound => ErrorCode::NotFound,
        GoogleErrorCode::BadRequest => ErrorCode::InvalidRequest,
        GoogleErrorCode::Network
        | GoogleErrorCode::Server
        | GoogleErrorCode::InvalidResponse
        | GoogleErrorCode::Gone => ErrorCode::UpstreamError,
        GoogleErrorCode::Configuration | GoogleErrorCode::Internal => ErrorCode::InternalError,
    }
}

fn google_error(e: &GoogleError) -> Response {
    Response::error(upstream_code(e.code()), e.message())
}

fn sync_error(e: &SyncError) -> Response {
    let code = match e {
        SyncError::Api { code, .. } => upstream_code(*code),
        SyncError::CursorExpired(_) => ErrorCode::UpstreamError,
        SyncError::Store { .. } => ErrorCode::InternalError,
    };
    Response::error(code, e.to_string())
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    Response::error(ErrorCode::InternalError, e.to_string())
}

/// Bus messages owed to a subscribed connection.
struct Subscription {
    request_id: String,
    context: ContextKind,
    changes: broadcast::Receiver<StorageChange>,
}

enum Wake {
    Request,
    Change(Result<StorageChange, RecvError>),
}

/// Serves the requests of one connection.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    controller: Arc<Controller>,
    connection: u64,
}

impl RequestHandler {
    pub fn new(controller: Arc<Controller>, connection: u64) -> Self {
        Self {
            controller,
            connection,
        }
    }

    #[tracing::instrument(skip(self), fields(connection = self.connection, path = request.path(), duration_ms))]
    pub async fn handle(&self, request: &Request) -> Response {
        let start = std::time::Instant::now();
        let controller = &self.controller;

        let response = match request {
            Request::Ping => Response::Pong,
            // Outside a socket connection there is nothing to push to, so a
            // subscription is a plain registration here.
            Request::Register { context } | Request::Subscribe { context } => {
                match controller.register(self.connection, *context).await {
                    Ok(service) => Response::Registered { service },
                    Err(e) => internal_error(e),
                }
            }
            Request::Authorize { authorized } => {
                let controller = Arc::clone(controller);
                let authorized = *authorized;
                tokio::spawn(async move {
                    if let Err(e) = controller.toggle_authorization(authorized).await {
                        warn!(error = %e, "failed to announce authorization change");
                    }
                });
                Response::Ok
            }
            Request::Contacts { sync_timestamp } => match controller.contacts(*sync_timestamp).await {
                Ok((data, next)) => Response::Contacts {
                    data,
                    sync_timestamp: Some(next),
                },
                Err(e) => sync_error(&e),
            },
            Request::ContactsSearch { search_string } => match controller.search(search_string).await {
                Ok(data) => Response::contacts(data),
                Err(e) => internal_error(e),
            },
            Request::ContactsMatch { phone_numbers } => {
                match controller.match_numbers(phone_numbers).await {
                    Ok(data) => Response::contacts(data),
                    Err(e) => internal_error(e),
                }
            }
            Request::ConferenceInvite { conference } => {
                match controller.conference_invite(&conference.invite_text).await {
                    Ok(Some(event)) => Response::Event { event },
                    Ok(None) => Response::error(ErrorCode::Unauthorized, "not authorized with Google"),
                    Err(e) => google_error(&e),
                }
            }
            Request::Activities { contact } => match controller.activities(&contact.emails).await {
                Ok(data) => Response::Activities { data },
                Err(e) => google_error(&e),
            },
            Request::Activity { activity } => match controller.open_activity(&activity.id).await {
                Ok(()) => Response::Ok,
                Err(ServerError::Google(e)) => google_error(&e),
                Err(e) => internal_error(e),
            },
            Request::ShouldInject => Response::Injection {
                allowed: controller.should_inject(),
            },
            Request::CallRinging {
                session_id,
                phone_number,
                caller_name,
            } => {
                controller.call_ringing(session_id, phone_number, caller_name.as_deref());
                Response::Ok
            }
            Request::CallDismissed { session_id } => {
                controller.call_dismissed(session_id);
                Response::Ok
            }
            Request::Dial { phone_number } => match controller.place_call(phone_number).await {
                Ok(()) => Response::Ok,
                Err(e) => internal_error(e),
            },
            Request::Sms { phone_number } => match controller.send_sms(phone_number).await {
                Ok(()) => Response::Ok,
                Err(e) => internal_error(e),
            },
            Request::OpenWindow => match controller.activate_floating_window().await {
                Ok(()) => Response::Ok,
                Err(e) => internal_error(e),
            },
            Request::Status => Response::Status {
                info: controller.status().await,
            },
        };

        let duration = start.elapsed();
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::Span::current().record("duration_ms", duration.as_millis());
            debug!(
                path = request.path(),
                duration_ms = duration.as_millis(),
                success = response.is_success(),
                "Request handled"
            );
        }

        response
    }

    /// Serves `conn` until it closes. The connection is an attached context
    /// for exactly that long.
    pub async fn handle_connection(&self, mut conn: Connection) -> ServerResult<()> {
        self.controller.attach(self.connection);
        let result = self.serve(&mut conn).await;
        self.controller.detach(self.connection).await;
        result
    }

    async fn serve(&self, conn: &mut Connection) -> ServerResult<()> {
        let mut subscription: Option<Subscription> = None;
        loop {
            if let Some(sub) = subscription.as_mut() {
                let wake = tokio::select! {
                    ready = conn.readable() => {
                        ready?;
                        Wake::Request
                    }
                    change = sub.changes.recv() => Wake::Change(change),
                };
                match wake {
                    Wake::Request => {}
                    Wake::Change(Ok(change)) => {
                        if let Some(envelope) = accept(&change, sub.context) {
                            let message = Response::Bus {
                                message: envelope.value,
                            };
                            conn.respond(sub.request_id.as_str(), message).await?;
                        }
                        continue;
                    }
                    Wake::Change(Err(RecvError::Lagged(skipped))) => {
                        warn!(
                            connection = self.connection,
                            skipped,
                            "Subscriber fell behind, bus messages dropped"
                        );
                        continue;
                    }
                    Wake::Change(Err(RecvError::Closed)) => {
                        subscription = None;
                        continue;
                    }
                }
            }

            match conn.read_request().await {
                Ok(Some(envelope)) => {
                    let response = match envelope.payload {
                        Request::Subscribe { context } => {
                            let (response, changes) = self.subscribe(context).await;
                            if let Some(changes) = changes {
                                subscription = Some(Subscription {
                                    request_id: envelope.request_id.clone(),
                                    context,
                                    changes,
                                });
                            }
                            response
                        }
                        ref request => self.handle(request).await,
                    };
                    conn.respond(&envelope.request_id, response).await?;
                }
                Ok(None) => {
                    debug!(connection = self.connection, "Client disconnected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(connection = self.connection, error = %e, "Error reading request");
                    return Err(e);
                }
            }
        }
    }

    async fn subscribe(
        &self,
        context: ContextKind,
    ) -> (Response, Option<broadcast::Receiver<StorageChange>>) {
        match self.controller.subscribe(self.connection, context).await {
            Ok((service, changes)) => {
                info!(connection = self.connection, ?context, "Context subscribed to the bus");
                (Response::Registered { service }, Some(changes))
            }
            Err(e) => (internal_error(e), None),
        }
    }
}

/// Builds the per-connection callback for [`SocketServer::run`](crate::SocketServer::run).
pub fn make_connection_handler(
    controller: Arc<Controller>,
) -> impl Fn(Connection) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
+ Send
+ Sync
+ 'static {
    move |conn| {
        let handler = RequestHandler::new(Arc::clone(&controller), conn.id());
        Box::pin(async move {
            if let Err(e) = handler.handle_connection(conn).await
                && !matches!(e, ServerError::Shutdown)
            {
                warn!(error = %e, "Connection handler error");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures_util::future::BoxFuture;
    use gbridge_core::{LocalStore, StorageChange};
    use gbridge_google::{AuthError, AuthFlowLauncher, GoogleClient, GoogleConfig, GoogleEndpoints};
    use gbridge_protocol::{
        ActivityRef, BusEnvelope, BusMessage, ContextKind, Envelope, Setter, TRANSPORT_KEY,
        read_frame, write_frame,
    };
    use serde_json::json;
    use tokio::sync::broadcast;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::ServerConfig;
    use crate::notify::tests::CountingNotifier;
    use crate::window::tests::RecordingOpener;

    const POPUP: &str = "https://popup.example/";

    #[derive(Default)]
    struct GrantingLauncher {
        calls: AtomicUsize,
    }

    impl AuthFlowLauncher for GrantingLauncher {
        fn redirect_uri(&self) -> String {
            "https://app.example/redirect".to_string()
        }

        fn launch<'a>(&'a self, url: &'a str, _interactive: bool) -> BoxFuture<'a, Result<String, AuthError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let state = url
                    .split("state=")
                    .nth(1)
                    .and_then(|rest| rest.split('&').next())
                    .unwrap_or_default();
                Ok(format!(
                    "{}#access_token=tok&expires_in=3600&token_type=Bearer&state={state}",
                    self.redirect_uri()
                ))
            })
        }
    }

    struct Harness {
        server: MockServer,
        store: LocalStore,
        controller: Arc<Controller>,
        launcher: Arc<GrantingLauncher>,
        notifier: Arc<CountingNotifier>,
        opener: Arc<RecordingOpener>,
    }

    impl Harness {
        async fn new() -> Self {
            let server = MockServer::start().await;
            let store = LocalStore::in_memory();
            let launcher = Arc::new(GrantingLauncher::default());
            let notifier = Arc::new(CountingNotifier::default());
            let opener = Arc::new(RecordingOpener::default());

            let google_config =
                GoogleConfig::new("client").with_endpoints(GoogleEndpoints::with_base(&server.uri()));
            let google = GoogleClient::new(google_config, store.clone(), launcher.clone()).unwrap();
            let config = ServerConfig::new("/unused.sock").with_popup_url(POPUP);
            let controller = Arc::new(Controller::new(
                &config,
                google,
                store.clone(),
                notifier.clone(),
                opener.clone(),
            ));

            Self {
                server,
                store,
                controller,
                launcher,
                notifier,
                opener,
            }
        }

        fn handler(&self, connection: u64) -> RequestHandler {
            self.controller.attach(connection);
            RequestHandler::new(Arc::clone(&self.controller), connection)
        }

        async fn mount_profile(&self) {
            Mock::given(method("GET"))
                .and(path("/userinfo/v2/me"))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(json!({"id": "1", "email": "ann@x.io"})),
                )
                .mount(&self.server)
                .await;
        }
    }

    fn bus_messages(rx: &mut broadcast::Receiver<StorageChange>) -> Vec<BusEnvelope> {
        let mut out = Vec::new();
        while let Ok(change) = rx.try_recv() {
            if change.key == TRANSPORT_KEY
                && let Some(value) = change.new_value
            {
                out.push(serde_json::from_value(value).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn ping_pongs() {
        let h = Harness::new().await;
        assert_eq!(h.handler(1).handle(&Request::Ping).await, Response::Pong);
    }

    #[tokio::test]
    async fn injection_is_capped_at_three() {
        let h = Harness::new().await;
        let answers: Vec<_> = futures_util::future::join_all((1..=4).map(|id| {
            let handler = h.handler(id);
            async move { handler.handle(&Request::ShouldInject).await }
        }))
        .await;
        // All four are attached before anyone asks.
        assert!(answers.iter().all(|r| *r == Response::Injection { allowed: false }));

        h.controller.detach(4).await;
        let answer = h.handler(1).handle(&Request::ShouldInject).await;
        assert_eq!(answer, Response::Injection { allowed: true });
    }

    #[tokio::test]
    async fn registration_returns_service_metadata() {
        let h = Harness::new().await;
        let response = h
            .handler(1)
            .handle(&Request::Register {
                context: ContextKind::Page,
            })
            .await;
        let Response::Registered { service } = response else {
            panic!("unexpected response: {response:?}");
        };
        assert_eq!(service.name, "Google");
        assert!(!service.authorized);
        assert_eq!(service.contacts_path, "/contacts");
    }

    #[tokio::test]
    async fn calls_wait_for_receiver_then_flush_in_order() {
        let h = Harness::new().await;
        let mut rx = h.store.subscribe();
        let page = h.handler(1);

        for number in ["+1", "+2"] {
            let response = page
                .handle(&Request::Dial {
                    phone_number: number.into(),
                })
                .await;
            assert_eq!(response, Response::Ok);
        }
        page.handle(&Request::Sms {
            phone_number: "+3".into(),
        })
        .await;

        assert!(bus_messages(&mut rx).is_empty());
        assert_eq!(h.opener.urls(), vec![POPUP.to_string()]);

        h.handler(2)
            .handle(&Request::Register {
                context: ContextKind::Popup,
            })
            .await;

        let values: Vec<_> = bus_messages(&mut rx).into_iter().map(|e| e.value).collect();
        assert_eq!(
            values,
            vec![
                BusMessage::NewCall {
                    phone_number: "+1".into(),
                    to_call: true
                },
                BusMessage::NewCall {
                    phone_number: "+2".into(),
                    to_call: true
                },
                BusMessage::NewSms {
                    phone_number: "+3".into()
                },
            ]
        );
        assert_eq!(h.controller.bus().queued().await, 0);

        // Closing the popup makes the next call queue again.
        h.controller.detach(2).await;
        assert!(!h.controller.bus().receiver_ready().await);
    }

    #[tokio::test]
    async fn open_window_broadcasts() {
        let h = Harness::new().await;
        let mut rx = h.store.subscribe();
        h.handler(1).handle(&Request::OpenWindow).await;
        h.handler(1).handle(&Request::OpenWindow).await;

        let seen = bus_messages(&mut rx);
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|e| e.setter == Setter::ControllerBroadcast
            && e.value == BusMessage::OpenAppWindow));
    }

    #[tokio::test]
    async fn ringing_is_deduplicated_per_session() {
        let h = Harness::new().await;
        let handler = h.handler(1);
        let ringing = Request::CallRinging {
            session_id: "s1".into(),
            phone_number: "+15551234".into(),
            caller_name: None,
        };

        handler.handle(&ringing).await;
        handler.handle(&ringing).await;
        assert_eq!(h.notifier.count(), 1);

        handler
            .handle(&Request::CallDismissed {
                session_id: "s1".into(),
            })
            .await;
        handler.handle(&ringing).await;
        assert_eq!(h.notifier.count(), 2);
    }

    #[tokio::test]
    async fn toggling_signs_in_and_announces() {
        let h = Harness::new().await;
        h.mount_profile().await;
        let mut rx = h.store.subscribe();

        let authorized = Arc::clone(&h.controller).toggle_authorization(false).await.unwrap();
        assert!(authorized);
        assert_eq!(h.launcher.calls.load(Ordering::SeqCst), 1);

        let announced: Vec<_> = bus_messages(&mut rx).into_iter().map(|e| e.value).collect();
        assert_eq!(announced, vec![BusMessage::AuthorizeStatusChanged { authorized: true }]);

        let signed_out = Arc::clone(&h.controller).toggle_authorization(true).await.unwrap();
        assert!(!signed_out);
        assert!(!h.controller.service_info().await.authorized);
    }

    #[tokio::test]
    async fn contacts_then_search_and_match() {
        let h = Harness::new().await;
        h.mount_profile().await;
        Mock::given(method("GET"))
            .and(path("/v1/people/me/connections"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "connections": [{
                    "resourceName": "people/c1",
                    "names": [{"displayName": "Ann Lee"}],
                    "phoneNumbers": [{"value": "(555) 555-1212", "type": "mobile"}]
                }],
                "nextSyncToken": "s1"
            })))
            .mount(&h.server)
            .await;
        h.controller.google().tokens.authorize(true).await.unwrap();
        let handler = h.handler(1);

        let response = handler.handle(&Request::contacts(None)).await;
        let Response::Contacts {
            data,
            sync_timestamp: Some(next),
        } = response
        else {
            panic!("unexpected response: {response:?}");
        };
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].id, "c1");

        // Nothing synced since.
        let response = handler.handle(&Request::contacts(Some(next))).await;
        assert!(matches!(response, Response::Contacts { ref data, .. } if data.is_empty()));

        let found = handler.handle(&Request::search("555")).await;
        assert!(matches!(found, Response::Contacts { ref data, .. } if data.len() == 1));
        let found = handler.handle(&Request::search("55")).await;
        assert!(matches!(found, Response::Contacts { ref data, .. } if data.is_empty()));

        let matched = handler
            .handle(&Request::match_numbers(vec!["5555551212".into()]))
            .await;
        assert!(matches!(matched, Response::Contacts { ref data, .. } if data.len() == 1));
    }

    #[tokio::test]
    async fn activity_opens_thread() {
        let h = Harness::new().await;
        h.mount_profile().await;
        h.controller.google().tokens.authorize(true).await.unwrap();

        let response = h
            .handler(1)
            .handle(&Request::Activity {
                activity: ActivityRef { id: "t9".into() },
            })
            .await;
        assert_eq!(response, Response::Ok);
        assert_eq!(
            h.opener.urls(),
            vec![format!("{}/mail/u/ann%40x.io/#inbox/t9", h.server.uri())]
        );
    }

    #[tokio::test]
    async fn conference_upstream_failure_maps_to_error() {
        let h = Harness::new().await;
        Mock::given(method("POST"))
            .and(path("/calendar/v3/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&h.server)
            .await;

        let response = h.handler(1).handle(&Request::conference_invite("x")).await;
        assert_eq!(response.as_error().map(|e| e.code), Some(ErrorCode::RateLimited));
        // The invite signed in first.
        assert_eq!(h.launcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn activities_without_emails_are_empty() {
        let h = Harness::new().await;
        let response = h.handler(1).handle(&Request::activities(Vec::new())).await;
        assert_eq!(response, Response::Activities { data: Vec::new() });
    }

    #[tokio::test]
    async fn connection_lifetime_drives_attachment() {
        let h = Harness::new().await;
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("gbridge.sock");
        let server = crate::SocketServer::new(ServerConfig::new(&socket_path))
            .await
            .unwrap();

        let controller = Arc::clone(&h.controller);
        let serve = tokio::spawn(async move {
            let conn = server.accept().await.unwrap();
            RequestHandler::new(controller, conn.id())
                .handle_connection(conn)
                .await
        });

        let mut stream = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
        write_frame(&mut stream, &Envelope::new("r1", Request::Status))
            .await
            .unwrap();
        let reply: Envelope<Response> = read_frame(&mut stream).await.unwrap().unwrap();
        let Response::Status { info } = reply.payload else {
            panic!("unexpected response");
        };
        assert_eq!(info.attached_contexts, 1);

        drop(stream);
        tokio::time::timeout(Duration::from_secs(5), serve)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(h.controller.status().await.attached_contexts, 0);
    }

    async fn next_frame(stream: &mut tokio::net::UnixStream) -> Envelope<Response> {
        tokio::time::timeout(Duration::from_secs(5), read_frame(stream))
            .await
            .expect("no frame within 5s")
            .unwrap()
            .unwrap()
    }

    async fn call(stream: &mut tokio::net::UnixStream, id: &str, request: Request) -> Envelope<Response> {
        write_frame(stream, &Envelope::new(id, request)).await.unwrap();
        next_frame(stream).await
    }

    #[tokio::test]
    async fn subscribers_in_other_processes_receive_bus_messages() {
        let h = Harness::new().await;
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("gbridge.sock");
        let server = crate::SocketServer::new(ServerConfig::new(&socket_path))
            .await
            .unwrap();
        let handler = make_connection_handler(Arc::clone(&h.controller));
        let serving = tokio::spawn(async move { server.run(handler).await });

        let connect = || tokio::net::UnixStream::connect(&socket_path);
        let mut page = connect().await.unwrap();
        let mut popup = connect().await.unwrap();
        let mut cli = connect().await.unwrap();

        let page_sub = Request::Subscribe {
            context: ContextKind::Page,
        };
        let reply = call(&mut page, "page-sub", page_sub).await;
        assert!(matches!(reply.payload, Response::Registered { .. }));

        // No receiver yet: the call waits in the queue and opens the popup.
        let reply = call(&mut cli, "d1", Request::Dial { phone_number: "+1".into() }).await;
        assert_eq!(reply.payload, Response::Ok);
        assert_eq!(h.opener.urls(), vec![POPUP.to_string()]);

        let popup_sub = Request::Subscribe {
            context: ContextKind::Popup,
        };
        let reply = call(&mut popup, "popup-sub", popup_sub).await;
        assert!(matches!(reply.payload, Response::Registered { .. }));
        let flushed = next_frame(&mut popup).await;
        assert_eq!(flushed.request_id, "popup-sub");
        assert_eq!(
            flushed.payload,
            Response::Bus {
                message: BusMessage::NewCall {
                    phone_number: "+1".into(),
                    to_call: true,
                }
            }
        );

        // A subscribed connection still answers requests.
        let reply = call(&mut popup, "s1", Request::Status).await;
        let Response::Status { info } = reply.payload else {
            panic!("unexpected response");
        };
        assert!(info.receiver_ready);
        assert_eq!(info.queued_messages, 0);

        let reply = call(&mut cli, "o1", Request::OpenWindow).await;
        assert_eq!(reply.payload, Response::Ok);
        let opened = Response::Bus {
            message: BusMessage::OpenAppWindow,
        };
        assert_eq!(next_frame(&mut popup).await.payload, opened);
        // The page skipped the receiver-only call and sees the broadcast first.
        let pushed = next_frame(&mut page).await;
        assert_eq!(pushed.request_id, "page-sub");
        assert_eq!(pushed.payload, opened);

        drop(popup);
        tokio::time::timeout(Duration::from_secs(5), async {
            while h.controller.bus().receiver_ready().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let reply = call(&mut cli, "d2", Request::Dial { phone_number: "+2".into() }).await;
        assert_eq!(reply.payload, Response::Ok);
        assert_eq!(h.controller.bus().queued().await, 1);

        serving.abort();
    }
}
