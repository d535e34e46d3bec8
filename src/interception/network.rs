// src/interception/network.rs
//! Network tap
//!
//! Wraps the host's fetch and xhr slots. Each observed request gets a
//! generated request id and a `RequestStart`/`RequestEnd` pair on the bus;
//! the wrapped call itself is forwarded untouched, and requests matching the
//! ignore list bypass observation entirely. Uninstalling puts the saved
//! slots back.

use std::sync::Arc;

use super::Uninstall;
use crate::bus::{EventBus, TapEvent};
use crate::host::{Capability, Host, XhrCallback};
use crate::utils::{ids, patterns, Clock, Result};

pub(crate) fn install(
    host: &Arc<Host>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    ignore_request: Vec<String>,
) -> Result<Option<Uninstall>> {
    let wrap_fetch = host.supports(Capability::Fetch);
    let wrap_xhr = host.supports(Capability::Xhr);
    if !wrap_fetch && !wrap_xhr {
        return Ok(None);
    }

    let saved_fetch = wrap_fetch.then(|| host.fetch_slot());
    let saved_xhr = wrap_xhr.then(|| host.xhr_slot());

    if let Some(saved) = saved_fetch.clone() {
        let bus = Arc::clone(&bus);
        let clock = Arc::clone(&clock);
        let ignore = ignore_request.clone();
        host.set_fetch(Arc::new(move |request| {
            if patterns::matches_any(&ignore, &request.url) {
                return saved(request);
            }

            let request_id = ids::new_id();
            let url = request.url.clone();
            let method = request.method.clone();
            let start = clock.now_ms();
            bus.emit(&TapEvent::RequestStart {
                request_id: request_id.clone(),
                url: url.clone(),
                method: method.clone(),
                timestamp_ms: start,
            });

            let inner = saved(request);
            let bus = Arc::clone(&bus);
            let clock = Arc::clone(&clock);
            Box::pin(async move {
                let result = inner.await;
                let end = clock.now_ms();
                let (status, error) = match &result {
                    Ok(response) => (Some(response.status), None),
                    Err(message) => (None, Some(message.clone())),
                };
                bus.emit(&TapEvent::RequestEnd {
                    request_id,
                    url,
                    method,
                    status,
                    error,
                    duration_ms: end.saturating_sub(start),
                    timestamp_ms: end,
                });
                result
            })
        }));
    }

    if let Some(saved) = saved_xhr.clone() {
        let bus = Arc::clone(&bus);
        let clock = Arc::clone(&clock);
        let ignore = ignore_request;
        host.set_xhr(Arc::new(move |request, callback| {
            if patterns::matches_any(&ignore, &request.url) {
                return saved(request, callback);
            }

            let request_id = ids::new_id();
            let url = request.url.clone();
            let method = request.method.clone();
            let start = clock.now_ms();
            bus.emit(&TapEvent::RequestStart {
                request_id: request_id.clone(),
                url: url.clone(),
                method: method.clone(),
                timestamp_ms: start,
            });

            let bus = Arc::clone(&bus);
            let clock = Arc::clone(&clock);
            let observed: XhrCallback = Box::new(move |result| {
                let end = clock.now_ms();
                let (status, error) = match &result {
                    Ok(response) => (Some(response.status), None),
                    Err(message) => (None, Some(message.clone())),
                };
                bus.emit(&TapEvent::RequestEnd {
                    request_id,
                    url,
                    method,
                    status,
                    error,
                    duration_ms: end.saturating_sub(start),
                    timestamp_ms: end,
                });
                callback(result);
            });
            saved(request, observed);
        }));
    }

    let host = Arc::clone(host);
    Ok(Some(Box::new(move || {
        if let Some(saved) = saved_fetch {
            host.set_fetch(saved);
        }
        if let Some(saved) = saved_xhr {
            host.set_xhr(saved);
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventKind;
    use crate::host::{HttpRequest, HttpResponse};
    use crate::utils::MockClock;
    use parking_lot::Mutex;

    fn collector(bus: &EventBus) -> Arc<Mutex<Vec<TapEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in [EventKind::RequestStart, EventKind::RequestEnd] {
            let sink = Arc::clone(&events);
            bus.subscribe(kind, move |event| {
                sink.lock().push(event.clone());
                Ok(())
            });
        }
        events
    }

    fn ok_backend(host: &Arc<Host>, clock: Arc<MockClock>, latency_ms: u64, status: u16) {
        host.set_fetch(Arc::new(move |_request| {
            let clock = Arc::clone(&clock);
            Box::pin(async move {
                clock.advance(latency_ms);
                Ok(HttpResponse {
                    status,
                    body: bytes::Bytes::new(),
                })
            })
        }));
    }

    #[tokio::test]
    async fn test_fetch_observed_with_duration() {
        let host = Host::new("https://app.example.com/");
        let bus = Arc::new(EventBus::new());
        let clock = Arc::new(MockClock::new(5_000));
        ok_backend(&host, Arc::clone(&clock), 120, 201);
        let events = collector(&bus);

        let _uninstall = install(&host, Arc::clone(&bus), clock, Vec::new())
            .unwrap()
            .unwrap();

        let response = host
            .fetch(HttpRequest::get("https://api.example.com/users"))
            .await
            .unwrap();
        assert_eq!(response.status, 201);

        let events = events.lock();
        assert_eq!(events.len(), 2);
        let TapEvent::RequestStart { request_id: start_id, url, timestamp_ms, .. } = &events[0]
        else {
            panic!("expected RequestStart");
        };
        assert_eq!(url, "https://api.example.com/users");
        assert_eq!(*timestamp_ms, 5_000);
        let TapEvent::RequestEnd { request_id, status, error, duration_ms, .. } = &events[1]
        else {
            panic!("expected RequestEnd");
        };
        assert_eq!(request_id, start_id);
        assert_eq!(*status, Some(201));
        assert!(error.is_none());
        assert_eq!(*duration_ms, 120);
    }

    #[tokio::test]
    async fn test_fetch_failure_observed() {
        let host = Host::new("https://app.example.com/");
        let bus = Arc::new(EventBus::new());
        let clock = Arc::new(MockClock::new(0));
        host.set_fetch(Arc::new(|_request| {
            Box::pin(async { Err("connection refused".to_string()) })
        }));
        let events = collector(&bus);

        let _uninstall = install(&host, Arc::clone(&bus), clock, Vec::new())
            .unwrap()
            .unwrap();

        let result = host.fetch(HttpRequest::get("https://api.example.com")).await;
        assert!(result.is_err());

        let events = events.lock();
        let TapEvent::RequestEnd { status, error, .. } = &events[1] else {
            panic!("expected RequestEnd");
        };
        assert!(status.is_none());
        assert_eq!(error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_xhr_observed() {
        let host = Host::new("https://app.example.com/");
        let bus = Arc::new(EventBus::new());
        let clock = Arc::new(MockClock::new(100));
        host.set_xhr(Arc::new(|_request, callback| {
            callback(Ok(HttpResponse {
                status: 200,
                body: bytes::Bytes::new(),
            }));
        }));
        let events = collector(&bus);

        let _uninstall = install(&host, Arc::clone(&bus), clock, Vec::new())
            .unwrap()
            .unwrap();

        let done = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&done);
        host.send_xhr(
            HttpRequest::get("https://api.example.com/cart"),
            Box::new(move |result| {
                assert!(result.is_ok());
                *flag.lock() = true;
            }),
        );

        assert!(*done.lock());
        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], TapEvent::RequestEnd { status: Some(200), .. }));
    }

    #[tokio::test]
    async fn test_ignored_requests_bypass_observation() {
        let host = Host::new("https://app.example.com/");
        let bus = Arc::new(EventBus::new());
        let clock = Arc::new(MockClock::new(0));
        ok_backend(&host, Arc::clone(&clock), 0, 200);
        let events = collector(&bus);

        let _uninstall = install(
            &host,
            Arc::clone(&bus),
            clock,
            vec!["*/health".to_string()],
        )
        .unwrap()
        .unwrap();

        host.fetch(HttpRequest::get("https://api.example.com/health"))
            .await
            .unwrap();
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_uninstall_restores_slots() {
        let host = Host::new("https://app.example.com/");
        let bus = Arc::new(EventBus::new());
        let clock = Arc::new(MockClock::new(0));
        ok_backend(&host, Arc::clone(&clock), 0, 200);
        let original_fetch = host.fetch_slot();
        let original_xhr = host.xhr_slot();

        let uninstall = install(&host, Arc::clone(&bus), clock, Vec::new())
            .unwrap()
            .unwrap();
        assert!(!Arc::ptr_eq(&host.fetch_slot(), &original_fetch));

        uninstall();
        assert!(Arc::ptr_eq(&host.fetch_slot(), &original_fetch));
        assert!(Arc::ptr_eq(&host.xhr_slot(), &original_xhr));
    }

    #[test]
    fn test_no_network_capability_is_noop() {
        let host = Host::new("https://app.example.com/");
        host.revoke_capability(Capability::Fetch);
        host.revoke_capability(Capability::Xhr);
        let bus = Arc::new(EventBus::new());
        let clock = Arc::new(MockClock::new(0));

        let installed = install(&host, bus, clock, Vec::new()).unwrap();
        assert!(installed.is_none());
    }
}
