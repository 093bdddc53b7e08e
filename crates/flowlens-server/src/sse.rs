use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, KeepAliveStream};
use axum::response::Sse;
use futures::Stream;
use serde::Serialize;

/// SSE response with a 5-second keep-alive so idle view streams survive
/// proxies.
pub fn sse_response<S>(stream: S) -> Sse<KeepAliveStream<S>>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(5))
            .text("keepalive"),
    )
}

/// Named SSE event carrying `data` as JSON.
pub fn sse_event<T: Serialize>(name: &str, data: &T) -> Result<Event, Infallible> {
    let json = serde_json::to_string(data).unwrap_or_else(|_| "{}".into());
    Ok(Event::default().event(name).data(json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sse_event_serializes_json() {
        assert!(sse_event("view", &json!({"status": "idle"})).is_ok());
    }
}
