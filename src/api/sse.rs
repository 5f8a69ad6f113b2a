//! Server-Sent Events support

use crate::runtime::ChatView;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

/// Send the current view as `init`, then every published view as `view`
pub fn sse_stream(
    init: ChatView,
    view_rx: watch::Receiver<ChatView>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let init = futures::stream::once(async move { Ok(view_event("init", &init)) });
    let updates = WatchStream::from_changes(view_rx).map(|view| Ok(view_event("view", &view)));

    Sse::new(init.chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn view_event(event_type: &str, view: &ChatView) -> Event {
    let data = json!({
        "type": event_type,
        "view": view,
    });
    Event::default().event(event_type).data(data.to_string())
}
