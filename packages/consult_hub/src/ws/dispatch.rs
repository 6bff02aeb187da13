//! Inbound frame dispatch.
//!
//! Errors are reported only to the offending connection; the read loop never
//! dies because of a bad frame.

use std::sync::Arc;

use tracing::debug;

use crate::error::HubError;

use super::hub::ChatHub;
use super::protocol::{ClientEvent, Envelope, ServerMessage};
use super::registry::ClientHandle;

pub async fn dispatch(hub: &Arc<ChatHub>, handle: &ClientHandle, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            handle.send(ServerMessage::error(None, &format!("malformed frame: {e}")));
            return;
        }
    };

    let session_id = envelope.session_id;
    if let Err(err) = route(hub, handle, &envelope).await {
        if err.is_benign() {
            debug!(
                participant_id = handle.participant_id,
                ?session_id,
                "Benign race on {}: {err}",
                envelope.kind
            );
        } else {
            debug!(
                participant_id = handle.participant_id,
                ?session_id,
                "Rejected {} frame: {err}",
                envelope.kind
            );
        }
        handle.send(ServerMessage::error(session_id, &err.to_string()));
    }
}

async fn route(
    hub: &Arc<ChatHub>,
    handle: &ClientHandle,
    envelope: &Envelope,
) -> Result<(), HubError> {
    let event = envelope.parse()?;

    // Ping stands alone; everything else addresses a session.
    if event == ClientEvent::Ping {
        handle.send(ServerMessage::pong());
        // Only a party may keep its own session warm. Anyone else's ping
        // must not defer another session's inactivity timeout.
        if let Some(session_id) = envelope.session_id
            && let Some(live) = hub.tracker().get(session_id).await
            && live.is_party(handle.participant_id)
        {
            hub.tracker().touch(session_id).await;
        }
        return Ok(());
    }

    let session_id = envelope
        .session_id
        .ok_or_else(|| HubError::InvalidPayload("missing session_id".to_string()))?;

    match event {
        ClientEvent::Join => hub.join(handle, session_id).await,
        ClientEvent::Message {
            content,
            content_type,
            file_url,
        } => {
            hub.send_chat_message(handle, session_id, &content, &content_type, file_url.as_deref())
                .await
        }
        ClientEvent::Typing => hub.typing(handle, session_id, false).await,
        ClientEvent::TypingStop => hub.typing(handle, session_id, true).await,
        ClientEvent::Read { message_id } => hub.mark_read(handle, session_id, message_id).await,
        ClientEvent::Leave => hub.leave(handle, session_id).await.map(|_| ()),
        ClientEvent::Ping => unreachable!("handled above"),
    }
}
