//! Persists firehose traffic into the log store.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_net::{FirehoseEvent, FirehoseReader};
use parley_shared::protocol::IncomingMessage;
use parley_shared::CharacterName;
use parley_store::{LogStore, NewLogMessage};

/// Log every channel and private message from `reader` until it ends or
/// `cancel` fires. `me` is the logged-in character, one side of every PM
/// conversation.
pub async fn run_log_bridge(
    mut reader: FirehoseReader,
    store: LogStore,
    me: CharacterName,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = reader.recv() => event,
        };
        let Some(event) = event else {
            debug!("firehose ended, log bridge stopping");
            break;
        };

        let result = match event {
            FirehoseEvent::StreamBroken { session_id } => {
                info!(
                    session = session_id.as_deref().unwrap_or("-"),
                    "firehose stream restarted; missed messages are not in the log"
                );
                continue;
            }
            FirehoseEvent::Message(IncomingMessage::Channel(m)) => {
                let title = m.channel_title.clone().unwrap_or_else(|| m.channel.clone());
                let entry = NewLogMessage {
                    speaker: m.character,
                    gender: m.gender,
                    status: m.status,
                    message_type: m.message_type,
                    text: m.text,
                    timestamp: m.timestamp.unwrap_or_else(Utc::now),
                };
                store
                    .log_channel_message(&m.channel, &title, entry, &cancel)
                    .await
                    .map(|_| ())
            }
            FirehoseEvent::Message(IncomingMessage::Private(m)) => {
                let interlocutor = if m.sender == me {
                    m.recipient.clone()
                } else {
                    m.sender.clone()
                };
                let entry = NewLogMessage {
                    speaker: m.sender,
                    gender: m.gender,
                    status: m.status,
                    message_type: m.message_type,
                    text: m.text,
                    timestamp: m.timestamp.unwrap_or_else(Utc::now),
                };
                store
                    .log_pm_convo_message(&me, &interlocutor, entry, &cancel)
                    .await
                    .map(|_| ())
            }
            FirehoseEvent::Message(_) => continue,
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => break,
            Err(e) => warn!(error = %e, "failed to log firehose message"),
        }
    }
}
