use std::sync::Arc;

use parking_lot::Mutex;

use super::{Channel, ChannelError};

/// In-memory channel that records every frame. Clones share the same record,
/// so a test can keep one handle while the client owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingChannel {
    inner: Arc<Mutex<Recorded>>,
}

#[derive(Debug, Default)]
struct Recorded {
    frames: Vec<String>,
    closed: bool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.inner.lock().frames.clone()
    }

    /// Parsed JSON of every frame; frames that are not JSON are skipped.
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.inner
            .lock()
            .frames
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().frames.clear();
    }
}

impl Channel for RecordingChannel {
    fn send_text(&self, text: String) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(ChannelError::Closed);
        }
        inner.frames.push(text);
        Ok(())
    }

    fn close(&self) {
        self.inner.lock().closed = true;
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_frames_and_close_state() {
        let channel = RecordingChannel::new();
        let handle = channel.clone();

        channel.send_text(r#"{"name":"lm"}"#.into()).expect("send");
        assert_eq!(handle.sent(), [r#"{"name":"lm"}"#]);
        assert_eq!(handle.sent_json()[0]["name"], "lm");

        handle.close();
        assert!(channel.is_closed());
        assert!(matches!(channel.send_text("late".into()), Err(ChannelError::Closed)));
    }
}
