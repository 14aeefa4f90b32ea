//! Message handler seam shared by every consuming stage.

use async_trait::async_trait;

use crate::error::{Disposition, Result};

/// One consuming stage: turn a payload into side effects.
///
/// Returning `Ok` acknowledges the message. An error is mapped through
/// [`crate::error::AppError::disposition`].
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Stage name used in logs.
    fn name(&self) -> &str;

    async fn handle(&self, payload: &[u8]) -> Result<()>;
}

/// Run a handler on one payload and decide what to tell the broker.
///
/// No error escapes: the consumer loop keeps running whatever the handler does.
pub async fn process(handler: &dyn MessageHandler, payload: &[u8]) -> Disposition {
    match handler.handle(payload).await {
        Ok(()) => Disposition::Ack,
        Err(e) => {
            let disposition = e.disposition();
            match disposition {
                Disposition::Ack => log::error!(
                    "[{}] dropping message ({}): {e}",
                    handler.name(),
                    preview(payload)
                ),
                Disposition::Requeue => log::warn!(
                    "[{}] requeueing message ({}): {e}",
                    handler.name(),
                    preview(payload)
                ),
            }
            disposition
        }
    }
}

/// Short printable excerpt of a payload for log lines.
pub fn preview(payload: &[u8]) -> String {
    const MAX: usize = 120;
    let text = String::from_utf8_lossy(payload);
    let text = text.trim();
    if text.chars().count() > MAX {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}…")
    } else {
        text.to_string()
    }
}
