//! Inbound side: long-poll Telegram for updates and hand each one to the
//! controller in its own task.

use crate::controller::Controller;
use crate::telegram::{TelegramBot, Update};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Server-side wait of one `getUpdates` call.
pub const LONG_POLL_SECS: u64 = 30;

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Offset that acknowledges every update in `updates`.
pub fn next_offset(current: i64, updates: &[Update]) -> i64 {
    updates
        .iter()
        .map(|u| u.update_id + 1)
        .fold(current, i64::max)
}

/// Runs until the process ends. Transport errors are logged and retried.
pub async fn run_listener(bot: Arc<TelegramBot>, controller: Arc<Controller>) {
    info!("Listening for moderator actions");
    let mut offset = 0;
    loop {
        match bot.get_updates(offset, LONG_POLL_SECS).await {
            Ok(updates) => {
                offset = next_offset(offset, &updates);
                for update in updates {
                    debug!(update_id = update.update_id, "Update received");
                    let controller = Arc::clone(&controller);
                    tokio::spawn(async move { controller.handle_update(update).await });
                }
            }
            Err(e) => {
                warn!(error = %e, retry_in = ?RETRY_DELAY, "getUpdates failed");
                sleep(RETRY_DELAY).await;
            }
        }
        let purged = controller.purge_expired_edits();
        if purged > 0 {
            debug!(purged, "Expired edit sessions discarded");
        }
    }
}
