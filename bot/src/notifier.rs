use pong_core::notice::Notice;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tracing::instrument;

/// How long a single delivery may take, connecting included.
///
/// Notices are delivered one at a time, so an endpoint that never answers would otherwise hold up
/// every notice queued behind it.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

pub fn client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(DELIVERY_TIMEOUT).build()
}

/// Deliver notices until every sender has been dropped.
///
/// Notices are posted one at a time, in the order they were queued. A notice that cannot be
/// delivered is logged and dropped.
#[instrument(skip_all)]
pub async fn deliver(client: reqwest::Client, mut notices: Receiver<Notice>) {
    while let Some(notice) = notices.recv().await {
        let url = notice.response_url().clone();
        let res = client
            .post(url.clone())
            .json(&notice.reply())
            .send()
            .await
            .and_then(|response| response.error_for_status());
        match res {
            Ok(_) => tracing::debug!(%url, "delivered notice"),
            Err(err) => tracing::warn!(%url, ?notice, "failed to deliver notice: {err:#}"),
        }
    }

    tracing::info!("notice queue closed");
}
