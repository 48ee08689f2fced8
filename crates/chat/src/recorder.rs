use storage::{ExchangeRecord, Storage};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Exchanges queued but not yet written when the stream completes. When the
/// queue is full the exchange is dropped with a log line; the client already
/// has its answer and persistence failures never reach it.
const QUEUE_CAPACITY: usize = 256;

/// Off-critical-path persistence of completed exchanges.
///
/// A bounded channel feeds one background worker; the response stream hands
/// its record over and completes without waiting. Shutdown cancels the
/// worker through the token, which drains whatever is still queued before
/// exiting.
#[derive(Clone)]
pub(crate) struct ExchangeRecorder {
    tx: mpsc::Sender<ExchangeRecord>,
}

impl ExchangeRecorder {
    /// Start the background worker and hand out the queue side.
    pub fn spawn(storage: Storage, shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = tokio::spawn(worker(storage, rx, shutdown));

        (Self { tx }, handle)
    }

    /// Queue one completed exchange, fire-and-forget.
    ///
    /// Exchanges with an empty accumulated answer are skipped entirely;
    /// there is nothing meaningful to record.
    pub fn record(&self, record: ExchangeRecord) {
        if record.answer.is_empty() {
            log::debug!(
                "Skipping persistence of an empty answer for {}",
                record.conversation_id
            );
            return;
        }

        if let Err(e) = self.tx.try_send(record) {
            log::warn!("Exchange not persisted, recorder queue unavailable: {e}");
        }
    }
}

async fn worker(storage: Storage, mut rx: mpsc::Receiver<ExchangeRecord>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(record) => write(&storage, record).await,
                None => break,
            },
            () = shutdown.cancelled() => {
                rx.close();

                while let Ok(record) = rx.try_recv() {
                    write(&storage, record).await;
                }

                break;
            }
        }
    }
}

async fn write(storage: &Storage, record: ExchangeRecord) {
    match storage.insert_exchange(&record).await {
        Ok(id) => log::debug!("Recorded exchange {id} for {}", record.conversation_id),
        Err(e) => log::error!("Failed to record exchange for {}: {e}", record.conversation_id),
    }
}
