//! Download and delivery flow for one chat request.
//!
//! A text message runs metadata lookup, confirmation, and download, then
//! offers the two delivery formats. The tapped format later reads the record
//! back and streams it to the user. [`session::SessionStore`] keeps the state
//! between those two halves so each offer is honoured at most once and only
//! for the user who asked.
//!
//! Every failure ends in an apology message plus a log line; nothing is
//! retried.

pub mod choice;
pub mod messages;
pub mod session;

use std::{io, path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{io::AsyncRead, sync::Semaphore};
use tracing::{error, info, warn};

use crate::{
    error::{Error, Result},
    extractor::Extractor,
    packaging,
    progress::ProgressReader,
    storage::{DownloadId, Storage, StoredRecord},
};
use choice::{DeliveryFormat, FormatChoice};
use session::{SessionError, SessionStore, Stage, UserKey};

/// A file ready to be sent back through the chat transport.
pub struct Document {
    pub file_name: String,
    pub size: u64,
    pub body: Box<dyn AsyncRead + Send + Unpin>,
}

/// Outgoing side of a chat conversation.
#[async_trait]
pub trait Reply: Send + Sync {
    async fn text(&self, text: &str) -> Result<()>;

    async fn html(&self, html: &str) -> Result<()>;

    /// Sends `text` with one button per delivery format for `id`.
    async fn offer_formats(&self, text: &str, id: DownloadId, audio_format: &str) -> Result<()>;

    /// Clears the pending state of the button that triggered a delivery.
    async fn acknowledge(&self) -> Result<()>;

    async fn document(&self, document: Document) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub max_concurrent_downloads: usize,
    pub choice_ttl: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 2,
            choice_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    storage: Storage,
    extractor: Arc<dyn Extractor>,
    sessions: Arc<SessionStore>,
    slots: Arc<Semaphore>,
    audio_format: String,
}

impl Pipeline {
    pub fn new(
        storage: Storage,
        extractor: Arc<dyn Extractor>,
        audio_format: impl Into<String>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            storage,
            extractor,
            sessions: Arc::new(SessionStore::new(options.choice_ttl)),
            slots: Arc::new(Semaphore::new(options.max_concurrent_downloads.max(1))),
            audio_format: audio_format.into(),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handles a URL sent by `user`. Returns the new download id when the
    /// format offer went out, `None` when the user got an apology instead.
    pub async fn request_download(
        &self,
        user: UserKey,
        url: &str,
        reply: &dyn Reply,
    ) -> Result<Option<DownloadId>> {
        let url = url.trim();
        reply.text(messages::SEARCHING).await?;

        match self.download(user, url, reply).await {
            Ok(id) => Ok(Some(id)),
            Err(err) => {
                error!(user, url, error = %err, "download failed");
                reply.text(&messages::download_failed(url)).await?;
                Ok(None)
            }
        }
    }

    async fn download(&self, user: UserKey, url: &str, reply: &dyn Reply) -> Result<DownloadId> {
        let media = self.extractor.fetch_metadata(url).await?;
        info!(user, url, title = %media.title, "metadata resolved");
        reply.html(&messages::found(&media.title)).await?;

        let slot = self
            .slots
            .acquire()
            .await
            .map_err(|_| Error::extraction("download queue is closed"))?;

        let storage = self.storage.clone();
        let (id, dir) = blocking(move || storage.allocate()).await?;
        self.sessions.open(id, user);

        let stored = match self.fetch_into(id, url, &dir, &media.title).await {
            Ok(()) => self
                .sessions
                .advance(id, user, Stage::AwaitingFormatChoice)
                .map(drop)
                .map_err(Error::from),
            Err(err) => Err(err),
        };
        drop(slot);

        if let Err(err) = stored {
            let _ = self.sessions.advance(id, user, Stage::Failed);
            let storage = self.storage.clone();
            if let Err(cleanup) = blocking(move || storage.discard(id)).await {
                warn!(%id, error = %cleanup, "could not remove failed download");
            }
            return Err(err);
        }

        info!(user, %id, title = %media.title, "download stored");
        reply
            .offer_formats(&messages::done(&self.audio_format), id, &self.audio_format)
            .await?;
        Ok(id)
    }

    async fn fetch_into(&self, id: DownloadId, url: &str, dir: &Path, title: &str) -> Result<()> {
        self.extractor.extract_audio(url, dir).await?;
        let storage = self.storage.clone();
        let title = title.to_owned();
        blocking(move || storage.write_title(id, &title)).await
    }

    /// Handles a tapped format button.
    pub async fn deliver(&self, user: UserKey, choice: FormatChoice, reply: &dyn Reply) -> Result<()> {
        reply.acknowledge().await?;

        let id = choice.id;
        if let Err(err) = self.sessions.advance(id, user, Stage::Delivering) {
            warn!(user, %id, error = %err, "format choice refused");
            let text = match err {
                SessionError::Unknown { .. } => messages::NOT_FOUND,
                _ => messages::CHOICE_UNAVAILABLE,
            };
            return reply.text(text).await;
        }

        match self.send(choice, reply).await {
            Ok(()) => {
                if let Err(err) = self.sessions.advance(id, user, Stage::Done) {
                    warn!(user, %id, error = %err, "delivered without an open session");
                }
                Ok(())
            }
            Err(err) => {
                error!(user, %id, error = %err, "delivery failed");
                let _ = self.sessions.advance(id, user, Stage::Failed);
                let text = match err {
                    Error::NotFound { .. } => messages::NOT_FOUND,
                    _ => messages::DELIVERY_FAILED,
                };
                reply.text(text).await
            }
        }
    }

    async fn send(&self, choice: FormatChoice, reply: &dyn Reply) -> Result<()> {
        let storage = self.storage.clone();
        let id = choice.id;
        let record = blocking(move || storage.read_record(id)).await?;
        info!(%id, title = %record.title, size = record.size, "retrieved download data");

        reply.text(messages::SENDING).await?;
        let document = build_document(&record, choice.format).await?;
        reply.document(document).await?;
        reply.text(messages::FAREWELL).await
    }
}

/// Opens the stored media, wrapping it in an archive when asked to.
async fn build_document(record: &StoredRecord, format: DeliveryFormat) -> Result<Document> {
    let base = file_stem(&record.title);
    let audio_name = format!("{base}.{}", record.extension());

    let (file_name, file) = match format {
        DeliveryFormat::Audio => (audio_name, tokio::fs::File::open(&record.media_path).await?),
        DeliveryFormat::Zip => {
            let archive = packaging::package_file(audio_name, record.media_path.clone()).await?;
            (format!("{base}.zip"), archive)
        }
    };

    let size = file.metadata().await?.len();
    Ok(Document {
        file_name,
        size,
        body: Box::new(ProgressReader::new(file, record.title.clone(), size)),
    })
}

/// Titles become file names; path separators would turn into directories
/// inside the archive.
fn file_stem(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            _ => c,
        })
        .collect();
    if stem.trim().is_empty() {
        "audio".to_owned()
    } else {
        stem
    }
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| Error::Io(io::Error::other(format!("blocking task failed: {err}"))))?
}
