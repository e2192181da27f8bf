use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status, Streaming};
use tracing::{debug, info};

use crate::album_proto::album_service_client::AlbumServiceClient;
use crate::album_proto::{
    GetAlbumRequest, GetTotalAmountRequest, ListAlbumsRequest, UploadAndNotifyRequest,
    UploadAndNotifyResponse, UploadStatus,
};
use crate::client::config::ClientConfig;
use crate::client::error::ClientError;
use crate::item::Item;

/// Result of a `GetTotalAmount` call.
#[derive(Debug, Clone, PartialEq)]
pub struct TotalAmount {
    /// Number of titles sent, matched or not.
    pub count: u32,
    /// Sum of the prices of every stored album whose title was sent.
    pub total: f64,
    pub message: String,
}

/// One server notification from an upload.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub status: UploadStatus,
    pub message: String,
}

impl From<UploadAndNotifyResponse> for Notification {
    fn from(response: UploadAndNotifyResponse) -> Self {
        Self {
            status: response.status(),
            title: response.title,
            message: response.message,
        }
    }
}

/// A client for the album catalog service.
///
/// Cloning is cheap and clones share the underlying HTTP/2 connection, so independent calls can
/// run concurrently from clones.
#[derive(Debug, Clone)]
pub struct AlbumClient {
    inner: AlbumServiceClient<Channel>,
    config: ClientConfig,
}

impl AlbumClient {
    /// Connect to `config.endpoint`, giving up after `config.timeout`.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let connect_error = |source| ClientError::Connect {
            endpoint: config.endpoint.clone(),
            source,
        };

        let channel = Endpoint::from_shared(config.endpoint.clone())
            .map_err(connect_error)?
            .connect_timeout(config.timeout)
            .connect()
            .await
            .map_err(connect_error)?;

        info!(endpoint = %config.endpoint, "Connected to album service");

        Ok(Self::new(channel, config))
    }

    /// Wrap an already established channel.
    pub fn new(channel: Channel, config: ClientConfig) -> Self {
        Self {
            inner: AlbumServiceClient::new(channel),
            config,
        }
    }

    /// Unary lookup. `Ok(None)` means the server answered that no album has this title.
    pub async fn get_album(
        &mut self,
        title: impl Into<String>,
    ) -> Result<Option<Item>, ClientError> {
        let timeout = self.config.timeout;
        let request = bounded(GetAlbumRequest { title: title.into() }, timeout);

        let response = with_deadline(timeout, async {
            Ok(self.inner.get_album(request).await?.into_inner())
        })
        .await?;

        debug!(found = response.found, "GetAlbum response");

        if !response.found {
            return Ok(None);
        }
        Ok(Some(response.album.map(Item::from).unwrap_or_default()))
    }

    /// Server streaming filter. Drains the stream until the server ends it.
    pub async fn list_albums(
        &mut self,
        artist: impl Into<String>,
    ) -> Result<Vec<Item>, ClientError> {
        let timeout = self.config.timeout;
        let request = bounded(
            ListAlbumsRequest {
                artist: artist.into(),
            },
            timeout,
        );

        with_deadline(timeout, async {
            let mut stream = self.inner.list_albums(request).await?.into_inner();
            let mut albums = Vec::new();

            while let Some(response) = stream.message().await? {
                if let Some(album) = response.album {
                    debug!(title = %album.title, "ListAlbums response");
                    albums.push(Item::from(album));
                }
            }

            Ok(albums)
        })
        .await
    }

    /// Client streaming aggregate. Sends `titles` in order, half-closes, then awaits the single
    /// response.
    pub async fn total_amount<I, T>(&mut self, titles: I) -> Result<TotalAmount, ClientError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let timeout = self.config.timeout;
        let titles: Vec<GetTotalAmountRequest> = titles
            .into_iter()
            .map(|title| GetTotalAmountRequest {
                title: title.into(),
            })
            .collect();

        debug!(titles = titles.len(), "Sending GetTotalAmount titles");

        // The stream ending after the last title is the half-close.
        let request = bounded(tokio_stream::iter(titles), timeout);

        let response = with_deadline(timeout, async {
            Ok(self.inner.get_total_amount(request).await?.into_inner())
        })
        .await?;

        Ok(TotalAmount {
            count: response.album_count,
            total: response.total_amount,
            message: response.message,
        })
    }

    /// Full-duplex upload.
    ///
    /// A spawned task drains notifications while this task sends `items` in order and then
    /// half-closes. The call completes only once the receive task has seen the server end its
    /// stream and reported back over a one-shot channel. The receive task is aborted if the
    /// deadline expires first.
    pub async fn upload_and_notify(
        &mut self,
        items: Vec<Item>,
    ) -> Result<Vec<Notification>, ClientError> {
        let timeout = self.config.timeout;
        // A bounded channel needs room for at least one album.
        let (tx, rx) = mpsc::channel(self.config.upload_buffer.max(1));
        let request = bounded(ReceiverStream::new(rx), timeout);

        with_deadline(timeout, async {
            let inbound = self.inner.upload_and_notify(request).await?.into_inner();

            let (done_tx, done_rx) = oneshot::channel();
            let _receiver = ReceiveTask(tokio::spawn(drain_notifications(inbound, done_tx)));

            let mut send_closed = false;
            for item in items {
                debug!(title = %item.title, "Uploading album");
                let request = UploadAndNotifyRequest {
                    album: Some(item.into()),
                };
                if tx.send(request).await.is_err() {
                    send_closed = true;
                    break;
                }
            }

            // Half-close.
            drop(tx);

            // A server error explains a closed request stream better than SendClosed does.
            let notifications = done_rx.await.map_err(|_| ClientError::ReceiverLost)??;
            if send_closed {
                return Err(ClientError::SendClosed);
            }

            Ok(notifications)
        })
        .await
    }
}

/// Aborts the receive task when the upload call is abandoned.
struct ReceiveTask(JoinHandle<()>);

impl Drop for ReceiveTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn drain_notifications(
    mut inbound: Streaming<UploadAndNotifyResponse>,
    done: oneshot::Sender<Result<Vec<Notification>, Status>>,
) {
    let mut notifications = Vec::new();

    let result = loop {
        match inbound.message().await {
            Ok(Some(response)) => {
                let notification = Notification::from(response);
                debug!(
                    title = %notification.title,
                    status = ?notification.status,
                    "Upload notification"
                );
                notifications.push(notification);
            }
            Ok(None) => break Ok(notifications),
            Err(status) => break Err(status),
        }
    };

    let _ = done.send(result);
}

/// Attach the call deadline to the request so the server can enforce it as well.
fn bounded<T>(message: T, timeout: Duration) -> Request<T> {
    let mut request = Request::new(message);
    request.set_timeout(timeout);
    request
}

async fn with_deadline<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, ClientError> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| ClientError::Timeout(timeout))?
}
