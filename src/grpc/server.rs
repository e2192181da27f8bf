use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info, warn};

use crate::album_proto::album_service_server::{AlbumService, AlbumServiceServer};
use crate::album_proto::{
    Album, GetAlbumRequest, GetAlbumResponse, GetTotalAmountRequest, GetTotalAmountResponse,
    ListAlbumsRequest, ListAlbumsResponse, UploadAndNotifyRequest, UploadAndNotifyResponse,
    UploadStatus,
};
use crate::catalog::{Catalog, UploadOutcome};
use crate::grpc::config::{DEFAULT_REQUEST_TIMEOUT, ServerConfig};
use crate::grpc::deadline::call_deadline;
use crate::item::Item;
use crate::session::{SessionMap, StreamSession};
use crate::state_machine::StateMachine;
use crate::state_machine::session::{CallPattern, SessionState};
use crate::state_machine::tally::{TallyInput, TallyMachine, TallyOutput};
use crate::store::JsonFileBackend;

const GET_ALBUM: &str = "album.AlbumService/GetAlbum";
const LIST_ALBUMS: &str = "album.AlbumService/ListAlbums";
const GET_TOTAL_AMOUNT: &str = "album.AlbumService/GetTotalAmount";
const UPLOAD_AND_NOTIFY: &str = "album.AlbumService/UploadAndNotify";

/// Notifications buffered per upload call before the receive loop waits on the client.
const UPLOAD_OUTBOUND_BUFFER: usize = 32;

/// How long an expired upload waits to queue its `DEADLINE_EXCEEDED` status.
const DEADLINE_GRACE: Duration = Duration::from_secs(1);

/// Load the record file named in `config` and serve until Ctrl+C or SIGTERM.
pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    let catalog = Catalog::open(JsonFileBackend::new(&config.store_path))
        .await
        .with_context(|| {
            format!(
                "failed to load records from {}",
                config.store_path.display()
            )
        })?;

    serve(&config, catalog, shutdown_signal()).await
}

/// Serve `catalog` on `config.addr` until `shutdown` resolves.
pub async fn serve(
    config: &ServerConfig,
    catalog: Catalog,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let service = AlbumServiceImpl::new(catalog).with_request_timeout(config.request_timeout);

    info!(
        address = %config.addr,
        request_timeout_ms = config.request_timeout.as_millis() as u64,
        "gRPC server starting"
    );

    tonic::transport::Server::builder()
        .timeout(config.request_timeout)
        .add_service(service.into_server())
        .serve_with_shutdown(config.addr, shutdown)
        .await?;

    info!("gRPC server shut down");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[derive(Debug, Clone)]
pub struct AlbumServiceImpl {
    catalog: Catalog,
    sessions: Arc<SessionMap>,
    request_timeout: Duration,
}

impl AlbumServiceImpl {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            sessions: Arc::new(SessionMap::new()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Longest a call may run, streams included. A shorter caller deadline wins.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn into_server(self) -> AlbumServiceServer<Self> {
        AlbumServiceServer::new(self)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Number of calls currently being served.
    pub fn active_sessions(&self) -> usize {
        self.sessions.active_session_count()
    }
}

type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

#[tonic::async_trait]
impl AlbumService for AlbumServiceImpl {
    type ListAlbumsStream = ResponseStream<ListAlbumsResponse>;
    type UploadAndNotifyStream = ResponseStream<UploadAndNotifyResponse>;

    async fn get_album(
        &self,
        request: Request<GetAlbumRequest>,
    ) -> Result<Response<GetAlbumResponse>, Status> {
        let session = StreamSession::open(&self.sessions, GET_ALBUM, CallPattern::Unary);
        let title = request.into_inner().title;

        info!(session_id = %session.session_id(), title = %title, "GetAlbum started");

        let response = match self.catalog.lookup(&title).await {
            Some(item) => GetAlbumResponse {
                album: Some(item.into()),
                found: true,
            },
            None => {
                info!(title = %title, "Album not found");
                GetAlbumResponse {
                    album: Some(Album::default()),
                    found: false,
                }
            }
        };

        session.sent();
        session.finished();
        Ok(Response::new(response))
    }

    async fn list_albums(
        &self,
        request: Request<ListAlbumsRequest>,
    ) -> Result<Response<Self::ListAlbumsStream>, Status> {
        let session = StreamSession::open(&self.sessions, LIST_ALBUMS, CallPattern::ServerStream);
        let deadline = call_deadline(request.metadata(), self.request_timeout);
        let artist = request.into_inner().artist;
        let matches = self.catalog.filter_by_artist(&artist).await;

        info!(
            session_id = %session.session_id(),
            artist = %artist,
            matches = matches.len(),
            "ListAlbums started"
        );

        // Each yield waits on the client, so the deadline is checked before every send.
        let outbound = async_stream::stream! {
            let mut expired = false;
            for item in matches {
                if Instant::now() >= deadline {
                    expired = true;
                    break;
                }
                session.sent();
                yield Ok(ListAlbumsResponse { album: Some(item.into()) });
            }

            if expired {
                warn!(session_id = %session.session_id(), "ListAlbums deadline exceeded");
                session.aborted();
                yield Err(Status::deadline_exceeded("ListAlbums deadline exceeded"));
            } else {
                session.finished();
            }
        };

        Ok(Response::new(Box::pin(outbound)))
    }

    async fn get_total_amount(
        &self,
        request: Request<Streaming<GetTotalAmountRequest>>,
    ) -> Result<Response<GetTotalAmountResponse>, Status> {
        let session =
            StreamSession::open(&self.sessions, GET_TOTAL_AMOUNT, CallPattern::ClientStream);
        let deadline = call_deadline(request.metadata(), self.request_timeout);
        let mut inbound = request.into_inner();
        let mut tally = TallyMachine::new();

        info!(session_id = %session.session_id(), "GetTotalAmount started");

        loop {
            let Ok(next) = tokio::time::timeout_at(deadline, inbound.message()).await else {
                warn!(session_id = %session.session_id(), "GetTotalAmount deadline exceeded");
                session.aborted();
                return Err(Status::deadline_exceeded("GetTotalAmount deadline exceeded"));
            };

            match next {
                Ok(Some(req)) => {
                    session.received();
                    debug!(session_id = %session.session_id(), title = %req.title, "Title received");
                    let prices = self.catalog.prices_for(&req.title).await;
                    tally.process_input(TallyInput::Observed(prices));
                }
                Ok(None) => break,
                Err(status) => {
                    warn!(session_id = %session.session_id(), error = %status, "GetTotalAmount inbound failed");
                    session.aborted();
                    return Err(status);
                }
            }
        }

        session.half_closed();
        tally.process_input(TallyInput::Close);

        let Some(TallyOutput::Summary(summary)) = tally.poll_output() else {
            session.aborted();
            return Err(Status::internal("tally closed without a summary"));
        };

        info!(
            session_id = %session.session_id(),
            count = summary.count,
            total = summary.total,
            "GetTotalAmount completed"
        );

        session.sent();
        session.finished();
        Ok(Response::new(GetTotalAmountResponse {
            album_count: summary.count,
            total_amount: summary.total,
            message: "success to get total amount".to_string(),
        }))
    }

    async fn upload_and_notify(
        &self,
        request: Request<Streaming<UploadAndNotifyRequest>>,
    ) -> Result<Response<Self::UploadAndNotifyStream>, Status> {
        let session = Arc::new(StreamSession::open(
            &self.sessions,
            UPLOAD_AND_NOTIFY,
            CallPattern::Duplex,
        ));
        let deadline = call_deadline(request.metadata(), self.request_timeout);
        let inbound = request.into_inner();
        let (tx, mut rx) = mpsc::channel(UPLOAD_OUTBOUND_BUFFER);

        info!(session_id = %session.session_id(), "UploadAndNotify started");

        tokio::spawn(run_upload(
            self.catalog.clone(),
            Arc::clone(&session),
            inbound,
            tx,
            deadline,
        ));

        // Ends once the receive loop has dropped its sender and every queued notification is out.
        let outbound = async_stream::stream! {
            while let Some(message) = rx.recv().await {
                match &message {
                    Ok(_) => {
                        session.sent();
                    }
                    Err(status) => {
                        warn!(session_id = %session.session_id(), error = %status, "UploadAndNotify aborted");
                        session.aborted();
                    }
                }
                yield message;
            }

            if session.state() != SessionState::Closed {
                session.finished();
                info!(session_id = %session.session_id(), "UploadAndNotify completed");
            }
        };

        Ok(Response::new(Box::pin(outbound)))
    }
}

/// Receive loop of one upload call: one notification per inbound album, in arrival order.
///
/// Returning drops `tx`, which lets the outbound stream drain and close the server direction.
/// Past `deadline` the call ends with `DEADLINE_EXCEEDED`, whether it was waiting on the client's
/// next album or on room to queue a notification.
async fn run_upload(
    catalog: Catalog,
    session: Arc<StreamSession>,
    mut inbound: Streaming<UploadAndNotifyRequest>,
    tx: mpsc::Sender<Result<UploadAndNotifyResponse, Status>>,
    deadline: Instant,
) {
    let expired = || Status::deadline_exceeded("UploadAndNotify deadline exceeded");

    loop {
        let Ok(next) = tokio::time::timeout_at(deadline, inbound.message()).await else {
            debug!(session_id = %session.session_id(), "Upload deadline exceeded while receiving");
            let _ = tokio::time::timeout_at(deadline + DEADLINE_GRACE, tx.send(Err(expired())))
                .await;
            return;
        };

        let request = match next {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!(session_id = %session.session_id(), "Client half-closed, draining notifications");
                session.half_closed();
                return;
            }
            Err(status) => {
                let _ = tx.send(Err(status)).await;
                return;
            }
        };

        session.received();

        let item = match validate_upload(request) {
            Ok(item) => item,
            Err(status) => {
                let _ = tx.send(Err(status)).await;
                return;
            }
        };

        debug!(session_id = %session.session_id(), title = %item.title, "Album received");

        let title = item.title.clone();
        let outcome = catalog.upload(item).await;

        let sent = tokio::time::timeout_at(deadline, tx.send(Ok(notification(title, outcome))));
        match sent.await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                debug!(session_id = %session.session_id(), "Client went away, stopping upload");
                return;
            }
            Err(_) => {
                debug!(session_id = %session.session_id(), "Upload deadline exceeded while sending");
                let _ = tx.try_send(Err(expired()));
                return;
            }
        }
    }
}

fn validate_upload(request: UploadAndNotifyRequest) -> Result<Item, Status> {
    let album = request
        .album
        .ok_or_else(|| Status::invalid_argument("upload request is missing an album"))?;

    if album.title.is_empty() {
        return Err(Status::invalid_argument("album title must not be empty"));
    }

    Ok(Item::from(album))
}

fn notification(title: String, outcome: UploadOutcome) -> UploadAndNotifyResponse {
    let (status, message) = match outcome {
        UploadOutcome::Uploaded => (UploadStatus::Uploaded, format!("{title} is uploaded")),
        UploadOutcome::AlreadyExists => {
            (UploadStatus::AlreadyExists, format!("{title} already exists"))
        }
        UploadOutcome::Failed(e) => (
            UploadStatus::Failed,
            format!("{title} failed to persist: {e}"),
        ),
    };

    UploadAndNotifyResponse {
        message,
        status: status.into(),
        title,
    }
}
