//! End-to-end tests driving an in-process album server with the real client.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tonic::transport::Endpoint;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};

use album_catalog::album_proto::{GetTotalAmountRequest, UploadAndNotifyRequest, UploadStatus};
use album_catalog::catalog::Catalog;
use album_catalog::client::{AlbumClient, ClientConfig, ClientError};
use album_catalog::grpc::{AlbumServiceClient, AlbumServiceImpl};
use album_catalog::item::Item;
use album_catalog::store::{JsonFileBackend, MemoryBackend, SnapshotBackend};

static INIT_TRACING: Once = Once::new();

fn init_tracing() {
    INIT_TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("album_catalog=debug")
            .with_test_writer()
            .init();
    });
}

fn blue_train() -> Item {
    Item::new("Blue Train", "John Coltrane", 56.99)
}

/// Serve `catalog` on an ephemeral port, returning the address and the service handle.
async fn start_test_server(catalog: Catalog) -> (SocketAddr, AlbumServiceImpl) {
    start_service(AlbumServiceImpl::new(catalog)).await
}

async fn start_service(service: AlbumServiceImpl) -> (SocketAddr, AlbumServiceImpl) {
    init_tracing();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = service.clone().into_server();

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(server)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
    });

    (addr, service)
}

async fn connect_client(addr: SocketAddr) -> AlbumClient {
    let config = ClientConfig::builder()
        .endpoint(format!("http://{addr}"))
        .timeout(Duration::from_secs(5))
        .build();
    AlbumClient::connect(config).await.unwrap()
}

/// Wait for the server to tear down every call, returning how many are still active.
async fn wait_for_idle(service: &AlbumServiceImpl) -> usize {
    let mut active = service.active_sessions();
    for _ in 0..100 {
        if active == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        active = service.active_sessions();
    }
    active
}

async fn json_catalog(path: &Path, items: &[Item]) -> Catalog {
    let backend = JsonFileBackend::new(path);
    backend.store(items).await.unwrap();
    Catalog::open(backend).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_to_end_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("album.json");
    let catalog = json_catalog(&path, &[blue_train()]).await;
    let (addr, _) = start_test_server(catalog).await;
    let mut client = connect_client(addr).await;

    assert_eq!(client.get_album("Blue Train").await.unwrap(), Some(blue_train()));
    assert_eq!(client.get_album("Nope").await.unwrap(), None);

    assert_eq!(
        client.list_albums("John Coltrane").await.unwrap(),
        vec![blue_train()]
    );

    let total = client.total_amount(["Blue Train", "Nope"]).await.unwrap();
    assert_eq!(total.count, 2);
    assert_eq!(total.total, 56.99);
    assert_eq!(total.message, "success to get total amount");

    let notifications = client
        .upload_and_notify(vec![Item::new("New", "X", 1.0)])
        .await
        .unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].status, UploadStatus::Uploaded);
    assert_eq!(notifications[0].message, "New is uploaded");

    assert_eq!(
        client.get_album("New").await.unwrap(),
        Some(Item::new("New", "X", 1.0))
    );

    // The upload reached the record file.
    let persisted = JsonFileBackend::new(&path).load().await.unwrap();
    assert_eq!(persisted, vec![blue_train(), Item::new("New", "X", 1.0)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_list_albums_in_store_order() {
    let items = vec![
        Item::new("Kind of Blue", "Miles Davis", 42.99),
        blue_train(),
        Item::new("Sketches of Spain", "Miles Davis", 34.99),
    ];
    let catalog = Catalog::open(MemoryBackend::with_items(items.clone()))
        .await
        .unwrap();
    let (addr, _) = start_test_server(catalog).await;
    let mut client = connect_client(addr).await;

    let listed = client.list_albums("Miles Davis").await.unwrap();
    assert_eq!(listed, vec![items[0].clone(), items[2].clone()]);

    assert!(client.list_albums("Nobody").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_total_amount_with_unique_titles() {
    let items = vec![
        blue_train(),
        Item::new("Giant Steps", "John Coltrane", 63.99),
    ];
    let catalog = Catalog::open(MemoryBackend::with_items(items)).await.unwrap();
    let (addr, _) = start_test_server(catalog).await;
    let mut client = connect_client(addr).await;

    let total = client
        .total_amount(["Blue Train", "Giant Steps", "Speak No Evil"])
        .await
        .unwrap();
    assert_eq!(total.count, 3);
    assert!((total.total - (56.99 + 63.99)).abs() < 1e-9);

    let empty = client.total_amount(Vec::<String>::new()).await.unwrap();
    assert_eq!(empty.count, 0);
    assert_eq!(empty.total, 0.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_total_amount_sums_every_duplicate_title() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("album.json");
    std::fs::write(
        &path,
        r#"[
            {"title": "Blue Train", "artist": "John Coltrane", "price": 56.99},
            {"title": "Blue Train", "artist": "John Coltrane", "price": 10.0}
        ]"#,
    )
    .unwrap();
    let catalog = Catalog::open(JsonFileBackend::new(&path)).await.unwrap();
    let (addr, _) = start_test_server(catalog).await;
    let mut client = connect_client(addr).await;

    let total = client.total_amount(["Blue Train"]).await.unwrap();
    assert_eq!(total.count, 1);
    assert!((total.total - 66.99).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_existing_title_leaves_store_unchanged() {
    let backend = MemoryBackend::with_items(vec![blue_train()]);
    let catalog = Catalog::open(backend.clone()).await.unwrap();
    let (addr, service) = start_test_server(catalog).await;
    let mut client = connect_client(addr).await;

    let notifications = client
        .upload_and_notify(vec![
            Item::new("New Album", "New Artist", 10.99),
            Item::new("Blue Train", "Someone Else", 1.0),
            Item::new("Jeru", "Gerry Mulligan", 17.99),
            Item::new("New Album", "New Artist", 10.99),
        ])
        .await
        .unwrap();

    let statuses: Vec<_> = notifications.iter().map(|n| n.status).collect();
    assert_eq!(
        statuses,
        [
            UploadStatus::Uploaded,
            UploadStatus::AlreadyExists,
            UploadStatus::Uploaded,
            UploadStatus::AlreadyExists,
        ]
    );
    assert_eq!(notifications[1].message, "Blue Train already exists");

    assert_eq!(service.catalog().len().await, 3);
    assert_eq!(
        client.get_album("Blue Train").await.unwrap(),
        Some(blue_train())
    );
    assert_eq!(backend.snapshot().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_storage_failure_is_per_item() {
    let backend = MemoryBackend::with_items(vec![blue_train()]);
    let catalog = Catalog::open(backend.clone()).await.unwrap();
    let (addr, service) = start_test_server(catalog).await;
    let mut client = connect_client(addr).await;

    backend.set_fail_writes(true);
    let notifications = client
        .upload_and_notify(vec![
            Item::new("New", "X", 1.0),
            Item::new("Blue Train", "John Coltrane", 56.99),
        ])
        .await
        .unwrap();

    // The session carried on past the failed write.
    assert_eq!(notifications.len(), 2);
    assert_eq!(notifications[0].status, UploadStatus::Failed);
    assert!(notifications[0].message.starts_with("New failed to persist"));
    assert_eq!(notifications[1].status, UploadStatus::AlreadyExists);

    // Memory kept the item even though the snapshot did not.
    assert!(service.catalog().is_diverged().await);
    assert!(client.get_album("New").await.unwrap().is_some());
    assert_eq!(backend.snapshot(), vec![blue_train()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads_all_persist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("album.json");
    let catalog = json_catalog(&path, &[blue_train()]).await;
    let (addr, service) = start_test_server(catalog).await;
    let client = connect_client(addr).await;

    let uploads: Vec<_> = (0..8)
        .map(|batch| {
            let mut client = client.clone();
            tokio::spawn(async move {
                let items = (0..5)
                    .map(|i| Item::new(format!("Album {batch}-{i}"), "Various", 1.0))
                    .collect();
                client.upload_and_notify(items).await
            })
        })
        .collect();

    for upload in uploads {
        let notifications = upload.await.unwrap().unwrap();
        assert_eq!(notifications.len(), 5);
        assert!(
            notifications
                .iter()
                .all(|n| n.status == UploadStatus::Uploaded)
        );
    }

    assert_eq!(service.catalog().len().await, 1 + 40);
    let persisted = JsonFileBackend::new(&path).load().await.unwrap();
    assert_eq!(persisted.len(), 1 + 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_notifications_interleave_with_sends() {
    let catalog = Catalog::open(MemoryBackend::new()).await.unwrap();
    let (addr, _) = start_test_server(catalog).await;
    let mut raw = AlbumServiceClient::connect(format!("http://{addr}"))
        .await
        .unwrap();

    let (tx, rx) = mpsc::channel(4);
    let mut inbound = raw
        .upload_and_notify(ReceiverStream::new(rx))
        .await
        .unwrap()
        .into_inner();

    // Each notification arrives while the request stream is still open.
    for title in ["First", "Second"] {
        tx.send(UploadAndNotifyRequest {
            album: Some(Item::new(title, "X", 1.0).into()),
        })
        .await
        .unwrap();

        let notification = tokio::time::timeout(Duration::from_secs(5), inbound.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(notification.title, title);
        assert_eq!(notification.status(), UploadStatus::Uploaded);
    }

    drop(tx);
    assert!(inbound.message().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_upload_aborts_session() {
    let backend = MemoryBackend::new();
    let catalog = Catalog::open(backend.clone()).await.unwrap();
    let (addr, service) = start_test_server(catalog).await;
    let mut raw = AlbumServiceClient::connect(format!("http://{addr}"))
        .await
        .unwrap();

    let requests = vec![
        UploadAndNotifyRequest {
            album: Some(Item::new("Kept", "X", 1.0).into()),
        },
        UploadAndNotifyRequest { album: None },
        UploadAndNotifyRequest {
            album: Some(Item::new("Never", "X", 1.0).into()),
        },
    ];
    let mut inbound = raw
        .upload_and_notify(tokio_stream::iter(requests))
        .await
        .unwrap()
        .into_inner();

    let first = inbound.message().await.unwrap().unwrap();
    assert_eq!(first.status(), UploadStatus::Uploaded);

    let error = inbound.message().await.unwrap_err();
    assert_eq!(error.code(), tonic::Code::InvalidArgument);

    // Work applied before the abort stays applied, nothing after it runs.
    assert!(service.catalog().lookup("Kept").await.is_some());
    assert!(service.catalog().lookup("Never").await.is_none());
    assert_eq!(backend.snapshot().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sessions_are_released_after_calls() {
    let catalog = Catalog::open(MemoryBackend::with_items(vec![blue_train()]))
        .await
        .unwrap();
    let (addr, service) = start_test_server(catalog).await;
    let mut client = connect_client(addr).await;

    client.get_album("Blue Train").await.unwrap();
    client.list_albums("John Coltrane").await.unwrap();
    client.total_amount(["Blue Train"]).await.unwrap();
    client
        .upload_and_notify(vec![Item::new("New", "X", 1.0)])
        .await
        .unwrap();

    // The server may still be tearing down the last stream when the client returns.
    assert_eq!(wait_for_idle(&service).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_open_upload_ends_at_caller_deadline() {
    let catalog = Catalog::open(MemoryBackend::new()).await.unwrap();
    let (addr, service) = start_service(
        AlbumServiceImpl::new(catalog).with_request_timeout(Duration::from_secs(30)),
    )
    .await;
    let mut raw = AlbumServiceClient::connect(format!("http://{addr}"))
        .await
        .unwrap();

    let (tx, rx) = mpsc::channel(4);
    let mut request = tonic::Request::new(ReceiverStream::new(rx));
    request.set_timeout(Duration::from_millis(200));
    let mut inbound = raw.upload_and_notify(request).await.unwrap().into_inner();

    tx.send(UploadAndNotifyRequest {
        album: Some(Item::new("A", "X", 1.0).into()),
    })
    .await
    .unwrap();
    let first = inbound.message().await.unwrap().unwrap();
    assert_eq!(first.message, "A is uploaded");

    // The request stream stays open; the server gives up at the 200ms deadline.
    let error = tokio::time::timeout(Duration::from_secs(5), inbound.message())
        .await
        .expect("server ignored the call deadline")
        .unwrap_err();
    assert_eq!(error.code(), tonic::Code::DeadlineExceeded);

    assert_eq!(wait_for_idle(&service).await, 0);
    assert!(service.catalog().lookup("A").await.is_some());
    drop(tx);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_open_aggregate_ends_at_server_request_timeout() {
    let catalog = Catalog::open(MemoryBackend::with_items(vec![blue_train()]))
        .await
        .unwrap();
    let (addr, service) = start_service(
        AlbumServiceImpl::new(catalog).with_request_timeout(Duration::from_millis(200)),
    )
    .await;
    let mut raw = AlbumServiceClient::connect(format!("http://{addr}"))
        .await
        .unwrap();

    // No grpc-timeout from the caller, so the server's own bound applies.
    let (tx, rx) = mpsc::channel(4);
    tx.send(GetTotalAmountRequest {
        title: "Blue Train".to_string(),
    })
    .await
    .unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        raw.get_total_amount(ReceiverStream::new(rx)),
    )
    .await
    .expect("server ignored its request timeout");
    assert_eq!(result.unwrap_err().code(), tonic::Code::DeadlineExceeded);

    assert_eq!(wait_for_idle(&service).await, 0);
    drop(tx);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_times_out_against_silent_server() {
    init_tracing();

    // Accepts connections and never speaks HTTP/2 on them.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let timeout = Duration::from_millis(300);
    let config = ClientConfig::builder()
        .endpoint(format!("http://{addr}"))
        .timeout(timeout)
        .build();
    let channel = Endpoint::from_shared(config.endpoint.clone())
        .unwrap()
        .connect_lazy();
    let mut client = AlbumClient::new(channel, config);

    let error = client.get_album("Blue Train").await.unwrap_err();
    assert!(matches!(error, ClientError::Timeout(t) if t == timeout));
    assert!(error.is_retryable());

    let error = client
        .upload_and_notify(vec![Item::new("New", "X", 1.0)])
        .await
        .unwrap_err();
    assert!(matches!(error, ClientError::Timeout(_)));
    assert!(error.is_retryable());

    silent.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zero_upload_buffer_still_uploads() {
    let catalog = Catalog::open(MemoryBackend::new()).await.unwrap();
    let (addr, service) = start_test_server(catalog).await;

    let config = ClientConfig::builder()
        .endpoint(format!("http://{addr}"))
        .timeout(Duration::from_secs(5))
        .upload_buffer(0)
        .build();
    let mut client = AlbumClient::connect(config).await.unwrap();

    let notifications = client
        .upload_and_notify(vec![
            Item::new("One", "X", 1.0),
            Item::new("Two", "X", 2.0),
            Item::new("Three", "X", 3.0),
        ])
        .await
        .unwrap();

    assert_eq!(notifications.len(), 3);
    assert!(
        notifications
            .iter()
            .all(|n| n.status == UploadStatus::Uploaded)
    );
    assert_eq!(service.catalog().len().await, 3);
}

#[tokio::test]
async fn test_connect_failure_is_typed() {
    init_tracing();

    // Bind then drop to get a port nothing is listening on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig::builder()
        .endpoint(format!("http://{addr}"))
        .timeout(Duration::from_secs(2))
        .build();

    let error = AlbumClient::connect(config).await.unwrap_err();
    assert!(matches!(error, ClientError::Connect { .. }));
    assert!(error.is_retryable());
}
