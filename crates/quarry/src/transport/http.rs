//! # HTTP Transport
//!
//! Repository access over HTTP(S): checksum-cache short-circuit via `.sha1`
//! side-files, conditional GET revalidation with `If-Modified-Since`, and
//! transfer-event emission around uploads. Open connections are tracked so
//! a new request force-closes anything a prior caller abandoned.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use humansize::{DECIMAL, format_size};
use reqwest::header::{CONTENT_LENGTH, HeaderMap, IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::{Client, RequestBuilder, StatusCode};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactIdentity, Location};
use crate::client::create_client;
use crate::config::{PasswordCredentials, TransportConfig};
use crate::error::TransportError;
use crate::events::{ListenerSet, RequestType, TransferDescription};
use crate::resource::{ExternalResource, LiveResource, OpenResourceSet, ResourceBody};
use crate::store::{ArtifactStore, CachedArtifact, CachedArtifactCandidates};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Repository transport over HTTP(S).
///
/// Holds one connection pool per transport; every fetch first aborts any
/// resource a previous caller left open on this transport.
pub struct HttpTransport {
    name: String,
    client: Client,
    store: Arc<ArtifactStore>,
    credentials: Option<PasswordCredentials>,
    open_resources: OpenResourceSet,
    listeners: ListenerSet,
}

impl HttpTransport {
    pub fn new(
        name: impl Into<String>,
        config: TransportConfig,
        store: Arc<ArtifactStore>,
    ) -> Result<Self, TransportError> {
        let client = create_client(&config)?;
        Ok(Self {
            name: name.into(),
            client,
            store,
            credentials: config.credentials,
            open_resources: OpenResourceSet::new(),
            listeners: ListenerSet::new(),
        })
    }

    fn apply_credentials(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(PasswordCredentials { username, password }) => {
                request.basic_auth(username, password.as_deref())
            }
            None => request,
        }
    }

    /// Metadata-only probe. Never consults the cache store and never carries
    /// a body.
    async fn head(&self, location: &Location) -> Result<ExternalResource, TransportError> {
        let url = location.as_url()?;
        let response = self.apply_credentials(self.client.head(url)).send().await?;
        let status = response.status();

        if was_missing(status) {
            return Ok(ExternalResource::Missing {
                location: location.clone(),
            });
        }
        if !status.is_success() {
            return Err(TransportError::status("HEAD", location.as_str(), status));
        }

        let headers = response.headers();
        Ok(ExternalResource::Live(LiveResource::new(
            location.clone(),
            content_length_of(headers),
            last_modified_of(headers),
            false,
            None,
        )))
    }

    /// Download-intent fetch: try the checksum short-circuit first, then fall
    /// back to a conditional GET revalidated against any prior download of
    /// this exact location.
    async fn init_get(
        &self,
        location: &Location,
        identity: Option<&ArtifactIdentity>,
    ) -> Result<ExternalResource, TransportError> {
        if let Some(identity) = identity {
            let candidates = self.store.find_candidates(identity);
            if !candidates.is_empty() {
                if let Some(cached) = self.match_by_checksum(location, &candidates).await {
                    return Ok(ExternalResource::Cached(cached));
                }
            }
        }

        let prior = self.store.find_by_location(location);
        self.conditional_get(location, prior).await
    }

    /// Fetch the `.sha1` side-file and look for a content-equivalent cached
    /// copy. Any side-file failure means "no match"; the caller falls back to
    /// a full fetch.
    async fn match_by_checksum(
        &self,
        location: &Location,
        candidates: &CachedArtifactCandidates,
    ) -> Option<crate::resource::CachedResource> {
        let checksum_location = location.checksum_location();
        let text = self.fetch_checksum_text(&checksum_location).await?;

        match match_candidate(candidates, &text) {
            Some(artifact) => {
                info!(location = %location, file = ?artifact.file, "Checksum matched a cached copy, skipping download");
                Some(crate::resource::CachedResource {
                    location: location.clone(),
                    artifact,
                })
            }
            None => {
                debug!(location = %location, "Checksum did not match any cached copy");
                None
            }
        }
    }

    async fn fetch_checksum_text(&self, checksum_location: &Location) -> Option<String> {
        let url = match checksum_location.as_url() {
            Ok(url) => url,
            Err(_) => {
                warn!(location = %checksum_location, "Invalid checksum location");
                return None;
            }
        };

        let response = match self.apply_credentials(self.client.get(url)).send().await {
            Ok(response) => response,
            Err(error) => {
                warn!(location = %checksum_location, "Checksum could not be fetched: {error}");
                return None;
            }
        };

        let status = response.status();
        if was_missing(status) {
            debug!(location = %checksum_location, "No checksum side-file published");
            return None;
        }
        if !status.is_success() {
            info!(location = %checksum_location, %status, "Request for checksum failed");
            return None;
        }
        response.text().await.ok()
    }

    /// GET with `If-Modified-Since` revalidation when a prior download of
    /// this location is on record.
    async fn conditional_get(
        &self,
        location: &Location,
        prior: Option<CachedArtifact>,
    ) -> Result<ExternalResource, TransportError> {
        let url = location.as_url()?;
        let mut request = self.apply_credentials(self.client.get(url));
        if let Some(last_modified) = prior.as_ref().and_then(|p| p.last_modified) {
            debug!(location = %location, "Adding If-Modified-Since for revalidation");
            request = request.header(IF_MODIFIED_SINCE, http_date(last_modified));
        }

        let response = request.send().await?;
        let status = response.status();

        if was_missing(status) {
            debug!(location = %location, "Resource missing");
            return Ok(ExternalResource::Missing {
                location: location.clone(),
            });
        }
        if let Some(prior) = prior {
            if was_unmodified(status) {
                info!(location = %location, "Resource unmodified since last download, reusing cached copy");
                return Ok(ExternalResource::Cached(crate::resource::CachedResource {
                    location: location.clone(),
                    artifact: prior,
                }));
            }
        }
        if !status.is_success() {
            return Err(TransportError::status("GET", location.as_str(), status));
        }

        let headers = response.headers();
        let content_length = content_length_of(headers);
        let last_modified = last_modified_of(headers);
        info!(
            location = %location,
            size = %content_length.map_or_else(|| "unknown".to_string(), |len| format_size(len, DECIMAL)),
            "Resource found, starting transfer"
        );

        let body = ResourceBody::Remote(Box::pin(response.bytes_stream()));
        let live = LiveResource::new(location.clone(), content_length, last_modified, false, Some(body));
        Ok(ExternalResource::Live(self.open_resources.track(live)))
    }
}

#[async_trait]
impl super::RepositoryTransport for HttpTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        location: &Location,
        identity: Option<&ArtifactIdentity>,
        for_download: bool,
    ) -> Result<ExternalResource, TransportError> {
        self.open_resources.abort_open_resources();
        if for_download {
            self.init_get(location, identity).await
        } else {
            self.head(location).await
        }
    }

    async fn put(&self, source: &Path, destination: &Location) -> Result<(), TransportError> {
        let metadata = tokio::fs::metadata(source).await?;
        let total = metadata.len();
        let description = TransferDescription {
            name: destination.file_name().to_string(),
            request_type: RequestType::Upload,
            total: Some(total),
            local: false,
        };
        self.listeners.notify_started(&description);

        match self.put_inner(source, destination, total).await {
            Ok(()) => {
                self.listeners.notify_completed();
                Ok(())
            }
            Err(error) => {
                self.listeners.notify_failed(&error);
                Err(error)
            }
        }
    }

    async fn list(&self, _parent: &Location) -> Result<Option<Vec<Location>>, TransportError> {
        // Directory listings are not part of the HTTP repository contract
        Ok(None)
    }

    fn listeners(&self) -> &ListenerSet {
        &self.listeners
    }
}

impl HttpTransport {
    async fn put_inner(
        &self,
        source: &Path,
        destination: &Location,
        total: u64,
    ) -> Result<(), TransportError> {
        let url = destination.as_url()?;
        let file = tokio::fs::File::open(source).await?;

        // Stream the file; the whole artifact is never buffered in memory
        let listeners = self.listeners.clone();
        let mut sent = 0u64;
        let chunks = ReaderStream::with_capacity(file, UPLOAD_CHUNK_SIZE).map(move |chunk| {
            if let Ok(chunk) = &chunk {
                sent += chunk.len() as u64;
                listeners.notify_progress(sent, Some(total));
            }
            chunk
        });

        let response = self
            .apply_credentials(self.client.put(url))
            .header(CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(chunks))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::status("PUT", destination.as_str(), status));
        }
        debug!(destination = %destination, size = %format_size(total, DECIMAL), "Upload finished");
        Ok(())
    }
}

/// 404 means the artifact does not exist at this repository, a routine
/// outcome during chain traversal.
fn was_missing(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND
}

fn was_unmodified(status: StatusCode) -> bool {
    status == StatusCode::NOT_MODIFIED
}

fn content_length_of(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn last_modified_of(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    parse_http_date(headers.get(LAST_MODIFIED)?.to_str().ok()?)
}

/// Format a timestamp as an HTTP-date (IMF-fixdate)
pub(crate) fn http_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP-date header value; RFC 2822 parsing covers the fixdate form
pub(crate) fn parse_http_date(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(text)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Match a checksum side-file body against cached candidates.
///
/// An unparsable side-file never matches; the download proceeds as if no
/// checksum were published.
pub(crate) fn match_candidate(
    candidates: &CachedArtifactCandidates,
    side_file_text: &str,
) -> Option<CachedArtifact> {
    let hash = crate::checksum::HashValue::parse(side_file_text)?;
    candidates.find_by_hash(&hash).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::HashValue;
    use crate::events::{TransferDescription, TransferListener};
    use crate::store::StoreConfig;
    use crate::transport::RepositoryTransport;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    /// Serves one canned response per accepted connection and reports each
    /// raw request it received.
    async fn canned_server(responses: Vec<String>) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                while !request_complete(&request) {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = tx.send(String::from_utf8_lossy(&request).into_owned());
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (addr, rx)
    }

    /// Headers received in full, plus any Content-Length worth of body
    fn request_complete(request: &[u8]) -> bool {
        let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let headers = String::from_utf8_lossy(&request[..pos]);
        let body_len = headers
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        request.len() >= pos + 4 + body_len
    }

    fn response(status_line: &str, extra_headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n{extra_headers}\r\n{body}",
            body.len()
        )
    }

    async fn transport_at(dir: &Path) -> (HttpTransport, Arc<ArtifactStore>) {
        let store = Arc::new(
            ArtifactStore::open(StoreConfig {
                root: dir.join("store"),
            })
            .await
            .unwrap(),
        );
        let transport =
            HttpTransport::new("remote", TransportConfig::default(), store.clone()).unwrap();
        (transport, store)
    }

    fn identity() -> ArtifactIdentity {
        ArtifactIdentity::new("org.example", "widget", "1.2.3")
    }

    fn candidate(content: &[u8]) -> CachedArtifact {
        CachedArtifact {
            location: Location::new("https://repo.example.com/widget-1.2.3.jar"),
            identity_key: "org.example:widget:1.2.3".to_string(),
            file: PathBuf::from("/store/widget-1.2.3.jar"),
            hash: HashValue::sha1_of(content),
            last_modified: None,
            cached_at: Utc::now(),
        }
    }

    #[test]
    fn checksum_match_finds_content_equivalent_candidate() {
        let candidates =
            CachedArtifactCandidates::new(vec![candidate(b"other"), candidate(b"wanted")]);
        let side_file = HashValue::sha1_of(b"wanted").to_hex();

        let matched = match_candidate(&candidates, &side_file).unwrap();
        assert_eq!(matched.hash, HashValue::sha1_of(b"wanted"));
    }

    #[test]
    fn checksum_match_accepts_sha1sum_output() {
        let candidates = CachedArtifactCandidates::new(vec![candidate(b"wanted")]);
        let side_file = format!("{}  widget-1.2.3.jar\n", HashValue::sha1_of(b"wanted").to_hex());
        assert!(match_candidate(&candidates, &side_file).is_some());
    }

    #[test]
    fn unparsable_side_file_never_matches() {
        let candidates = CachedArtifactCandidates::new(vec![candidate(b"wanted")]);
        assert!(match_candidate(&candidates, "<html>not found</html>").is_none());
        assert!(match_candidate(&candidates, "").is_none());
    }

    #[test]
    fn status_classification() {
        assert!(was_missing(StatusCode::NOT_FOUND));
        assert!(!was_missing(StatusCode::OK));
        assert!(was_unmodified(StatusCode::NOT_MODIFIED));
        assert!(!was_unmodified(StatusCode::OK));
    }

    #[test]
    fn http_date_round_trips() {
        let timestamp = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        let formatted = http_date(timestamp);
        assert_eq!(formatted, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date(&formatted), Some(timestamp));
    }

    #[test]
    fn non_date_header_is_ignored() {
        assert!(parse_http_date("not a date").is_none());
    }

    #[tokio::test]
    async fn fetch_maps_success_to_a_live_resource() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, _store) = transport_at(dir.path()).await;
        let (addr, _requests) = canned_server(vec![response(
            "200 OK",
            "Last-Modified: Sun, 06 Nov 1994 08:49:37 GMT\r\n",
            "artifact-bytes",
        )])
        .await;

        let location = Location::new(format!("http://{addr}/widget-1.2.3.jar"));
        let resource = transport
            .fetch(&location, Some(&identity()), true)
            .await
            .unwrap();

        let ExternalResource::Live(live) = resource else {
            panic!("expected live resource");
        };
        assert_eq!(live.content_length(), Some(14));
        assert_eq!(
            live.last_modified(),
            Some(Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap())
        );

        let dest = dir.path().join("widget.jar");
        assert_eq!(live.copy_to(&dest, |_| {}).await.unwrap(), 14);
        assert_eq!(std::fs::read(&dest).unwrap(), b"artifact-bytes");
    }

    #[tokio::test]
    async fn missing_resource_in_probe_and_download_modes() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, _store) = transport_at(dir.path()).await;
        let (addr, _requests) = canned_server(vec![
            response("404 Not Found", "", ""),
            response("404 Not Found", "", ""),
        ])
        .await;

        let location = Location::new(format!("http://{addr}/widget-1.2.3.jar"));
        let download = transport.fetch(&location, None, true).await.unwrap();
        assert!(download.is_missing());

        let probe = transport.fetch(&location, None, false).await.unwrap();
        assert!(probe.is_missing());
    }

    #[tokio::test]
    async fn unmodified_resource_reuses_the_prior_record() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, store) = transport_at(dir.path()).await;
        let (addr, mut requests) =
            canned_server(vec![response("304 Not Modified", "", "")]).await;

        let location = Location::new(format!("http://{addr}/widget-1.2.3.jar"));
        let staged = dir.path().join("staged.jar");
        tokio::fs::write(&staged, b"known-bytes").await.unwrap();
        let hash = HashValue::sha1_of(b"known-bytes");
        let modified = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        store
            .store(&identity(), &location, &staged, hash.clone(), Some(modified))
            .await
            .unwrap();

        let resource = transport.fetch(&location, None, true).await.unwrap();
        let ExternalResource::Cached(cached) = resource else {
            panic!("expected cached resource");
        };
        assert_eq!(cached.artifact.hash, hash);
        // Still exactly the record written above; revalidation stores nothing
        assert_eq!(store.find_candidates(&identity()).len(), 1);

        let request = requests.recv().await.unwrap();
        assert!(request.contains("If-Modified-Since: Sun, 06 Nov 1994 08:49:37 GMT"));
    }

    #[tokio::test]
    async fn unmodified_without_a_prior_record_is_a_status_error() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, _store) = transport_at(dir.path()).await;
        let (addr, _requests) =
            canned_server(vec![response("304 Not Modified", "", "")]).await;

        let location = Location::new(format!("http://{addr}/widget-1.2.3.jar"));
        let err = transport.fetch(&location, None, true).await.unwrap_err();
        match err {
            TransportError::Status { status, .. } => {
                assert_eq!(status, StatusCode::NOT_MODIFIED);
            }
            other => panic!("expected status error, got {other}"),
        }
    }

    #[tokio::test]
    async fn server_errors_carry_method_and_location() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, _store) = transport_at(dir.path()).await;
        let (addr, _requests) = canned_server(vec![
            response("500 Internal Server Error", "", ""),
            response("500 Internal Server Error", "", ""),
        ])
        .await;

        let location = Location::new(format!("http://{addr}/widget-1.2.3.jar"));

        let err = transport.fetch(&location, None, true).await.unwrap_err();
        match err {
            TransportError::Status {
                method,
                location: failed_at,
                status,
                ..
            } => {
                assert_eq!(method, "GET");
                assert_eq!(failed_at, location.as_str());
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            }
            other => panic!("expected status error, got {other}"),
        }

        let err = transport.fetch(&location, None, false).await.unwrap_err();
        assert!(matches!(err, TransportError::Status { method: "HEAD", .. }));
    }

    #[tokio::test]
    async fn checksum_side_file_short_circuits_the_download() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, store) = transport_at(dir.path()).await;

        // A copy of the same identity cached from a different location
        let staged = dir.path().join("mirrored.jar");
        tokio::fs::write(&staged, b"mirrored-bytes").await.unwrap();
        let hash = HashValue::sha1_of(b"mirrored-bytes");
        let stored = store
            .store(
                &identity(),
                &Location::new("https://mirror.example.com/widget-1.2.3.jar"),
                &staged,
                hash.clone(),
                None,
            )
            .await
            .unwrap();

        // The server only ever answers the side-file request
        let (addr, mut requests) =
            canned_server(vec![response("200 OK", "", &hash.to_hex())]).await;

        let location = Location::new(format!("http://{addr}/widget-1.2.3.jar"));
        let resource = transport
            .fetch(&location, Some(&identity()), true)
            .await
            .unwrap();

        let ExternalResource::Cached(cached) = resource else {
            panic!("expected cached resource");
        };
        assert_eq!(cached.artifact.file, stored.file);
        assert_eq!(cached.location, location);

        let request = requests.recv().await.unwrap();
        assert!(request.starts_with("GET /widget-1.2.3.jar.sha1"));
    }

    #[derive(Default)]
    struct RecordingListener {
        progress: Mutex<Vec<u64>>,
        completed: AtomicBool,
    }

    impl TransferListener for RecordingListener {
        fn started(&self, _description: &TransferDescription) {}
        fn progress(&self, bytes_so_far: u64, _total: Option<u64>) {
            self.progress.lock().push(bytes_so_far);
        }
        fn completed(&self) {
            self.completed.store(true, Ordering::SeqCst);
        }
        fn failed(&self, _error: &TransportError) {}
    }

    #[tokio::test]
    async fn put_streams_the_file_and_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, _store) = transport_at(dir.path()).await;
        let (addr, mut requests) = canned_server(vec![response("201 Created", "", "")]).await;

        let listener = Arc::new(RecordingListener::default());
        transport.add_transfer_listener(listener.clone());

        let source = dir.path().join("source.jar");
        tokio::fs::write(&source, b"streamed-artifact-bytes").await.unwrap();

        let destination = Location::new(format!("http://{addr}/widget-1.2.3.jar"));
        transport.put(&source, &destination).await.unwrap();

        let request = requests.recv().await.unwrap();
        assert!(request.contains("streamed-artifact-bytes"));
        assert!(
            request
                .to_ascii_lowercase()
                .contains("content-length: 23")
        );

        assert_eq!(listener.progress.lock().last().copied(), Some(23));
        assert!(listener.completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn rejected_upload_is_a_status_error() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, _store) = transport_at(dir.path()).await;
        let (addr, _requests) = canned_server(vec![response("403 Forbidden", "", "")]).await;

        let source = dir.path().join("source.jar");
        tokio::fs::write(&source, b"rejected").await.unwrap();

        let destination = Location::new(format!("http://{addr}/widget-1.2.3.jar"));
        let err = transport.put(&source, &destination).await.unwrap_err();
        match err {
            TransportError::Status { method, status, .. } => {
                assert_eq!(method, "PUT");
                assert_eq!(status, StatusCode::FORBIDDEN);
            }
            other => panic!("expected status error, got {other}"),
        }
    }
}
