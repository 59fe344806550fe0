//! Default [`TransportEngine`] backed by `reqwest`.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, LOCATION, WWW_AUTHENTICATE};
use reqwest::{redirect, Body, Client, Url};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::{
    RawResponse, SessionKind, TaskEvents, TransportEngine, TransportError, TransportErrorKind,
    TransportRequest,
};
use crate::auth::{AuthChallenge, ChallengeDisposition, TransportCredential};
use crate::request::{HttpMethod, TransferKind, UploadSource};

const MAX_REDIRECTS: usize = 10;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Executes transport requests with one `reqwest::Client` per session.
///
/// Redirects are followed by the engine itself so every intermediate
/// response can be reported to the task's events.
pub struct ReqwestEngine {
    clients: RwLock<HashMap<SessionKind, Client>>,
    timeout: Duration,
    download_dir: PathBuf,
}

impl Default for ReqwestEngine {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, std::env::temp_dir())
    }
}

impl ReqwestEngine {
    /// `timeout` applies to standard and ephemeral requests; background
    /// transfers are only bounded by cancellation.
    pub fn new(timeout: Duration, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            timeout,
            download_dir: download_dir.into(),
        }
    }

    fn client(&self, kind: SessionKind) -> Result<Client, TransportError> {
        if let Some(client) = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
        {
            return Ok(client.clone());
        }
        let client = build_client(kind, self.timeout)?;
        Ok(self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_insert(client)
            .clone())
    }

    fn download_path(&self, request: &TransportRequest) -> PathBuf {
        match &request.transfer {
            TransferKind::Download {
                destination: Some(path),
            } => path.clone(),
            _ => self
                .download_dir
                .join(format!("courier-{}.download", uuid::Uuid::new_v4())),
        }
    }
}

fn build_client(kind: SessionKind, timeout: Duration) -> Result<Client, TransportError> {
    let mut builder = Client::builder().redirect(redirect::Policy::none());
    builder = match kind {
        SessionKind::Standard => builder.timeout(timeout).pool_max_idle_per_host(10),
        SessionKind::Ephemeral => builder.timeout(timeout).pool_max_idle_per_host(0),
        SessionKind::Background => builder.connect_timeout(timeout),
    };
    builder
        .build()
        .map_err(|err| TransportError::new(TransportErrorKind::Other, err.to_string()))
}

#[async_trait]
impl TransportEngine for ReqwestEngine {
    async fn perform(
        &self,
        request: TransportRequest,
        events: &TaskEvents,
    ) -> Result<RawResponse, TransportError> {
        let client = self.client(request.session)?;
        let mut method = request.method;
        let mut url = request.url.clone();
        let mut payload = match &request.transfer {
            TransferKind::Upload(source) => Payload::Upload(source.clone()),
            _ if request.body.is_empty() => Payload::Empty,
            _ => Payload::Buffered(request.body.clone()),
        };
        let mut challenge_credential: Option<TransportCredential> = None;
        let mut challenge_failures = 0u32;
        let mut redirects = 0usize;

        loop {
            let mut builder = client.request(method.into(), url.clone());
            for (name, value) in &request.headers {
                if challenge_credential.is_some() && name == "authorization" {
                    continue;
                }
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(credential) = &challenge_credential {
                builder = builder.basic_auth(&credential.username, Some(&credential.password));
            }
            if let Some(body) = payload.body(events).await? {
                builder = builder.body(body);
            }
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = flatten_headers(response.headers());

            if response.status().is_redirection() && redirects < MAX_REDIRECTS {
                if let Some(next) = redirect_target(&url, response.headers()) {
                    events.redirect(RawResponse {
                        url: url.clone(),
                        status,
                        headers,
                        body: Vec::new(),
                        file: None,
                    });
                    if status == 303 || (matches!(status, 301 | 302) && method == HttpMethod::Post) {
                        method = HttpMethod::Get;
                        payload = Payload::Empty;
                    }
                    url = next;
                    redirects += 1;
                    continue;
                }
            }

            if status == 401 {
                if let Some(header) = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|value| value.to_str().ok())
                {
                    let challenge = AuthChallenge::from_header(
                        url.host_str().unwrap_or_default(),
                        header,
                        challenge_failures,
                    );
                    if let ChallengeDisposition::UseCredential(credential) =
                        events.challenge(&challenge)
                    {
                        challenge_credential = Some(credential);
                        challenge_failures += 1;
                        continue;
                    }
                }
            }

            let total = response.content_length();
            let final_url = response.url().clone();
            let mut stream = response.bytes_stream();
            let mut received = 0u64;

            if matches!(request.transfer, TransferKind::Download { .. }) {
                let path = self.download_path(&request);
                let mut file = tokio::fs::File::create(&path).await?;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    file.write_all(&chunk).await?;
                    received += chunk.len() as u64;
                    events.progress(received, total);
                }
                file.flush().await?;
                return Ok(RawResponse {
                    url: final_url,
                    status,
                    headers,
                    body: Vec::new(),
                    file: Some(path),
                });
            }

            let mut collected = Vec::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                collected.extend_from_slice(&chunk);
                received += chunk.len() as u64;
                if !payload.is_upload() {
                    events.progress(received, total);
                }
            }
            return Ok(RawResponse {
                url: final_url,
                status,
                headers,
                body: collected,
                file: None,
            });
        }
    }

    fn reset_session(&self, kind: SessionKind) {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind);
    }
}

/// The request body, rebuilt for every attempt of a redirect or challenge.
enum Payload {
    Empty,
    Buffered(Vec<u8>),
    Upload(UploadSource),
}

impl Payload {
    fn is_upload(&self) -> bool {
        matches!(self, Payload::Upload(_))
    }

    /// Uploads stream from their source and report progress per chunk as
    /// the client consumes it.
    async fn body(&self, events: &TaskEvents) -> Result<Option<Body>, TransportError> {
        match self {
            Payload::Empty => Ok(None),
            Payload::Buffered(bytes) => Ok(Some(Body::from(bytes.clone()))),
            Payload::Upload(UploadSource::Data(data)) => {
                let total = data.len() as u64;
                let reader = std::io::Cursor::new(data.clone());
                Ok(Some(progress_body(ReaderStream::new(reader), total, events.clone())))
            }
            Payload::Upload(UploadSource::File(path)) => {
                let file = tokio::fs::File::open(path).await?;
                let total = file.metadata().await?.len();
                Ok(Some(progress_body(ReaderStream::new(file), total, events.clone())))
            }
        }
    }
}

fn progress_body<R>(stream: ReaderStream<R>, total: u64, events: TaskEvents) -> Body
where
    R: tokio::io::AsyncRead + Send + Sync + 'static,
{
    let mut sent = 0u64;
    Body::wrap_stream(stream.map(move |chunk| {
        if let Ok(bytes) = &chunk {
            sent += bytes.len() as u64;
            events.progress(sent, Some(total));
        }
        chunk
    }))
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        flat.entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    flat
}

fn redirect_target(current: &Url, headers: &HeaderMap) -> Option<Url> {
    let location = headers.get(LOCATION)?.to_str().ok()?;
    current.join(location).ok()
}
