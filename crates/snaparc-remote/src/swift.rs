//! OpenStack Swift backend.
//!
//! Authentication is either pre-issued (storage URL plus token) or v1
//! (`X-Auth-User`/`X-Auth-Key` against an auth URL), resolved once per store.
//! Files up to one segment go up in a single PUT. Larger files are split into
//! `<container>_segments/<object>/<index>` segments and joined with a static
//! large object manifest; the manifest PUT succeeding is the acknowledgement.
//! A file needing more than `max_segments` segments is refused before any
//! request is made.

use std::collections::{HashSet, VecDeque};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::header::{CONTENT_LENGTH, ETAG};
use reqwest::{Body, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use snaparc_core::{ArchiveEvent, EventSink, NullSink};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;

use crate::error::{RemoteError, RemoteResult};
use crate::store::{
    object_name, plan_segments, BoxFuture, RemoteStore, UploadEvent, UploadStream,
    DEFAULT_MAX_SEGMENTS,
};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Connection settings for a Swift cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwiftConfig {
    /// Pre-authenticated storage URL (`OS_STORAGE_URL`).
    pub storage_url: Option<String>,
    /// Pre-issued token (`OS_AUTH_TOKEN`).
    pub auth_token: Option<String>,
    /// v1 auth endpoint (`ST_AUTH`).
    pub auth_url: Option<String>,
    /// v1 user (`ST_USER`).
    pub user: Option<String>,
    /// v1 key (`ST_KEY`).
    pub key: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Most segments one object may have; larger files are refused up front.
    pub max_segments: usize,
}

impl Default for SwiftConfig {
    fn default() -> Self {
        Self {
            storage_url: None,
            auth_token: None,
            auth_url: None,
            user: None,
            key: None,
            request_timeout_secs: 300,
            max_segments: DEFAULT_MAX_SEGMENTS,
        }
    }
}

impl SwiftConfig {
    /// Fills unset fields from the usual OpenStack environment variables.
    pub fn with_env_fallback(self) -> Self {
        self.with_lookup(|name| std::env::var(name).ok())
    }

    /// Fills unset fields through `lookup`, keyed by environment variable name.
    pub fn with_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let fill = |field: &mut Option<String>, name: &str| {
            if field.is_none() {
                *field = lookup(name).filter(|v| !v.is_empty());
            }
        };
        fill(&mut self.storage_url, "OS_STORAGE_URL");
        fill(&mut self.auth_token, "OS_AUTH_TOKEN");
        fill(&mut self.auth_url, "ST_AUTH");
        fill(&mut self.user, "ST_USER");
        fill(&mut self.key, "ST_KEY");
        self
    }
}

#[derive(Debug, Clone)]
struct Session {
    storage_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct ManifestEntry {
    path: String,
    etag: Option<String>,
    size_bytes: u64,
}

fn encode_name(name: &str) -> String {
    name.split('/')
        .map(|part| urlencoding::encode(part).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn container_url(storage_url: &str, container: &str) -> String {
    format!(
        "{}/{}",
        storage_url.trim_end_matches('/'),
        urlencoding::encode(container)
    )
}

fn object_url(storage_url: &str, container: &str, object: &str) -> String {
    format!("{}/{}", container_url(storage_url, container), encode_name(object))
}

fn segment_container(container: &str) -> String {
    format!("{}_segments", container)
}

fn segment_name(object: &str, index: usize) -> String {
    format!("{}/{:08}", object, index)
}

fn check_status(response: &Response, url: &str) -> RemoteResult<()> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(RemoteError::Http {
            url: url.to_string(),
            status: response.status().as_u16(),
        })
    }
}

/// Object store backed by OpenStack Swift.
pub struct SwiftStore {
    client: Client,
    config: SwiftConfig,
    session: OnceCell<Session>,
    sink: Arc<dyn EventSink>,
}

impl SwiftStore {
    /// Creates a store; authentication happens on first use.
    pub fn new(config: SwiftConfig) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            session: OnceCell::new(),
            sink: Arc::new(NullSink),
        })
    }

    /// Reports session and upload planning events to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    async fn session(&self) -> RemoteResult<&Session> {
        self.session.get_or_try_init(|| self.authenticate()).await
    }

    async fn authenticate(&self) -> RemoteResult<Session> {
        let config = &self.config;
        if let (Some(storage_url), Some(token)) = (&config.storage_url, &config.auth_token) {
            self.sink.emit(ArchiveEvent::SessionEstablished {
                storage_url: storage_url.clone(),
            });
            return Ok(Session {
                storage_url: storage_url.clone(),
                token: token.clone(),
            });
        }

        let (auth_url, user, key) = match (&config.auth_url, &config.user, &config.key) {
            (Some(auth_url), Some(user), Some(key)) => (auth_url, user, key),
            _ => {
                return Err(RemoteError::Auth {
                    msg: "need a storage URL and token, or an auth URL, user and key".to_string(),
                })
            }
        };

        let response = self
            .client
            .get(auth_url)
            .header("X-Auth-User", user)
            .header("X-Auth-Key", key)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RemoteError::Auth {
                msg: format!("HTTP {} from {}", response.status(), auth_url),
            });
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let storage_url = header("X-Storage-Url")
            .or_else(|| config.storage_url.clone())
            .ok_or_else(|| RemoteError::Auth {
                msg: "auth response has no X-Storage-Url".to_string(),
            })?;
        let token = header(AUTH_TOKEN_HEADER).ok_or_else(|| RemoteError::Auth {
            msg: "auth response has no X-Auth-Token".to_string(),
        })?;

        self.sink.emit(ArchiveEvent::SessionEstablished {
            storage_url: storage_url.clone(),
        });
        Ok(Session { storage_url, token })
    }

    async fn head_container(&self, container: &str) -> RemoteResult<bool> {
        let session = self.session().await?;
        let url = container_url(&session.storage_url, container);
        let response = self
            .client
            .head(&url)
            .header(AUTH_TOKEN_HEADER, &session.token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(&response, &url)?;
        Ok(true)
    }

    async fn list_names(&self, container: &str, prefix: &str) -> RemoteResult<HashSet<String>> {
        let session = self.session().await?;
        let url = container_url(&session.storage_url, container);
        let mut names = HashSet::new();
        let mut marker: Option<String> = None;

        loop {
            let mut query = vec![("format", "json".to_string()), ("prefix", prefix.to_string())];
            if let Some(marker) = &marker {
                query.push(("marker", marker.clone()));
            }
            let response = self
                .client
                .get(&url)
                .header(AUTH_TOKEN_HEADER, &session.token)
                .query(&query)
                .send()
                .await?;
            match response.status() {
                StatusCode::NOT_FOUND => {
                    return Err(RemoteError::ContainerNotFound {
                        container: container.to_string(),
                    })
                }
                StatusCode::NO_CONTENT => break,
                _ => check_status(&response, &url)?,
            }

            let body = response.bytes().await?;
            let page: Vec<ListEntry> =
                serde_json::from_slice(&body).map_err(|e| RemoteError::Malformed {
                    msg: e.to_string(),
                })?;
            let Some(last) = page.last() else {
                break;
            };
            marker = Some(last.name.clone());
            names.extend(page.into_iter().map(|entry| entry.name));
        }

        Ok(names)
    }

    async fn put_container(&self, session: &Session, container: &str) -> RemoteResult<()> {
        let url = container_url(&session.storage_url, container);
        let response = self
            .client
            .put(&url)
            .header(AUTH_TOKEN_HEADER, &session.token)
            .header(CONTENT_LENGTH, 0u64)
            .send()
            .await?;
        check_status(&response, &url)
    }

    /// PUTs `len` bytes of `path` starting at `offset` and returns the ETag.
    async fn put_range(
        &self,
        session: &Session,
        url: &str,
        path: &Path,
        offset: u64,
        len: u64,
    ) -> RemoteResult<Option<String>> {
        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let body = Body::wrap_stream(ReaderStream::new(file.take(len)));
        let response = self
            .client
            .put(url)
            .header(AUTH_TOKEN_HEADER, &session.token)
            .header(CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await?;
        check_status(&response, url)?;
        Ok(response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string()))
    }

    async fn put_manifest(
        &self,
        session: &Session,
        container: &str,
        object: &str,
        manifest: &[ManifestEntry],
    ) -> RemoteResult<()> {
        let url = object_url(&session.storage_url, container, object);
        let body = serde_json::to_vec(manifest).map_err(|e| RemoteError::Malformed {
            msg: e.to_string(),
        })?;
        let response = self
            .client
            .put(&url)
            .header(AUTH_TOKEN_HEADER, &session.token)
            .query(&[("multipart-manifest", "put")])
            .body(body)
            .send()
            .await?;
        check_status(&response, &url)
    }
}

struct SegmentPlan {
    session: Session,
    object: String,
    ranges: Vec<(u64, u64)>,
    next: usize,
    manifest: Vec<ManifestEntry>,
}

struct SwiftUpload<'a> {
    store: &'a SwiftStore,
    path: PathBuf,
    container: String,
    segment_size: u64,
    pending: VecDeque<UploadEvent>,
    plan: Option<SegmentPlan>,
    done: bool,
}

impl<'a> SwiftUpload<'a> {
    async fn step(&mut self) -> Option<RemoteResult<UploadEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.advance().await {
                self.done = true;
                return Some(Err(e));
            }
        }
    }

    async fn advance(&mut self) -> RemoteResult<()> {
        let store = self.store;
        let Some(plan) = self.plan.as_mut() else {
            return self.start().await;
        };

        if let Some(&(offset, len)) = plan.ranges.get(plan.next) {
            let seg_container = segment_container(&self.container);
            let seg_name = segment_name(&plan.object, plan.next);
            let url = object_url(&plan.session.storage_url, &seg_container, &seg_name);
            let etag = store
                .put_range(&plan.session, &url, &self.path, offset, len)
                .await?;
            plan.manifest.push(ManifestEntry {
                path: format!("/{}/{}", seg_container, seg_name),
                etag,
                size_bytes: len,
            });
            self.pending.push_back(UploadEvent::SegmentUploaded {
                index: plan.next,
                cumulative_bytes: offset + len,
            });
            plan.next += 1;
            return Ok(());
        }

        store
            .put_manifest(&plan.session, &self.container, &plan.object, &plan.manifest)
            .await?;
        let total_bytes = plan.manifest.iter().map(|e| e.size_bytes).sum();
        self.pending.push_back(UploadEvent::ObjectAssembled {
            object: plan.object.clone(),
            total_bytes,
        });
        self.done = true;
        Ok(())
    }

    async fn start(&mut self) -> RemoteResult<()> {
        let object = object_name(&self.path)?;
        let size = tokio::fs::metadata(&self.path).await?.len();
        let ranges = plan_segments(
            &self.path,
            size,
            self.segment_size,
            self.store.config.max_segments,
        )?;
        let session = self.store.session().await?.clone();
        self.store.sink.emit(ArchiveEvent::UploadPlanned {
            object: object.clone(),
            bytes: size,
            segments: ranges.len(),
        });

        if ranges.len() == 1 {
            let url = object_url(&session.storage_url, &self.container, &object);
            self.store
                .put_range(&session, &url, &self.path, 0, size)
                .await?;
            self.pending.push_back(UploadEvent::SegmentUploaded {
                index: 0,
                cumulative_bytes: size,
            });
            self.pending.push_back(UploadEvent::ObjectAssembled {
                object,
                total_bytes: size,
            });
            self.done = true;
            return Ok(());
        }

        self.store
            .put_container(&session, &segment_container(&self.container))
            .await?;
        self.plan = Some(SegmentPlan {
            session,
            object,
            ranges,
            next: 0,
            manifest: Vec::new(),
        });
        Ok(())
    }
}

impl RemoteStore for SwiftStore {
    fn container_exists(&self, container: &str) -> BoxFuture<'_, RemoteResult<bool>> {
        let container = container.to_string();
        Box::pin(async move { self.head_container(&container).await })
    }

    fn list(&self, container: &str, prefix: &str) -> BoxFuture<'_, RemoteResult<HashSet<String>>> {
        let container = container.to_string();
        let prefix = prefix.to_string();
        Box::pin(async move { self.list_names(&container, &prefix).await })
    }

    fn upload(&self, path: &Path, container: &str, segment_size: u64) -> UploadStream<'_> {
        let upload = SwiftUpload {
            store: self,
            path: path.to_path_buf(),
            container: container.to_string(),
            segment_size: segment_size.max(1),
            pending: VecDeque::new(),
            plan: None,
            done: false,
        };
        stream::unfold(upload, |mut upload| async move {
            let item = upload.step().await?;
            Some((item, upload))
        })
        .boxed()
    }
}
