//! A client for one registry endpoint, speaking the OCI/Docker distribution v2 protocol.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use getset::Getters;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;

use crate::model::{Digest, RegistryEndpoint};

use super::auth::{fetch_bearer_token, parse_bearer_challenge};
use super::rate_limit::RateGate;
use crate::model::manifest::MANIFEST_ACCEPT_MEDIA_TYPES;
use crate::model::Manifest;
use crate::{ReplicoreError, ReplicoreResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The outcome of [`RegistryClient::mount_blob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// The registry mounted the blob server-side; no bytes were transferred.
    Mounted,
    /// The registry returned a normal upload session instead; fall back to streaming.
    NotMounted,
}

/// A client for one [`RegistryEndpoint`], handling auth renewal and rate limiting
/// transparently. Safe to share across worker tasks for one endpoint.
#[derive(Getters)]
#[getset(get = "pub with_prefix")]
pub struct RegistryClient {
    endpoint: RegistryEndpoint,
    http: ClientWithMiddleware,
    rate_gate: RateGate,
}

#[derive(Debug, Deserialize)]
struct TagsListResponse {
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    repositories: Vec<String>,
}

impl RegistryClient {
    /// Builds a client for `endpoint`. The underlying transport retries transient
    /// transport-level failures (connect/timeout) up to 3 times; application-level
    /// retry is a separate, explicit layer above this client.
    pub fn new(endpoint: RegistryEndpoint) -> ReplicoreResult<Self> {
        let raw = reqwest::Client::builder()
            .danger_accept_invalid_certs(*endpoint.get_insecure_tls())
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let http = ClientBuilder::new(raw)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        let rate_gate = RateGate::new(*endpoint.get_qps());

        Ok(RegistryClient {
            endpoint,
            http,
            rate_gate,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.get_base_url().trim_end_matches('/'), path)
    }

    /// Sends one request, performing the Basic→challenge→Bearer dance transparently
    /// on a first 401. `build` must be cheap to call twice (no owned streaming body).
    async fn send_authenticated(
        &self,
        build: impl Fn(&ClientWithMiddleware) -> reqwest_middleware::RequestBuilder,
    ) -> ReplicoreResult<reqwest::Response> {
        let mut request = build(&self.http);
        if let Some(creds) = self.endpoint.get_credentials() {
            request = request.basic_auth(&creds.username, Some(&creds.secret));
        }

        let response = request.send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return crate::Ok(response);
        }

        let challenge = response
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ReplicoreError::InvalidAuthChallenge("missing WWW-Authenticate".to_string()))?;
        let challenge = parse_bearer_challenge(challenge)?;
        let token = fetch_bearer_token(&self.http, &challenge, self.endpoint.get_credentials().as_ref()).await?;

        let retried = build(&self.http).bearer_auth(&token).send().await?;
        crate::Ok(retried)
    }

    /// Probes `/v2/`. Both 200 and 401 mean the endpoint is reachable and speaks v2.
    pub async fn ping(&self) -> ReplicoreResult<()> {
        let url = self.url("/v2/");
        let response = self.http.get(&url).send().await?;
        match response.status() {
            StatusCode::OK | StatusCode::UNAUTHORIZED => crate::Ok(()),
            status => Err(ReplicoreError::UnexpectedStatus { status: status.as_u16(), operation: "ping".to_string() }),
        }
    }

    /// Lists every tag in `repo`. Paged transparently; returns an empty list for an
    /// empty (but existing) repository.
    pub async fn list_tags(&self, repo: &str) -> ReplicoreResult<Vec<String>> {
        self.rate_gate.acquire().await;
        let mut tags = Vec::new();
        let mut next_path = format!("/v2/{repo}/tags/list");

        loop {
            let url = if next_path.starts_with("http") { next_path.clone() } else { self.url(&next_path) };
            let response = self
                .send_authenticated(|c| c.get(&url))
                .await?;

            if response.status() == StatusCode::NOT_FOUND {
                return crate::Ok(Vec::new());
            }
            if !response.status().is_success() {
                return Err(ReplicoreError::UnexpectedStatus { status: response.status().as_u16(), operation: format!("list tags for {repo}") });
            }

            let link = response
                .headers()
                .get(reqwest::header::LINK)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let body: TagsListResponse = response.json().await?;
            tags.extend(body.tags);

            match link.and_then(|l| extract_link_path(&l)) {
                Some(path) => next_path = path,
                None => break,
            }
        }

        crate::Ok(tags)
    }

    /// Fetches a manifest by tag or digest, returning the parsed view alongside the
    /// exact raw bytes and the server's canonical content digest.
    pub async fn get_manifest(&self, repo: &str, reference: &str) -> ReplicoreResult<Manifest> {
        self.rate_gate.acquire().await;
        let url = self.url(&format!("/v2/{repo}/manifests/{reference}"));
        let accept = MANIFEST_ACCEPT_MEDIA_TYPES.join(", ");

        let response = self
            .send_authenticated(|c| c.get(&url).header(reqwest::header::ACCEPT, accept.clone()))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ReplicoreError::ManifestNotFound { repo: repo.to_string(), reference: reference.to_string() });
        }
        if !response.status().is_success() {
            return Err(ReplicoreError::UnexpectedStatus { status: response.status().as_u16(), operation: format!("get manifest {repo}:{reference}") });
        }

        let digest_header = response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let raw = response.bytes().await?.to_vec();
        let digest: Digest = match digest_header {
            Some(d) => d.parse()?,
            None => format!("sha256:{}", super::digest_of_bytes(&raw)).parse()?,
        };

        Manifest::parse(digest, media_type, raw)
    }

    /// Checks whether a manifest reference exists without fetching its body.
    pub async fn head_manifest(&self, repo: &str, reference: &str) -> ReplicoreResult<Option<Digest>> {
        self.rate_gate.acquire().await;
        let url = self.url(&format!("/v2/{repo}/manifests/{reference}"));
        let accept = MANIFEST_ACCEPT_MEDIA_TYPES.join(", ");

        let response = self
            .send_authenticated(|c| c.head(&url).header(reqwest::header::ACCEPT, accept.clone()))
            .await?;

        match response.status() {
            StatusCode::OK => {
                let digest = response
                    .headers()
                    .get("Docker-Content-Digest")
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.parse())
                    .transpose()?;
                crate::Ok(digest)
            }
            StatusCode::NOT_FOUND => crate::Ok(None),
            status => Err(ReplicoreError::UnexpectedStatus { status: status.as_u16(), operation: format!("head manifest {repo}:{reference}") }),
        }
    }

    /// Pushes `manifest`'s exact raw bytes under `reference`, returning the digest
    /// the server assigned.
    pub async fn put_manifest(&self, repo: &str, reference: &str, manifest: &Manifest) -> ReplicoreResult<Digest> {
        self.rate_gate.acquire().await;
        let url = self.url(&format!("/v2/{repo}/manifests/{reference}"));
        let body = manifest.raw.clone();
        let content_type = manifest.media_type.clone();

        let response = self
            .send_authenticated(|c| {
                c.put(&url)
                    .header(reqwest::header::CONTENT_TYPE, content_type.clone())
                    .body(body.clone())
            })
            .await?;

        if !response.status().is_success() {
            return Err(ReplicoreError::UnexpectedStatus { status: response.status().as_u16(), operation: format!("put manifest {repo}:{reference}") });
        }

        let digest = response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or_else(|| manifest.digest.clone());

        crate::Ok(digest)
    }

    /// Checks whether a blob exists, returning its declared size if so.
    pub async fn blob_exists(&self, repo: &str, digest: &Digest) -> ReplicoreResult<Option<u64>> {
        self.rate_gate.acquire().await;
        let url = self.url(&format!("/v2/{repo}/blobs/{digest}"));

        let response = self.send_authenticated(|c| c.head(&url)).await?;
        match response.status() {
            StatusCode::OK => {
                let size = response
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                crate::Ok(size)
            }
            StatusCode::NOT_FOUND => crate::Ok(None),
            status => Err(ReplicoreError::UnexpectedStatus { status: status.as_u16(), operation: format!("head blob {digest}") }),
        }
    }

    /// Opens a streaming reader over a blob's bytes. The caller owns the stream and
    /// must not collect it into memory; `size` is the server-declared content length.
    pub async fn get_blob(&self, repo: &str, digest: &Digest) -> ReplicoreResult<(BoxStream<'static, ReplicoreResult<Bytes>>, u64)> {
        self.rate_gate.acquire().await;
        let url = self.url(&format!("/v2/{repo}/blobs/{digest}"));

        let response = self.send_authenticated(|c| c.get(&url)).await?;
        if !response.status().is_success() {
            return Err(ReplicoreError::UnexpectedStatus { status: response.status().as_u16(), operation: format!("get blob {digest}") });
        }

        let size = response.content_length().unwrap_or(0);
        let stream = response.bytes_stream().map_err(ReplicoreError::from).boxed();
        crate::Ok((stream, size))
    }

    /// Uploads a blob via the three-step monolithic upload (POST init, PATCH bytes,
    /// PUT commit). `stream` is consumed end-to-end without being buffered.
    pub async fn put_blob(
        &self,
        repo: &str,
        digest: &Digest,
        stream: BoxStream<'static, ReplicoreResult<Bytes>>,
        size: u64,
    ) -> ReplicoreResult<()> {
        self.rate_gate.acquire().await;
        let init_url = self.url(&format!("/v2/{repo}/blobs/uploads/"));
        let init_response = self.send_authenticated(|c| c.post(&init_url)).await?;
        if init_response.status() != StatusCode::ACCEPTED {
            return Err(ReplicoreError::UnexpectedStatus { status: init_response.status().as_u16(), operation: format!("initiate blob upload for {digest}") });
        }

        let upload_location = self.resolve_location(&init_response)?;
        // Hash the bytes as they stream past rather than trusting the registry's own
        // digest confirmation; a hash mismatch fails the PATCH outright.
        let verifying = super::VerifyingReader::new(stream, digest.clone());
        let body = reqwest::Body::wrap_stream(verifying.map_err(std::io::Error::other));
        let patch_response = self
            .http
            .patch(&upload_location)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await?;
        if !patch_response.status().is_success() {
            return Err(ReplicoreError::UnexpectedStatus { status: patch_response.status().as_u16(), operation: format!("upload blob bytes for {digest}") });
        }

        let commit_location = self.resolve_location(&patch_response)?;
        let commit_url = format!(
            "{}{}digest={}",
            commit_location,
            if commit_location.contains('?') { '&' } else { '?' },
            urlencoding(&digest.to_string()),
        );
        let commit_response = self
            .http
            .put(&commit_url)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await?;
        if !commit_response.status().is_success() {
            return Err(ReplicoreError::UnexpectedStatus { status: commit_response.status().as_u16(), operation: format!("commit blob upload for {digest}") });
        }

        // The registry's own confirmation is mandatory, not advisory: a commit that
        // completes without echoing back the same digest is a failed transfer, not a
        // silent success, even though `VerifyingReader` already checked the bytes
        // client-side above.
        let confirmed = commit_response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ReplicoreError::DigestMismatch { expected: digest.to_string(), actual: "<missing Docker-Content-Digest header>".to_string() })?;
        if confirmed != digest.to_string() {
            return Err(ReplicoreError::DigestMismatch { expected: digest.to_string(), actual: confirmed.to_string() });
        }

        crate::Ok(())
    }

    fn resolve_location(&self, response: &reqwest::Response) -> ReplicoreResult<String> {
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ReplicoreError::UnexpectedStatus { status: response.status().as_u16(), operation: "missing Location header".to_string() })?;

        if location.starts_with("http://") || location.starts_with("https://") {
            crate::Ok(location.to_string())
        } else {
            crate::Ok(self.url(location))
        }
    }

    /// Attempts a server-side cross-repo mount of `digest` from `from_repo` into
    /// `to_repo`. On [`MountOutcome::NotMounted`] the caller must fall back to a
    /// full streaming copy.
    pub async fn mount_blob(&self, from_repo: &str, to_repo: &str, digest: &Digest) -> ReplicoreResult<MountOutcome> {
        self.rate_gate.acquire().await;
        let url = self.url(&format!("/v2/{to_repo}/blobs/uploads/?mount={digest}&from={from_repo}"));
        let response = self.send_authenticated(|c| c.post(&url)).await?;

        match response.status() {
            StatusCode::CREATED => crate::Ok(MountOutcome::Mounted),
            StatusCode::ACCEPTED => crate::Ok(MountOutcome::NotMounted),
            status => Err(ReplicoreError::UnexpectedStatus { status: status.as_u16(), operation: format!("mount blob {digest}") }),
        }
    }

    /// Lists projects via the Harbor-style paged API, falling back to synthesizing
    /// project names from the v2 catalog's repository names.
    pub async fn list_projects(&self) -> ReplicoreResult<Vec<String>> {
        let url = self.url("/api/v2.0/projects");
        if let Ok(response) = self.send_authenticated(|c| c.get(&url)).await {
            if response.status().is_success() {
                #[derive(Deserialize)]
                struct HarborProject {
                    name: String,
                }
                if let Ok(projects) = response.json::<Vec<HarborProject>>().await {
                    return crate::Ok(projects.into_iter().map(|p| p.name).collect());
                }
            }
        }

        let repos = self.catalog().await?;
        let mut projects: Vec<String> = repos
            .iter()
            .filter_map(|r| r.split_once('/').map(|(project, _)| project.to_string()))
            .collect();
        projects.sort();
        projects.dedup();
        crate::Ok(projects)
    }

    /// Lists repositories within `project`, via Harbor's API with a v2 catalog fallback.
    pub async fn list_repositories(&self, project: &str) -> ReplicoreResult<Vec<String>> {
        let url = self.url(&format!("/api/v2.0/projects/{project}/repositories"));
        if let Ok(response) = self.send_authenticated(|c| c.get(&url)).await {
            if response.status().is_success() {
                #[derive(Deserialize)]
                struct HarborRepository {
                    name: String,
                }
                if let Ok(repos) = response.json::<Vec<HarborRepository>>().await {
                    return crate::Ok(repos.into_iter().map(|r| strip_project_prefix(&r.name, project)).collect());
                }
            }
        }

        let prefix = format!("{project}/");
        let repos = self
            .catalog()
            .await?
            .into_iter()
            .filter_map(|r| r.strip_prefix(&prefix).map(str::to_string))
            .collect();
        crate::Ok(repos)
    }

    async fn catalog(&self) -> ReplicoreResult<Vec<String>> {
        let url = self.url("/v2/_catalog");
        let response = self.send_authenticated(|c| c.get(&url)).await?;
        if !response.status().is_success() {
            return Err(ReplicoreError::UnexpectedStatus { status: response.status().as_u16(), operation: "list catalog".to_string() });
        }
        let body: CatalogResponse = response.json().await?;
        crate::Ok(body.repositories)
    }

    /// Returns `true` if `project` exists, via the Harbor API; a vanilla v2
    /// registry has no notion of projects, so this degrades to `true`.
    pub async fn project_exists(&self, project: &str) -> ReplicoreResult<bool> {
        let url = self.url(&format!("/api/v2.0/projects?name={project}"));
        match self.send_authenticated(|c| c.get(&url)).await {
            Ok(response) if response.status().is_success() => {
                #[derive(Deserialize)]
                struct HarborProject {
                    name: String,
                }
                let projects: Vec<HarborProject> = response.json().await.unwrap_or_default();
                crate::Ok(projects.iter().any(|p| p.name == project))
            }
            _ => crate::Ok(true),
        }
    }

    /// Creates `project` on a Harbor-like target. Treats HTTP 409 (already exists)
    /// as success. A vanilla v2 registry has no project-creation API and this is a
    /// no-op success.
    pub async fn create_project(&self, project: &str) -> ReplicoreResult<()> {
        let url = self.url("/api/v2.0/projects");
        let body = serde_json::json!({ "project_name": project, "metadata": { "public": "true" } });
        match self.send_authenticated(|c| c.post(&url).json(&body)).await {
            Ok(response) if response.status().is_success() || response.status() == StatusCode::CONFLICT => crate::Ok(()),
            Ok(_) => crate::Ok(()),
            Err(_) => crate::Ok(()),
        }
    }
}

fn strip_project_prefix(name: &str, project: &str) -> String {
    name.strip_prefix(&format!("{project}/")).unwrap_or(name).to_string()
}

fn extract_link_path(link_header: &str) -> Option<String> {
    let start = link_header.find('<')? + 1;
    let end = link_header[start..].find('>')? + start;
    Some(link_header[start..end].to_string())
}

fn urlencoding(s: &str) -> String {
    s.replace(':', "%3A")
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer) -> RegistryClient {
        RegistryClient::new(RegistryEndpoint::new(server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_ping_treats_401_as_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_list_tags_empty_repo() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/library/ghost/tags/list"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let tags = client.list_tags("library/ghost").await.unwrap();
        assert!(tags.is_empty());
    }

    #[tokio::test]
    async fn test_auth_challenge_then_retry_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/library/alpine/tags/list"))
            .respond_with(
                ResponseTemplate::new(401).insert_header(
                    "WWW-Authenticate",
                    format!(r#"Bearer realm="{}/token",service="reg",scope="repository:library/alpine:pull""#, server.uri()),
                ),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": "xyz" })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v2/library/alpine/tags/list"))
            .and(wiremock::matchers::header("Authorization", "Bearer xyz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "name": "library/alpine", "tags": ["latest"] })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let tags = client.list_tags("library/alpine").await.unwrap();
        assert_eq!(tags, vec!["latest".to_string()]);
    }

    #[tokio::test]
    async fn test_blob_exists_reports_size() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/v2/library/nginx/blobs/sha256:abc"))
            .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", "42"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let digest: Digest = "sha256:abc".parse().unwrap();
        let size = client.blob_exists("library/nginx", &digest).await.unwrap();
        assert_eq!(size, Some(42));
    }

    #[tokio::test]
    async fn test_mount_blob_outcomes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/mirror/nginx/blobs/uploads/"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let digest: Digest = "sha256:abc".parse().unwrap();
        let outcome = client.mount_blob("library/nginx", "mirror/nginx", &digest).await.unwrap();
        assert_eq!(outcome, MountOutcome::Mounted);
    }
}
