//! Shared harness for the integration suites: a canned-response recording
//! transport and gzip+tar layer fixtures.

#![allow(dead_code)] // each test binary uses a subset

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use car_image::{ImageError, Result, RoundTrip};
use chrono::DateTime;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Request, Response};

/// One request observed by the transport.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub accept: Option<String>,
    pub authorization: Option<String>,
}

/// A transport serving canned responses keyed by full URL, recording every
/// request it sees. URLs with no canned response answer 404.
#[derive(Default)]
pub struct RecordingTransport {
    responses: Mutex<HashMap<String, (String, Vec<u8>)>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a response body with the given content type.
    pub fn respond(&self, url: &str, content_type: &str, body: impl Into<Vec<u8>>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), (content_type.to_string(), body.into()));
    }

    /// Registers a JSON response.
    pub fn respond_json(&self, url: &str, content_type: &str, body: &serde_json::Value) {
        self.respond(url, content_type, serde_json::to_vec(body).unwrap());
    }

    /// Everything observed so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The requests for one URL.
    pub fn requests_for(&self, url: &str) -> Vec<RecordedRequest> {
        self.requests().into_iter().filter(|r| r.url == url).collect()
    }
}

#[async_trait]
impl RoundTrip for RecordingTransport {
    async fn round_trip(&self, request: Request) -> Result<Response> {
        let header = |name| {
            request
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        self.requests.lock().unwrap().push(RecordedRequest {
            url: request.url().to_string(),
            accept: header(ACCEPT),
            authorization: header(AUTHORIZATION),
        });

        let canned = self
            .responses
            .lock()
            .unwrap()
            .get(request.url().as_str())
            .cloned();
        let response = match canned {
            Some((content_type, body)) => http::Response::builder()
                .status(200)
                .header(CONTENT_TYPE, content_type)
                .body(body)
                .map_err(|e| ImageError::Header(e.to_string()))?,
            None => http::Response::builder()
                .status(404)
                .body(Vec::new())
                .map_err(|e| ImageError::Header(e.to_string()))?,
        };
        Ok(response.into())
    }
}

/// One file to place into a fixture layer.
pub struct FixtureFile {
    pub name: &'static str,
    pub size: usize,
    pub mode: u32,
    pub mtime_rfc3339: &'static str,
    /// Byte every position is filled with, to tell overlapping files apart.
    pub fill: u8,
}

impl FixtureFile {
    pub const fn new(
        name: &'static str,
        size: usize,
        mode: u32,
        mtime_rfc3339: &'static str,
        fill: u8,
    ) -> Self {
        Self {
            name,
            size,
            mode,
            mtime_rfc3339,
            fill,
        }
    }

    pub fn content(&self) -> Vec<u8> {
        vec![self.fill; self.size]
    }
}

pub fn epoch(rfc3339: &str) -> u64 {
    u64::try_from(
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .timestamp(),
    )
    .unwrap()
}

/// Builds a gzipped tar containing regular-file entries.
pub fn gzip_tar(files: &[FixtureFile]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for file in files {
        let content = file.content();
        let mut header = tar::Header::new_gnu();
        header.set_path(file.name).unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(file.mode);
        header.set_mtime(epoch(file.mtime_rfc3339));
        header.set_cksum();
        builder.append(&header, content.as_slice()).unwrap();
    }
    let tar_data = builder.into_inner().unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(&tar_data).unwrap();
    encoder.finish().unwrap()
}

/// Adds a non-file entry (directory, symlink) for skip tests.
pub fn gzip_tar_with_extras(files: &[FixtureFile]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut dir = tar::Header::new_gnu();
    dir.set_path("usr/").unwrap();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_size(0);
    dir.set_mode(0o755);
    dir.set_cksum();
    builder.append(&dir, std::io::empty()).unwrap();

    let mut link = tar::Header::new_gnu();
    link.set_path("usr/bin/sh").unwrap();
    link.set_entry_type(tar::EntryType::Symlink);
    link.set_link_name("dash").unwrap();
    link.set_size(0);
    link.set_mode(0o777);
    link.set_cksum();
    builder.append(&link, std::io::empty()).unwrap();

    for file in files {
        let content = file.content();
        let mut header = tar::Header::new_gnu();
        header.set_path(file.name).unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(file.mode);
        header.set_mtime(epoch(file.mtime_rfc3339));
        header.set_cksum();
        builder.append(&header, content.as_slice()).unwrap();
    }
    let tar_data = builder.into_inner().unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(&tar_data).unwrap();
    encoder.finish().unwrap()
}

/// Builds a gzipped tar whose entry names are written into the raw GNU
/// header, bypassing `set_path` normalization. Lets fixtures carry the
/// absolute names some builders (paketo) produce, which `set_path` rejects.
pub fn gzip_tar_raw_names(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        {
            let gnu = header.as_gnu_mut().unwrap();
            gnu.name[..name.len()].copy_from_slice(name.as_bytes());
        }
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, *content).unwrap();
    }
    let tar_data = builder.into_inner().unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(&tar_data).unwrap();
    encoder.finish().unwrap()
}

/// The fixture registry host. Not Docker Hub or ghcr.io, so no auth
/// decorator interferes with recorded requests.
pub const FIXTURE_HOST: &str = "registry.fixture.example";
pub const FIXTURE_BASE: &str = "https://registry.fixture.example/v2/tetratelabs/car";

pub const LAYER_DIGESTS: [&str; 4] = [
    "sha256:4e07f3bd88fb4a468d5551c21eb05f625b0efe9ee00ae25d3ffb87c0f563693f",
    "sha256:15a7c58f96c57b941a56cbf1bdd525cdef1773a7671c52b7039047a1941105c2",
    "sha256:1b68df344f018b7cdd39908b93b6d60792a414cbf47975f7606a18bd603e6a81",
    "sha256:6d2d8da2960b0044c22730be087e6d7b197ab215d78f9090a3dff8cb7c40c241",
];

pub const CONFIG_DIGEST: &str =
    "sha256:33655f17f09318801873b70f89c1596ce38f41a6b12fe9e2a6f5f0d7d42d8d64";

/// Files per layer. The data intentionally overlaps on `usr/local` so the
/// overwrite semantics of later layers are observable, and includes a
/// Windows path with no permission bits.
pub fn fixture_layers() -> [Vec<FixtureFile>; 4] {
    [
        vec![
            FixtureFile::new("bin/apple.txt", 10, 0o640, "2020-06-07T06:28:15Z", 0),
            FixtureFile::new("usr/local/bin/boat", 20, 0o755, "2021-04-16T22:53:09Z", 0),
        ],
        vec![FixtureFile::new(
            "usr/local/bin/car",
            30,
            0o755,
            "2021-05-12T03:53:29Z",
            1,
        )],
        vec![FixtureFile::new(
            "Files/ProgramData/truck/bin/truck.exe",
            40,
            0,
            "2021-05-12T03:53:15Z",
            2,
        )],
        vec![FixtureFile::new(
            "usr/local/sbin/car",
            50,
            0o755,
            "2021-05-12T03:53:29Z",
            3,
        )],
    ]
}

pub const LAYER_CREATED_BY: [&str; 4] = [
    "/bin/sh -c #(nop) ADD file:d7fa3c26651f9204a5629287a1a9a6e7dc6a0bc6eb499e82c433c0c8f67ff46b in /",
    "ADD build/* /usr/local/bin/ # buildkit",
    "cmd /S /C powershell iex(iwr -useb https://moretrucks.io/install.ps1)",
    "ADD build/* /usr/local/sbin/ # buildkit",
];

/// Primes `transport` with a complete four-layer image at
/// `tetratelabs/car:v1.0` and returns the gzipped blobs (so tests can know
/// the descriptor sizes).
pub fn prime_fixture_image(transport: &RecordingTransport) -> [Vec<u8>; 4] {
    let blobs = fixture_layers().map(|files| gzip_tar(&files));

    let layers: Vec<serde_json::Value> = blobs
        .iter()
        .zip(LAYER_DIGESTS)
        .map(|(blob, digest)| {
            serde_json::json!({
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "digest": digest,
                "size": blob.len(),
            })
        })
        .collect();

    transport.respond_json(
        &format!("{FIXTURE_BASE}/manifests/v1.0"),
        "application/vnd.docker.distribution.manifest.v2+json",
        &serde_json::json!({
            "schemaVersion": 2,
            "config": {
                "mediaType": "application/vnd.docker.container.image.v1+json",
                "digest": CONFIG_DIGEST,
                "size": 1469,
            },
            "layers": layers,
        }),
    );

    transport.respond_json(
        &format!("{FIXTURE_BASE}/blobs/{CONFIG_DIGEST}"),
        "application/vnd.docker.container.image.v1+json",
        &serde_json::json!({
            "architecture": "amd64",
            "os": "linux",
            "history": [
                {"created_by": LAYER_CREATED_BY[0]},
                {"created_by": "/bin/sh -c #(nop)  CMD [\"/bin/sh\"]", "empty_layer": true},
                {"created_by": LAYER_CREATED_BY[1]},
                {"created_by": LAYER_CREATED_BY[2]},
                {"created_by": LAYER_CREATED_BY[3]},
            ],
        }),
    );

    for (blob, digest) in blobs.iter().zip(LAYER_DIGESTS) {
        transport.respond(
            &format!("{FIXTURE_BASE}/blobs/{digest}"),
            "application/octet-stream",
            blob.clone(),
        );
    }

    blobs
}
