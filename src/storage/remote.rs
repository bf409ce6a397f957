//! S3-compatible object store with AWS Signature Version 4.
//!
//! Objects are written with a single virtual-hosted `PUT Object`:
//!
//! ```text
//! PUT https://{bucket}.{endpoint}/{key}
//! Authorization: AWS4-HMAC-SHA256 Credential=..., SignedHeaders=..., Signature=...
//! ```
//!
//! The endpoint defaults to `{region}.aliyuncs.com`, whose S3-compatible API
//! accepts SigV4. Public URLs use the CDN domain when one is configured.

use super::{StorageBackend, UploadError};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

/// Connection settings for [`RemoteStore`].
#[derive(Clone)]
pub struct RemoteStoreConfig {
    pub bucket: String,
    pub region: String,
    /// Host suffix after the bucket. `None` → `{region}.aliyuncs.com`.
    pub endpoint: Option<String>,
    /// Public host for canonical URLs, e.g. `img.example.com`.
    pub cdn_domain: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for RemoteStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStoreConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("cdn_domain", &self.cdn_domain)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

impl RemoteStoreConfig {
    pub fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(e) if !e.is_empty() => e.trim_end_matches('/').to_string(),
            _ => format!("{}.aliyuncs.com", self.region),
        }
    }

    pub fn host(&self) -> String {
        format!("{}.{}", self.bucket, self.endpoint())
    }

    /// Canonical public URL of `key`, path percent-encoded.
    pub fn public_url(&self, key: &str) -> String {
        let path = uri_encode_path(key);
        match &self.cdn_domain {
            Some(cdn) if !cdn.is_empty() => format!("https://{}/{}", cdn.trim_end_matches('/'), path),
            _ => format!("https://{}/{}", self.host(), path),
        }
    }
}

/// Uploads over HTTPS with SigV4-signed requests.
pub struct RemoteStore {
    config: RemoteStoreConfig,
    client: reqwest::blocking::Client,
}

impl RemoteStore {
    pub fn new(config: RemoteStoreConfig, client: reqwest::blocking::Client) -> Self {
        Self { config, client }
    }
}

impl StorageBackend for RemoteStore {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, UploadError> {
        let host = self.config.host();
        let path = format!("/{}", uri_encode_path(key));
        let payload_hash = hex_sha256(bytes);
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let headers = vec![
            ("content-type".to_string(), content_type.to_string()),
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        let signer = Signer {
            access_key_id: &self.config.access_key_id,
            secret_access_key: &self.config.secret_access_key,
            region: &self.config.region,
        };
        let authorization = signer.authorization(
            &SignableRequest {
                method: "PUT",
                path: &path,
                query: "",
                headers: &headers,
                payload_hash: &payload_hash,
            },
            now,
        )?;

        let response = self
            .client
            .put(format!("https://{}{}", host, path))
            .header("Content-Type", content_type)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date)
            .header("Authorization", authorization)
            .body(bytes.to_vec())
            .send()
            .map_err(|source| UploadError::Transport {
                key: key.to_string(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(self.config.public_url(key));
        }
        let code = status.as_u16();
        if code == 401 || code == 403 {
            return Err(UploadError::Auth {
                key: key.to_string(),
                status: code,
            });
        }
        let body = response.text().unwrap_or_default();
        Err(UploadError::Status {
            key: key.to_string(),
            status: code,
            body: body.chars().take(200).collect(),
        })
    }

    fn supports_transforms(&self) -> bool {
        true
    }
}

// ============================================================================
// SigV4
// ============================================================================

/// The parts of a request covered by the signature.
pub struct SignableRequest<'a> {
    pub method: &'a str,
    /// Already URI-encoded absolute path.
    pub path: &'a str,
    /// Canonical (sorted, encoded) query string; empty for none.
    pub query: &'a str,
    /// Headers to sign. Names are lowercased and sorted during signing.
    pub headers: &'a [(String, String)],
    /// Hex SHA-256 of the body.
    pub payload_hash: &'a str,
}

pub struct Signer<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
}

impl Signer<'_> {
    /// Value for the `Authorization` header.
    pub fn authorization(
        &self,
        request: &SignableRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<String, UploadError> {
        let date = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let scope = format!("{}/{}/{}/aws4_request", date, self.region, SERVICE);

        let (canonical, signed_headers) = canonical_request(request);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex_sha256(canonical.as_bytes())
        );

        let k_date = hmac_sha256(
            format!("AWS4{}", self.secret_access_key).as_bytes(),
            date.as_bytes(),
        )?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, SERVICE.as_bytes())?;
        let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
        let signature = hex(&hmac_sha256(&k_signing, string_to_sign.as_bytes())?);

        Ok(format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.access_key_id, scope, signed_headers, signature
        ))
    }
}

/// Canonical request text and the `SignedHeaders` list.
fn canonical_request(request: &SignableRequest<'_>) -> (String, String) {
    let mut headers: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        request.path,
        request.query,
        canonical_headers,
        signed_headers,
        request.payload_hash
    );
    (canonical, signed_headers)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, UploadError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| UploadError::Signing(format!("HMAC init failed: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn hex_sha256(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Percent-encode an object key for the request path. Unreserved characters
/// and `/` pass through; everything else becomes uppercase `%XX` per byte.
pub fn uri_encode_path(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}
