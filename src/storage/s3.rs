//! Minimal S3 GetObject client (path-style, AWS Signature Version 4)
//!
//! Works against AWS and S3-compatible stores such as MinIO. Without
//! credentials requests are sent unsigned (public buckets).

use crate::config::StorageConfig;
use crate::tracking::{sha256_hex, to_hex};
use crate::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "s3";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Credentials {
    access_key_id: String,
    secret_access_key: String,
}

/// S3 client for whole-object reads.
#[derive(Debug, Clone)]
pub struct S3Client {
    http: reqwest::Client,
    endpoint: String,
    region: String,
    credentials: Option<Credentials>,
}

impl S3Client {
    /// Build a client from storage settings.
    ///
    /// # Errors
    /// Returns error if only one half of the key pair is set or the HTTP
    /// client cannot be built
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let credentials = match (&config.access_key_id, &config.secret_access_key) {
            (Some(id), Some(secret)) => Some(Credentials {
                access_key_id: id.clone(),
                secret_access_key: secret.clone(),
            }),
            (None, None) => None,
            _ => {
                return Err(Error::Config(
                    "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together".to_string(),
                ))
            }
        };
        let endpoint = config
            .endpoint_url
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", config.region));
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            region: config.region.clone(),
            credentials,
        })
    }

    /// Endpoint requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether requests are signed.
    #[must_use]
    pub const fn is_signed(&self) -> bool {
        self.credentials.is_some()
    }

    fn host(&self) -> &str {
        let without_scheme = self
            .endpoint
            .split_once("://")
            .map_or(self.endpoint.as_str(), |(_, rest)| rest);
        without_scheme.split('/').next().unwrap_or(without_scheme)
    }

    /// Canonical (encoded) path of an object.
    fn canonical_uri(&self, bucket: &str, key: &str) -> String {
        let base_path = self
            .endpoint
            .split_once("://")
            .and_then(|(_, rest)| rest.find('/').map(|i| &rest[i..]))
            .unwrap_or("");
        format!("{base_path}/{}/{}", uri_encode(bucket, false), uri_encode(key, true))
    }

    /// Fetch a whole object.
    ///
    /// # Errors
    /// Returns error if the request fails or the store answers non-2xx
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let canonical_uri = self.canonical_uri(bucket, key);
        let scheme_end = self.endpoint.find("://").map_or(0, |i| i + 3);
        let origin = format!("{}{}", &self.endpoint[..scheme_end], self.host());
        let url = format!("{origin}{canonical_uri}");

        let mut request = self.http.get(&url);
        if let Some(creds) = &self.credentials {
            let signed = sign_get(creds, &self.region, self.host(), &canonical_uri, Utc::now())?;
            request = request
                .header("x-amz-date", signed.amz_date)
                .header("x-amz-content-sha256", signed.payload_hash)
                .header("authorization", signed.authorization);
        }

        tracing::debug!(bucket, key, signed = self.is_signed(), "s3 GET");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::StorageError(format!(
                "GET s3://{bucket}/{key} failed with HTTP {status}: {}",
                s3_error_message(&body)
            )));
        }
        Ok(response.bytes().await?)
    }
}

/// Pull `<Code>`/`<Message>` out of an S3 XML error body.
fn s3_error_message(body: &str) -> String {
    let mut reader = Reader::from_str(body);
    let mut element = Vec::new();
    let mut code: Option<String> = None;
    let mut message: Option<String> = None;

    loop {
        let text = match reader.read_event() {
            Ok(Event::Start(e)) => {
                element = e.name().as_ref().to_vec();
                continue;
            }
            Ok(Event::End(_)) => {
                element.clear();
                continue;
            }
            Ok(Event::Text(e)) => e.unescape().map(|t| t.into_owned()).unwrap_or_default(),
            Ok(Event::CData(e)) => String::from_utf8_lossy(&e).into_owned(),
            Ok(Event::Eof) | Err(_) => break,
            Ok(_) => continue,
        };
        let slot = match element.as_slice() {
            b"Code" => &mut code,
            b"Message" => &mut message,
            _ => continue,
        };
        slot.get_or_insert_with(String::new).push_str(&text);
    }

    match (code, message) {
        (Some(code), Some(message)) => format!("{code}: {message}"),
        (Some(code), None) => code,
        _ => body.trim().to_string(),
    }
}

struct SignedHeaders {
    amz_date: String,
    payload_hash: String,
    authorization: String,
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Other(format!("HMAC key rejected: {e}")))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// SigV4 signing key for `date` (`YYYYMMDD`), region and service.
///
/// # Errors
/// Returns error if HMAC initialization fails
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date)?;
    let k_region = hmac_sha256(&k_date, region)?;
    let k_service = hmac_sha256(&k_region, service)?;
    hmac_sha256(&k_service, "aws4_request")
}

fn sign_get(
    creds: &Credentials,
    region: &str,
    host: &str,
    canonical_uri: &str,
    now: DateTime<Utc>,
) -> Result<SignedHeaders> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let payload_hash = sha256_hex(b"");

    let canonical_request = format!(
        "GET\n{canonical_uri}\n\nhost:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n\n{SIGNED_HEADERS}\n{payload_hash}"
    );
    let scope = format!("{date}/{region}/{SERVICE}/aws4_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );
    let key = signing_key(&creds.secret_access_key, &date, region, SERVICE)?;
    let signature = to_hex(&hmac_sha256(&key, &string_to_sign)?);

    Ok(SignedHeaders {
        authorization: format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
            creds.access_key_id
        ),
        amz_date,
        payload_hash,
    })
}

/// Percent-encode per SigV4: unreserved characters pass, `/` passes when
/// `keep_slash`.
#[must_use]
pub fn uri_encode(input: &str, keep_slash: bool) -> String {
    if keep_slash {
        input
            .split('/')
            .map(urlencoding::encode)
            .collect::<Vec<_>>()
            .join("/")
    } else {
        urlencoding::encode(input).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: Option<&str>, signed: bool) -> StorageConfig {
        StorageConfig {
            endpoint_url: endpoint.map(str::to_string),
            access_key_id: signed.then(|| "access-key".to_string()),
            secret_access_key: signed.then(|| "secret-key".to_string()),
            region: "us-east-1".to_string(),
        }
    }

    #[test]
    fn test_signing_key_reference_vector() {
        // Published SigV4 example (IAM service)
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            to_hex(&key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_sign_get_known_signature() {
        let creds = Credentials {
            access_key_id: "access-key".to_string(),
            secret_access_key: "secret-key".to_string(),
        };
        let now = DateTime::parse_from_rfc3339("2024-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let signed = sign_get(&creds, "us-east-1", "minio:9000", "/data/iris%20v2.csv", now).unwrap();
        assert_eq!(signed.amz_date, "20240101T120000Z");
        assert_eq!(
            signed.authorization,
            "AWS4-HMAC-SHA256 Credential=access-key/20240101/us-east-1/s3/aws4_request, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date, \
             Signature=fece948de629b13007d03f6faa29470be88b62883266b1180139395cd5a7f351"
        );
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("iris v2.csv", true), "iris%20v2.csv");
        assert_eq!(uri_encode("a/b~c", true), "a/b~c");
        assert_eq!(uri_encode("a/b", false), "a%2Fb");
        assert_eq!(uri_encode("runs/a+b=c.csv", true), "runs/a%2Bb%3Dc.csv");
        assert_eq!(uri_encode("données/ü.csv", true), "donn%C3%A9es/%C3%BC.csv");
    }

    #[test]
    fn test_endpoint_defaults_to_aws() {
        let client = S3Client::new(&config(None, false)).unwrap();
        assert_eq!(client.endpoint(), "https://s3.us-east-1.amazonaws.com");
        assert!(!client.is_signed());
    }

    #[test]
    fn test_host_and_canonical_uri() {
        let client = S3Client::new(&config(Some("http://minio:9000/"), true)).unwrap();
        assert!(client.is_signed());
        assert_eq!(client.host(), "minio:9000");
        assert_eq!(client.canonical_uri("data", "iris.csv"), "/data/iris.csv");
    }

    #[test]
    fn test_half_credentials_rejected() {
        let mut cfg = config(None, true);
        cfg.secret_access_key = None;
        assert!(matches!(S3Client::new(&cfg), Err(Error::Config(_))));
    }

    #[test]
    fn test_s3_error_message() {
        let xml = "<?xml version=\"1.0\"?><Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>";
        assert_eq!(s3_error_message(xml), "NoSuchKey: The specified key does not exist.");
        assert_eq!(s3_error_message(" plain "), "plain");
    }

    #[test]
    fn test_s3_error_message_unescapes_entities() {
        let xml = "<Error><Code>AccessDenied</Code><Message>Key &apos;a&amp;b.csv&apos; denied</Message></Error>";
        assert_eq!(s3_error_message(xml), "AccessDenied: Key 'a&b.csv' denied");
    }

    #[test]
    fn test_s3_error_message_reads_cdata() {
        let xml = "<Error>\n  <Code>NoSuchKey</Code>\n  <Message><![CDATA[missing]]></Message>\n</Error>";
        assert_eq!(s3_error_message(xml), "NoSuchKey: missing");
    }
}
