//! AWS Signature Version 4 request signing
//!
//! Only what the S3 client needs: header-based signing of path-style
//! requests with a precomputed payload hash.

use super::{Credentials, StoreError};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

pub(crate) const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// RFC 3986 unreserved characters stay as-is, everything else is escaped.
const URI_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Encode a single path segment or query component.
pub(crate) fn uri_encode(value: &str) -> String {
    utf8_percent_encode(value, URI_ENCODE).to_string()
}

/// Encode an object key, keeping `/` separators.
pub(crate) fn encode_key(key: &str) -> String {
    key.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

/// Canonical, sorted query string.
pub(crate) fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| StoreError::SigningError(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// `kSigning = HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")`
pub(crate) fn derive_signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, StoreError> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

/// A request in the form SigV4 hashes.
pub(crate) struct CanonicalRequest<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub query: &'a str,
    /// Lower-cased header names; BTreeMap keeps them sorted.
    pub headers: BTreeMap<String, String>,
    pub payload_hash: &'a str,
}

impl CanonicalRequest<'_> {
    pub fn signed_headers(&self) -> String {
        self.headers.keys().cloned().collect::<Vec<_>>().join(";")
    }

    pub fn render(&self) -> String {
        let canonical_headers: String = self
            .headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
            .collect();

        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.uri,
            self.query,
            canonical_headers,
            self.signed_headers(),
            self.payload_hash
        )
    }
}

/// Timestamp pair used for `x-amz-date` and the credential scope.
pub(crate) fn amz_timestamps(now: DateTime<Utc>) -> (String, String) {
    (
        now.format("%Y%m%dT%H%M%SZ").to_string(),
        now.format("%Y%m%d").to_string(),
    )
}

/// Build the `Authorization` header value for a canonical request.
pub(crate) fn authorization(
    request: &CanonicalRequest<'_>,
    credentials: &Credentials,
    region: &str,
    service: &str,
    amz_date: &str,
    date: &str,
) -> Result<String, StoreError> {
    let scope = format!("{}/{}/{}/aws4_request", date, region, service);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        sha256_hex(request.render().as_bytes())
    );

    let signing_key =
        derive_signing_key(credentials.secret_access_key(), date, region, service)?;
    let signature = hex::encode(hmac(&signing_key, string_to_sign.as_bytes())?);

    Ok(format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM,
        credentials.access_key_id(),
        scope,
        request.signed_headers(),
        signature
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sha256_of_empty_payload() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_signing_key_matches_aws_reference() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_encode_key_keeps_separators() {
        assert_eq!(encode_key("photos/my file+1.jpg"), "photos/my%20file%2B1.jpg");
        assert_eq!(encode_key("UserUpload_a~b-c_d.txt"), "UserUpload_a~b-c_d.txt");
    }

    #[test]
    fn test_canonical_query_is_sorted_and_keeps_empty_values() {
        assert_eq!(
            canonical_query(&[("uploadId", "abc/1"), ("partNumber", "2")]),
            "partNumber=2&uploadId=abc%2F1"
        );
        assert_eq!(canonical_query(&[("uploads", "")]), "uploads=");
    }

    #[test]
    fn test_authorization_header_shape() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let (amz_date, date) = amz_timestamps(now);
        assert_eq!(amz_date, "20240501T123000Z");

        let mut headers = BTreeMap::new();
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        headers.insert("host".to_string(), "localhost:9000".to_string());
        let payload_hash = sha256_hex(b"hello");
        let request = CanonicalRequest {
            method: "PUT",
            uri: "/bucket/key",
            query: "",
            headers,
            payload_hash: &payload_hash,
        };

        let creds = Credentials::new("AKIDEXAMPLE", "secret");
        let first = authorization(&request, &creds, "us-east-1", "s3", &amz_date, &date).unwrap();
        let second = authorization(&request, &creds, "us-east-1", "s3", &amz_date, &date).unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240501/us-east-1/s3/aws4_request, "
        ));
        assert!(first.contains("SignedHeaders=host;x-amz-date, "));
        let signature = first.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
    }
}
