//! Minimal AWS Signature Version 4 signing for the S3 and Lambda clients.
//!
//! Signs with the three canonical headers (`host`, `x-amz-date`,
//! `x-amz-content-sha256`), which is sufficient for the object and invoke
//! calls this crate makes.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn sha256_hex(data: &[u8]) -> String {
    hex(&Sha256::digest(data))
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Headers to attach to a request: x-amz-date, x-amz-content-sha256,
/// and the Authorization header.
pub fn sign(
    method: &str,
    url: &reqwest::Url,
    region: &str,
    service: &str,
    payload: &[u8],
    credentials: &AwsCredentials,
    now: DateTime<Utc>,
) -> Vec<(&'static str, String)> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let payload_hash = sha256_hex(payload);
    let host = url.host_str().unwrap_or_default().to_string();

    let canonical_query = canonical_query_string(url);
    let canonical_headers = format!(
        "host:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n"
    );
    let signed_headers = "host;x-amz-content-sha256;x-amz-date";
    let canonical_request = format!(
        "{method}\n{path}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
        path = url.path(),
    );

    let scope = format!("{date_stamp}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{hash}",
        hash = sha256_hex(canonical_request.as_bytes()),
    );

    let k_date = hmac(
        format!("AWS4{}", credentials.secret_access_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    let k_signing = hmac(&k_service, b"aws4_request");
    let signature = hex(&hmac(&k_signing, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key_id,
    );

    vec![
        ("x-amz-date", amz_date),
        ("x-amz-content-sha256", payload_hash),
        ("authorization", authorization),
    ]
}

fn canonical_query_string(url: &reqwest::Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn signature_is_deterministic() {
        let credentials = AwsCredentials {
            access_key_id: "AKID".to_string(),
            secret_access_key: "SECRET".to_string(),
        };
        let url: reqwest::Url = "https://bucket.s3.us-east-1.amazonaws.com/content-abc"
            .parse()
            .unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let a = sign("GET", &url, "us-east-1", "s3", b"", &credentials, now);
        let b = sign("GET", &url, "us-east-1", "s3", b"", &credentials, now);
        assert_eq!(a, b);
        assert!(a[2].1.starts_with("AWS4-HMAC-SHA256 Credential=AKID/20240102/us-east-1/s3/"));
    }

    #[test]
    fn payload_changes_signature() {
        let credentials = AwsCredentials {
            access_key_id: "AKID".to_string(),
            secret_access_key: "SECRET".to_string(),
        };
        let url: reqwest::Url = "https://bucket.s3.us-east-1.amazonaws.com/x".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let a = sign("PUT", &url, "us-east-1", "s3", b"one", &credentials, now);
        let b = sign("PUT", &url, "us-east-1", "s3", b"two", &credentials, now);
        assert_ne!(a[2].1, b[2].1);
    }
}
