//! `multipart/related` body parsing for the one-shot multipart upload
//! endpoint: first part is a JSON metadata object carrying the object
//! `name`, second part is the raw payload.

use std::collections::HashMap;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct MultipartUpload {
    pub name: String,
    pub content_type: Option<String>,
    pub custom_metadata: HashMap<String, String>,
    pub payload: Vec<u8>,
    pub payload_content_type: String,
}

#[derive(serde::Deserialize)]
struct MetadataPart {
    name: String,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Extracts the boundary token from a `Content-Type: multipart/related;
/// boundary=...` header value.
pub fn extract_boundary(content_type_header: &str) -> Result<String> {
    content_type_header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
        .ok_or_else(|| Error::InvalidArgument("missing multipart boundary".to_string()))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Splits the full body into raw part bytes between `--boundary` markers,
/// dropping the preamble and the closing `--boundary--`.
fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let marker = format!("--{boundary}");
    let marker = marker.as_bytes();
    let mut parts = Vec::new();
    let mut rest = body;

    loop {
        let Some(start) = find_subslice(rest, marker) else { break };
        let after_marker = &rest[start + marker.len()..];
        if after_marker.starts_with(b"--") {
            break;
        }
        let after_marker = after_marker.strip_prefix(b"\r\n").unwrap_or(after_marker);

        let Some(next) = find_subslice(after_marker, marker) else { break };
        let part = &after_marker[..next];
        let part = part.strip_suffix(b"\r\n").unwrap_or(part);
        parts.push(part);
        rest = &after_marker[next..];
    }

    parts
}

fn split_headers_body(part: &[u8]) -> (&str, &[u8]) {
    const SEP: &[u8] = b"\r\n\r\n";
    match find_subslice(part, SEP) {
        Some(idx) => {
            let headers = std::str::from_utf8(&part[..idx]).unwrap_or("");
            (headers, &part[idx + SEP.len()..])
        }
        None => ("", part),
    }
}

fn header_value<'a>(headers: &'a str, name: &str) -> Option<&'a str> {
    headers.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        (k.trim().eq_ignore_ascii_case(name)).then(|| v.trim())
    })
}

pub fn parse_multipart_related(content_type_header: &str, body: &[u8]) -> Result<MultipartUpload> {
    let boundary = extract_boundary(content_type_header)?;
    let parts = split_parts(body, &boundary);
    if parts.len() != 2 {
        return Err(Error::InvalidArgument(format!(
            "expected exactly 2 multipart/related parts, found {}",
            parts.len()
        )));
    }

    let (meta_headers, meta_body) = split_headers_body(parts[0]);
    let meta_type = header_value(meta_headers, "content-type").unwrap_or("");
    if !meta_type.contains("json") {
        return Err(Error::InvalidArgument("first multipart part must be application/json".to_string()));
    }
    let metadata: MetadataPart =
        serde_json::from_slice(meta_body).map_err(|e| Error::InvalidArgument(format!("invalid metadata JSON: {e}")))?;
    if metadata.name.is_empty() {
        return Err(Error::InvalidArgument("metadata part must set \"name\"".to_string()));
    }

    let (payload_headers, payload_body) = split_headers_body(parts[1]);
    let payload_content_type =
        header_value(payload_headers, "content-type").unwrap_or("application/octet-stream").to_string();

    Ok(MultipartUpload {
        name: metadata.name,
        content_type: metadata.content_type,
        custom_metadata: metadata.metadata,
        payload: payload_body.to_vec(),
        payload_content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_extraction_handles_quotes_and_params() {
        assert_eq!(extract_boundary("multipart/related; boundary=abc123").unwrap(), "abc123");
        assert_eq!(extract_boundary("multipart/related; boundary=\"abc 123\"").unwrap(), "abc 123");
        assert!(extract_boundary("multipart/related").is_err());
    }

    #[test]
    fn parses_metadata_and_payload_parts() {
        let boundary = "sep123";
        let body = format!(
            "--{boundary}\r\n\
             Content-Type: application/json; charset=UTF-8\r\n\r\n\
             {{\"name\":\"hello.txt\",\"contentType\":\"text/plain\",\"metadata\":{{\"owner\":\"a\"}}}}\r\n\
             --{boundary}\r\n\
             Content-Type: text/plain\r\n\r\n\
             hello world\r\n\
             --{boundary}--\r\n"
        );

        let parsed = parse_multipart_related(
            &format!("multipart/related; boundary={boundary}"),
            body.as_bytes(),
        )
        .unwrap();

        assert_eq!(parsed.name, "hello.txt");
        assert_eq!(parsed.content_type.as_deref(), Some("text/plain"));
        assert_eq!(parsed.custom_metadata.get("owner"), Some(&"a".to_string()));
        assert_eq!(parsed.payload, b"hello world");
    }

    #[test]
    fn rejects_missing_name() {
        let boundary = "sep123";
        let body = format!(
            "--{boundary}\r\nContent-Type: application/json\r\n\r\n{{}}\r\n--{boundary}\r\nContent-Type: text/plain\r\n\r\nx\r\n--{boundary}--\r\n"
        );
        let err = parse_multipart_related(&format!("multipart/related; boundary={boundary}"), body.as_bytes());
        assert!(err.is_err());
    }
}
