//! Validation — request-shape checks that belong in front of the domain
//! services: the services enforce their own invariants (name uniqueness,
//! CIDR overlap, FSM transitions) but never bother validating that a name
//! looks like a name, because a repository call is the wrong place to
//! reject a human typo. Handlers run requests through a `Validator` before
//! they ever reach a service.

use crate::error::{ApiError, FieldError};

/// Accumulates field errors across a request's fields, then turns them
/// into a single `ApiError::Validation` — so a caller sees every problem
/// with their request at once instead of fixing one field at a time.
#[derive(Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(mut self, field: &str, ok: bool, message: &str) -> Self {
        if !ok {
            self.errors.push(FieldError { field: field.to_string(), message: message.to_string() });
        }
        self
    }

    pub fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self.errors))
        }
    }
}

/// RFC 1035 label: lowercase letters, digits, hyphens; starts with a
/// letter; doesn't end with a hyphen; 1-63 characters.
pub fn is_rfc1035_label(s: &str) -> bool {
    if s.is_empty() || s.len() > 63 {
        return false;
    }
    let bytes = s.as_bytes();
    if !bytes[0].is_ascii_lowercase() {
        return false;
    }
    if bytes[bytes.len() - 1] == b'-' {
        return false;
    }
    bytes.iter().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

/// Loose email shape check: exactly one `@`, a non-empty local part, and a
/// domain part containing at least one `.`.
pub fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

/// Shape check for a subnetwork's IPv4 CIDR block (`a.b.c.d/n`). Enforces
/// the spec's `[8,29]` prefix-length bound for subnets; does not validate
/// that host bits are zero — the VPC service rejects that itself.
pub fn is_ipv4_cidr(s: &str) -> bool {
    let Some((addr, prefix)) = s.split_once('/') else {
        return false;
    };
    let Ok(prefix_len) = prefix.parse::<u8>() else {
        return false;
    };
    if !(8..=29).contains(&prefix_len) {
        return false;
    }
    is_ipv4_addr(addr)
}

pub fn is_ipv4_addr(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() == 4 && parts.iter().all(|p| !p.is_empty() && p.parse::<u8>().is_ok())
}

/// Rejects the handful of characters that show up in SQL-injection probes
/// against free-text fields (labels, metadata values, display names) that
/// get interpolated into log lines and, for labels, bucket/object
/// metadata columns. Bind parameters already make the database safe; this
/// is about not echoing control characters back into responses and logs.
pub fn has_suspicious_content(s: &str) -> bool {
    const MARKERS: &[&str] = &["--", ";--", "/*", "*/", "xp_", "<script", "\0"];
    MARKERS.iter().any(|m| s.contains(m))
}

pub fn within_length(s: &str, max: usize) -> bool {
    s.chars().count() <= max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1035_accepts_typical_names() {
        assert!(is_rfc1035_label("my-bucket-1"));
        assert!(!is_rfc1035_label("My-Bucket"));
        assert!(!is_rfc1035_label("-leading"));
        assert!(!is_rfc1035_label("trailing-"));
        assert!(!is_rfc1035_label(""));
    }

    #[test]
    fn cidr_shape() {
        assert!(is_ipv4_cidr("10.0.0.0/24"));
        assert!(!is_ipv4_cidr("10.0.0.0"));
        assert!(!is_ipv4_cidr("10.0.0.0/33"));
        assert!(!is_ipv4_cidr("not-an-ip/24"));
    }

    #[test]
    fn cidr_prefix_bounds() {
        assert!(is_ipv4_cidr("10.0.0.0/8"));
        assert!(is_ipv4_cidr("10.0.0.0/29"));
        assert!(!is_ipv4_cidr("10.0.0.0/7"));
        assert!(!is_ipv4_cidr("10.0.0.0/30"));
    }

    #[test]
    fn suspicious_markers() {
        assert!(has_suspicious_content("foo'; DROP TABLE buckets;--"));
        assert!(!has_suspicious_content("perfectly normal label"));
    }
}
