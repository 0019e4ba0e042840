//! Name validation for buckets, hub resources and object keys.

use crate::config::NamingRules;
use crate::error::{GatewayError, Result};
use regex::Regex;
use std::sync::LazyLock;

/// S3 bucket naming: lowercase letters, digits, dots and hyphens, starting
/// and ending alphanumeric, 3-63 characters.
static BUCKET_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").expect("bucket name regex must compile")
});

/// DNS label: lowercase alphanumerics and hyphens, alphanumeric at both ends.
static RESOURCE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").expect("resource name regex must compile")
});

static IPV4_LIKE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").expect("ipv4 regex must compile")
});

/// Validate a bucket name (namespace bucket or a hub's target bucket).
pub fn validate_bucket_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| GatewayError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.len() < 3 || name.len() > 63 {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !BUCKET_NAME_RE.is_match(name) {
        return Err(invalid(
            "only lowercase letters, digits, '.' and '-' are allowed, starting and ending with a letter or digit",
        ));
    }
    if name.contains("..") {
        return Err(invalid("must not contain consecutive dots"));
    }
    if IPV4_LIKE_RE.is_match(name) {
        return Err(invalid("must not be formatted as an IP address"));
    }
    Ok(())
}

/// Validate a hub resource name.
pub fn validate_resource_name(name: &str) -> Result<()> {
    if RESOURCE_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(GatewayError::InvalidResourceName {
            name: name.to_string(),
            reason: "must be a DNS label: 1-63 lowercase letters, digits or '-', alphanumeric at both ends"
                .to_string(),
        })
    }
}

/// Validate an object key.
pub fn validate_object_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(GatewayError::InvalidObjectKey {
            reason: "key must not be empty".to_string(),
        });
    }
    if key.len() > NamingRules::MAX_OBJECT_KEY_BYTES {
        return Err(GatewayError::InvalidObjectKey {
            reason: format!(
                "key is {} bytes, limit is {}",
                key.len(),
                NamingRules::MAX_OBJECT_KEY_BYTES
            ),
        });
    }
    Ok(())
}
