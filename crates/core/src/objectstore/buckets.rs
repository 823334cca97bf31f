//! Bucket lifecycle operations on top of [`super::ObjectStoreService`].

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::events::NotificationConfig;
use crate::repo::bucket::{Bucket, BucketAcl, LifecycleConfig};

use super::ObjectStoreService;

impl ObjectStoreService {
    pub async fn create_bucket(
        &self,
        project_id: &str,
        name: &str,
        location: &str,
        storage_class: &str,
        versioning_enabled: bool,
        acl: BucketAcl,
    ) -> Result<Bucket> {
        validate_bucket_name(name)?;
        self.buckets.create(project_id, name, location, storage_class, versioning_enabled, acl).await
    }

    pub async fn get_bucket(&self, name: &str) -> Result<Bucket> {
        self.buckets.get_by_name(name).await
    }

    pub async fn list_buckets(&self, project_id: &str) -> Result<Vec<Bucket>> {
        self.buckets.list(project_id).await
    }

    pub async fn set_versioning(&self, name: &str, enabled: bool) -> Result<Bucket> {
        let bucket = self.buckets.get_by_name(name).await?;
        self.buckets.update_versioning(&bucket.id, enabled).await?;
        self.buckets.get_by_id(&bucket.id).await
    }

    pub async fn set_lifecycle(&self, name: &str, lifecycle: Option<LifecycleConfig>) -> Result<Bucket> {
        let bucket = self.buckets.get_by_name(name).await?;
        self.buckets.update_lifecycle(&bucket.id, lifecycle.as_ref()).await?;
        self.buckets.get_by_id(&bucket.id).await
    }

    pub async fn set_notifications(&self, name: &str, notifications: Vec<NotificationConfig>) -> Result<Bucket> {
        let bucket = self.buckets.get_by_name(name).await?;
        self.buckets.update_notifications(&bucket.id, &notifications).await?;
        self.buckets.get_by_id(&bucket.id).await
    }

    pub async fn set_labels(&self, name: &str, labels: HashMap<String, String>) -> Result<Bucket> {
        let bucket = self.buckets.get_by_name(name).await?;
        self.buckets.update_labels(&bucket.id, &labels).await?;
        self.buckets.get_by_id(&bucket.id).await
    }

    /// Deletion requires the bucket be empty of non-deleted object heads.
    pub async fn delete_bucket(&self, name: &str) -> Result<()> {
        let bucket = self.buckets.get_by_name(name).await?;
        if !self.objects.bucket_is_empty(&bucket.id).await? {
            return Err(Error::FailedPrecondition(format!("bucket {name} is not empty")));
        }
        self.buckets.delete(&bucket.id).await
    }
}

/// RFC-1035-ish: lowercase letters, digits, hyphens, dots; 3-63 chars;
/// must start and end with an alphanumeric.
fn validate_bucket_name(name: &str) -> Result<()> {
    if name.len() < 3 || name.len() > 63 {
        return Err(Error::InvalidArgument("bucket name must be 3-63 characters".to_string()));
    }
    let valid_chars = name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let valid_ends = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric())
        && name.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    if !valid_chars || !valid_ends {
        return Err(Error::InvalidArgument(format!("invalid bucket name: {name}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_name_validation() {
        assert!(validate_bucket_name("my-bucket").is_ok());
        assert!(validate_bucket_name("ab").is_err());
        assert!(validate_bucket_name("-leading-hyphen").is_err());
        assert!(validate_bucket_name("Has_Upper").is_err());
    }
}
