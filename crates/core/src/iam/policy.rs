//! Resource IAM policies: get/set with etag-guarded optimistic concurrency,
//! permission testing, and the enforcement check the pipeline's auth stage
//! calls when `AUTH_MODE=required` (§4.4).

use crate::error::{Error, Result};
use crate::repo::iam::{Binding, IamPolicy};

use super::IamService;

/// The two special members every policy implicitly grants viewer-level
/// access to, regardless of bindings — mirrors the provider's own
/// `allUsers`/`allAuthenticatedUsers` principals.
pub const ALL_USERS: &str = "allUsers";
pub const ALL_AUTHENTICATED_USERS: &str = "allAuthenticatedUsers";

/// The caller identity the auth stage attaches to a request's context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    ApiKey(String),
    User(String),
    ServiceAccount(String),
}

impl Principal {
    /// Members this principal satisfies a binding under, most-specific
    /// first; `allUsers` always matches, `allAuthenticatedUsers` matches
    /// everyone except `Anonymous`.
    fn candidate_members(&self) -> Vec<String> {
        let mut members = vec![ALL_USERS.to_string()];
        match self {
            Principal::Anonymous => {}
            Principal::ApiKey(id) => {
                members.push(ALL_AUTHENTICATED_USERS.to_string());
                members.push(format!("apiKey:{id}"));
            }
            Principal::User(email) => {
                members.push(ALL_AUTHENTICATED_USERS.to_string());
                members.push(format!("user:{email}"));
            }
            Principal::ServiceAccount(email) => {
                members.push(ALL_AUTHENTICATED_USERS.to_string());
                members.push(format!("serviceAccount:{email}"));
            }
        }
        members
    }
}

/// Minimal role -> permission catalog. Real IAM's role catalog is enormous;
/// the emulator only needs enough granularity to gate the operations this
/// system exposes.
const ROLE_PERMISSIONS: &[(&str, &[&str])] = &[
    ("roles/viewer", &["storage.objects.get", "storage.buckets.get", "compute.instances.get", "compute.networks.get"]),
    (
        "roles/editor",
        &[
            "storage.objects.get",
            "storage.objects.create",
            "storage.objects.delete",
            "storage.buckets.get",
            "storage.buckets.create",
            "compute.instances.get",
            "compute.instances.create",
            "compute.instances.delete",
            "compute.networks.get",
            "compute.networks.create",
        ],
    ),
    ("roles/owner", &["*"]),
    ("roles/storage.admin", &["storage.objects.get", "storage.objects.create", "storage.objects.delete", "storage.buckets.get", "storage.buckets.create", "storage.buckets.delete"]),
    ("roles/compute.admin", &["compute.instances.get", "compute.instances.create", "compute.instances.delete", "compute.networks.get", "compute.networks.create", "compute.networks.delete"]),
];

fn role_grants(role: &str, permission: &str) -> bool {
    ROLE_PERMISSIONS
        .iter()
        .find(|(r, _)| *r == role)
        .is_some_and(|(_, perms)| perms.contains(&"*") || perms.contains(&permission))
}

impl IamService {
    pub async fn get_iam_policy(&self, resource_type: &str, resource_id: &str) -> Result<IamPolicy> {
        self.policies.get(resource_type, resource_id).await
    }

    pub async fn set_iam_policy(
        &self,
        resource_type: &str,
        resource_id: &str,
        bindings: Vec<Binding>,
        expected_etag: Option<&str>,
    ) -> Result<IamPolicy> {
        self.policies.set(resource_type, resource_id, &bindings, expected_etag).await
    }

    /// Returns the subset of `permissions` the principal holds on the
    /// resource, per the provider's `testIamPermissions` semantics (never
    /// errors on a permission the caller lacks; just omits it).
    pub async fn test_iam_permissions(
        &self,
        resource_type: &str,
        resource_id: &str,
        principal: &Principal,
        permissions: &[String],
    ) -> Result<Vec<String>> {
        let policy = self.policies.get(resource_type, resource_id).await?;
        let members = principal.candidate_members();
        Ok(permissions
            .iter()
            .filter(|perm| {
                policy
                    .bindings
                    .iter()
                    .any(|b| b.members.iter().any(|m| members.contains(m)) && role_grants(&b.role, perm))
            })
            .cloned()
            .collect())
    }

    /// Enforces that `principal` holds `required_permission` on the
    /// resource. A resource with no policy at all denies everyone except
    /// the two `allUsers`/`allAuthenticatedUsers` wildcards, since an absent
    /// policy is never evidence of public access.
    pub async fn check_permission(
        &self,
        resource_type: &str,
        resource_id: &str,
        principal: &Principal,
        required_permission: &str,
    ) -> Result<()> {
        let policy = self.policies.get(resource_type, resource_id).await?;
        let members = principal.candidate_members();

        let granted = policy
            .bindings
            .iter()
            .any(|b| b.members.iter().any(|m| members.contains(m)) && role_grants(&b.role, required_permission));

        if granted {
            Ok(())
        } else {
            Err(Error::PermissionDenied(format!(
                "principal lacks permission {required_permission} on {resource_type}/{resource_id}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::clock::SystemClock;
    use crate::repo::{ApiKeyRepo, IamPolicyRepo, ServiceAccountKeyRepo, ServiceAccountRepo};

    use super::*;

    async fn service() -> IamService {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
        IamService::new(
            ServiceAccountRepo::new(pool.clone()),
            ServiceAccountKeyRepo::new(pool.clone()),
            IamPolicyRepo::new(pool.clone()),
            ApiKeyRepo::new(pool.clone()),
            Arc::new(SystemClock),
            "test-secret".to_string(),
        )
    }

    #[tokio::test]
    async fn missing_policy_denies_non_public_principal() {
        let svc = service().await;
        let err = svc
            .check_permission("bucket", "b1", &Principal::User("a@example.com".into()), "storage.objects.get")
            .await;
        assert!(matches!(err, Err(Error::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn all_users_binding_grants_anonymous_access() {
        let svc = service().await;
        svc.set_iam_policy(
            "bucket",
            "b1",
            vec![Binding { role: "roles/viewer".into(), members: vec![ALL_USERS.to_string()] }],
            None,
        )
        .await
        .unwrap();

        svc.check_permission("bucket", "b1", &Principal::Anonymous, "storage.objects.get").await.unwrap();
    }

    #[tokio::test]
    async fn specific_binding_grants_named_principal_only() {
        let svc = service().await;
        svc.set_iam_policy(
            "bucket",
            "b1",
            vec![Binding { role: "roles/editor".into(), members: vec!["user:a@example.com".into()] }],
            None,
        )
        .await
        .unwrap();

        svc.check_permission("bucket", "b1", &Principal::User("a@example.com".into()), "storage.objects.create")
            .await
            .unwrap();
        let err = svc
            .check_permission("bucket", "b1", &Principal::User("b@example.com".into()), "storage.objects.create")
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_iam_permissions_returns_only_granted_subset() {
        let svc = service().await;
        svc.set_iam_policy(
            "bucket",
            "b1",
            vec![Binding { role: "roles/viewer".into(), members: vec!["user:a@example.com".into()] }],
            None,
        )
        .await
        .unwrap();

        let granted = svc
            .test_iam_permissions(
                "bucket",
                "b1",
                &Principal::User("a@example.com".into()),
                &["storage.objects.get".to_string(), "storage.objects.delete".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(granted, vec!["storage.objects.get".to_string()]);
    }
}
