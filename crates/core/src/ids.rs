//! Ids — opaque identifier generation shared across repositories.

use uuid::Uuid;

pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}
