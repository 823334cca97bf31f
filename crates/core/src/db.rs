//! Db — the relational metadata store.
//!
//! Grounded on the sibling pack crate that uses `sqlx` against SQLite for
//! its own metadata layer: a pooled connection plus idempotent
//! `CREATE TABLE IF NOT EXISTS` migration run at startup, no separate
//! migration-runner binary.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;

pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id              TEXT PRIMARY KEY,
            display_name    TEXT NOT NULL,
            project_number  INTEGER NOT NULL,
            created_at      TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS buckets (
            id                  TEXT PRIMARY KEY,
            project_id          TEXT NOT NULL,
            name                TEXT NOT NULL UNIQUE,
            location            TEXT NOT NULL,
            storage_class       TEXT NOT NULL,
            versioning_enabled  INTEGER NOT NULL DEFAULT 0,
            acl                 TEXT NOT NULL DEFAULT 'private',
            labels_json         TEXT NOT NULL DEFAULT '{}',
            lifecycle_json      TEXT,
            notifications_json  TEXT NOT NULL DEFAULT '[]',
            cors_json           TEXT,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS object_heads (
            bucket_id        TEXT NOT NULL,
            name             TEXT NOT NULL,
            generation       INTEGER NOT NULL,
            metageneration   INTEGER NOT NULL,
            size             INTEGER NOT NULL,
            content_type     TEXT NOT NULL,
            md5              TEXT NOT NULL,
            crc32c           TEXT NOT NULL,
            storage_class    TEXT NOT NULL,
            acl              TEXT NOT NULL DEFAULT 'private',
            file_path        TEXT NOT NULL,
            deleted          INTEGER NOT NULL DEFAULT 0,
            custom_metadata  TEXT NOT NULL DEFAULT '{}',
            time_created     TEXT NOT NULL,
            updated_at       TEXT NOT NULL,
            PRIMARY KEY (bucket_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS object_versions (
            id               TEXT PRIMARY KEY,
            bucket_id        TEXT NOT NULL,
            name             TEXT NOT NULL,
            generation       INTEGER NOT NULL,
            metageneration   INTEGER NOT NULL,
            size             INTEGER NOT NULL,
            content_type     TEXT NOT NULL,
            md5              TEXT NOT NULL,
            crc32c           TEXT NOT NULL,
            file_path        TEXT NOT NULL,
            storage_class    TEXT NOT NULL DEFAULT 'STANDARD',
            deleted          INTEGER NOT NULL DEFAULT 0,
            custom_metadata  TEXT NOT NULL DEFAULT '{}',
            created_at       TEXT NOT NULL,
            UNIQUE (bucket_id, name, generation)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resumable_sessions (
            session_id    TEXT PRIMARY KEY,
            bucket_id     TEXT NOT NULL,
            object_name   TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            current_offset INTEGER NOT NULL DEFAULT 0,
            total_size    INTEGER,
            temp_path     TEXT NOT NULL,
            created_at    TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS object_events (
            event_id     TEXT PRIMARY KEY,
            bucket_name  TEXT NOT NULL,
            object_name  TEXT NOT NULL,
            generation   INTEGER NOT NULL,
            event_type   TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            delivered    INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS instances (
            id              TEXT PRIMARY KEY,
            project_id      TEXT NOT NULL,
            name            TEXT NOT NULL,
            zone            TEXT NOT NULL,
            machine_type    TEXT NOT NULL,
            status          TEXT NOT NULL,
            container_id    TEXT,
            internal_ip     TEXT,
            external_ip     TEXT,
            network_id      TEXT NOT NULL,
            subnet_id       TEXT NOT NULL,
            metadata_json   TEXT NOT NULL DEFAULT '{}',
            labels_json     TEXT NOT NULL DEFAULT '{}',
            tags_json       TEXT NOT NULL DEFAULT '[]',
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            UNIQUE (project_id, zone, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS networks (
            id                  TEXT PRIMARY KEY,
            project_id          TEXT NOT NULL,
            name                TEXT NOT NULL,
            auto_create_subnets INTEGER NOT NULL DEFAULT 0,
            routing_mode        TEXT NOT NULL DEFAULT 'REGIONAL',
            mtu                 INTEGER NOT NULL DEFAULT 1460,
            created_at          TEXT NOT NULL,
            UNIQUE (project_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subnetworks (
            id                      TEXT PRIMARY KEY,
            network_id              TEXT NOT NULL,
            name                    TEXT NOT NULL,
            region                  TEXT NOT NULL,
            cidr                    TEXT NOT NULL,
            gateway_ip              TEXT NOT NULL,
            private_google_access   INTEGER NOT NULL DEFAULT 0,
            next_ip_index           INTEGER NOT NULL DEFAULT 2,
            UNIQUE (network_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS network_interfaces (
            id           TEXT PRIMARY KEY,
            instance_id  TEXT NOT NULL,
            network_id   TEXT NOT NULL,
            subnet_id    TEXT NOT NULL,
            name         TEXT NOT NULL,
            internal_ip  TEXT NOT NULL,
            nic_index    INTEGER NOT NULL,
            created_at   TEXT NOT NULL,
            UNIQUE (instance_id, nic_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS addresses (
            id                  TEXT PRIMARY KEY,
            project_id          TEXT NOT NULL,
            region              TEXT NOT NULL,
            name                TEXT,
            ip                  TEXT NOT NULL,
            status              TEXT NOT NULL,
            network_tier        TEXT NOT NULL DEFAULT 'PREMIUM',
            user_instance_id    TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS firewall_rules (
            id            TEXT PRIMARY KEY,
            network_id    TEXT NOT NULL,
            name          TEXT NOT NULL,
            priority      INTEGER NOT NULL,
            direction     TEXT NOT NULL,
            action        TEXT NOT NULL,
            protocols_json TEXT NOT NULL,
            source_ranges_json TEXT NOT NULL DEFAULT '[]',
            dest_ranges_json   TEXT NOT NULL DEFAULT '[]',
            source_tags_json   TEXT NOT NULL DEFAULT '[]',
            target_tags_json   TEXT NOT NULL DEFAULT '[]',
            UNIQUE (network_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS routes (
            id          TEXT PRIMARY KEY,
            network_id  TEXT NOT NULL,
            name        TEXT NOT NULL,
            dest_range  TEXT NOT NULL,
            priority    INTEGER NOT NULL DEFAULT 1000,
            next_hop_type TEXT NOT NULL,
            next_hop_value TEXT,
            tags_json   TEXT NOT NULL DEFAULT '[]',
            UNIQUE (network_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vpc_peerings (
            id                    TEXT PRIMARY KEY,
            network_id            TEXT NOT NULL,
            name                  TEXT NOT NULL,
            peer_network_id       TEXT NOT NULL,
            state                 TEXT NOT NULL DEFAULT 'ACTIVE',
            auto_create_routes    INTEGER NOT NULL DEFAULT 1,
            exchange_subnet_routes INTEGER NOT NULL DEFAULT 1,
            UNIQUE (network_id, name),
            UNIQUE (network_id, peer_network_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS routers (
            id          TEXT PRIMARY KEY,
            network_id  TEXT NOT NULL,
            name        TEXT NOT NULL,
            region      TEXT NOT NULL,
            bgp_asn     INTEGER NOT NULL,
            keepalive_sec INTEGER NOT NULL DEFAULT 20,
            UNIQUE (network_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vpn_tunnels (
            id           TEXT PRIMARY KEY,
            network_id   TEXT NOT NULL,
            name         TEXT NOT NULL,
            region       TEXT NOT NULL,
            peer_ip      TEXT NOT NULL,
            gateway_ip   TEXT NOT NULL,
            shared_secret TEXT NOT NULL,
            status       TEXT NOT NULL DEFAULT 'PROVISIONING',
            UNIQUE (network_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS service_accounts (
            email         TEXT PRIMARY KEY,
            project_id    TEXT NOT NULL,
            display_name  TEXT NOT NULL,
            unique_id     TEXT NOT NULL,
            disabled      INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS service_account_keys (
            id                TEXT PRIMARY KEY,
            service_account_email TEXT NOT NULL,
            private_key_data  TEXT NOT NULL,
            key_algorithm     TEXT NOT NULL DEFAULT 'KEY_ALG_RSA_2048',
            valid_after       TEXT NOT NULL,
            valid_before      TEXT NOT NULL,
            disabled          INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS iam_policies (
            resource_type TEXT NOT NULL,
            resource_id   TEXT NOT NULL,
            version       INTEGER NOT NULL DEFAULT 1,
            etag          TEXT NOT NULL,
            bindings_json TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (resource_type, resource_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS api_keys (
            id          TEXT PRIMARY KEY,
            key_hash    TEXT NOT NULL UNIQUE,
            project_id  TEXT NOT NULL,
            name        TEXT,
            created_at  TEXT NOT NULL,
            expires_at  TEXT,
            disabled    INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM projects")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }
}
