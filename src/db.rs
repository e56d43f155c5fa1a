//! Shared relational store: `wisp_domain`, `custom_domain`, `site` (spec
//! §3/§6). One Postgres database, shared by every edge instance in a
//! cluster; schema is versioned via `sqlx::migrate!` against
//! `migrations/`, in the manner of the teacher's
//! `src/database/migrations.rs`.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::Result;

/// Connect to `database_url` and run pending migrations.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        crate::error::EdgeError::StorageError(format!("migration failed: {e}"))
    })?;
    Ok(pool)
}

/// A platform-issued subdomain mapping.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WispDomainRow {
    /// Full domain (lowercased), e.g. `alice.wisp.place`.
    pub domain: String,
    /// Owning user id (DID).
    pub user_id: String,
    /// Mapped site name, if any.
    pub site_name: Option<String>,
}

/// A user-provided custom domain mapping.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CustomDomainRow {
    /// Low-order 16 hex digits of `sha256(user_id || ":" || domain)`.
    pub id: String,
    /// Full domain (lowercased), unique.
    pub domain: String,
    /// Owning user id (DID).
    pub user_id: String,
    /// Mapped site name, if any.
    pub site_name: Option<String>,
    /// Whether a TXT proof was observed within the reconciler horizon.
    pub verified: bool,
    /// Timestamp of the last reconciler pass that touched this row.
    pub last_verified_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A site's catalog row (display name only; the manifest and its tree
/// live in the PDS and the on-disk snapshot, not here).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SiteRow {
    /// Owning user id (DID).
    pub user_id: String,
    /// Site name.
    pub site_name: String,
    /// Display name from the manifest's `site` field, if known.
    pub display_name: Option<String>,
    /// Record key of the manifest that produced this row.
    pub rkey: String,
}

/// Look up a platform subdomain by its full hostname.
pub async fn lookup_wisp_domain(pool: &PgPool, domain: &str) -> Result<Option<WispDomainRow>> {
    let row = sqlx::query_as::<_, WispDomainRow>(
        "SELECT domain, user_id, site_name FROM wisp_domain WHERE domain = $1",
    )
    .bind(domain.to_ascii_lowercase())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Look up a verified custom domain by its full hostname.
pub async fn lookup_custom_domain_by_name(
    pool: &PgPool,
    domain: &str,
) -> Result<Option<CustomDomainRow>> {
    let row = sqlx::query_as::<_, CustomDomainRow>(
        "SELECT id, domain, user_id, site_name, verified, last_verified_at \
         FROM custom_domain WHERE domain = $1 AND verified = true",
    )
    .bind(domain.to_ascii_lowercase())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Look up a custom domain by its DNS-hash host label (no `verified`
/// filter -- the DNS-hash host is the stable CNAME target used *during*
/// verification, so it must resolve even for not-yet-verified domains).
pub async fn lookup_custom_domain_by_hash(
    pool: &PgPool,
    hash: &str,
) -> Result<Option<CustomDomainRow>> {
    let row = sqlx::query_as::<_, CustomDomainRow>(
        "SELECT id, domain, user_id, site_name, verified, last_verified_at \
         FROM custom_domain WHERE id = $1",
    )
    .bind(hash)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Every custom domain currently marked `verified`, for the DNS
/// verifier's periodic pass.
pub async fn list_verified_custom_domains(pool: &PgPool) -> Result<Vec<CustomDomainRow>> {
    let rows = sqlx::query_as::<_, CustomDomainRow>(
        "SELECT id, domain, user_id, site_name, verified, last_verified_at \
         FROM custom_domain WHERE verified = true",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Update a custom domain's verification state after a reconciler pass.
pub async fn set_custom_domain_verified(
    pool: &PgPool,
    id: &str,
    verified: bool,
) -> Result<()> {
    sqlx::query(
        "UPDATE custom_domain SET verified = $2, last_verified_at = now() WHERE id = $1",
    )
    .bind(id)
    .bind(verified)
    .execute(pool)
    .await?;
    Ok(())
}

/// Upsert a site's catalog row after a successful ingestion. Generic over
/// the executor so a caller holding the [`crate::lock`] advisory lock can
/// run this on that same pinned connection rather than a fresh one from
/// the pool.
pub async fn upsert_site<'e, E>(
    executor: E,
    user_id: &str,
    site_name: &str,
    display_name: &str,
    rkey: &str,
) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO site (user_id, site_name, display_name, rkey, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, now(), now()) \
         ON CONFLICT (user_id, site_name) \
         DO UPDATE SET display_name = EXCLUDED.display_name, rkey = EXCLUDED.rkey, updated_at = now()",
    )
    .bind(user_id)
    .bind(site_name)
    .bind(display_name)
    .bind(rkey)
    .execute(executor)
    .await?;
    Ok(())
}

/// Every known site, for the optional one-shot backfill procedure.
pub async fn list_all_sites(pool: &PgPool) -> Result<Vec<SiteRow>> {
    let rows = sqlx::query_as::<_, SiteRow>(
        "SELECT user_id, site_name, display_name, rkey FROM site",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Look up a site's catalog row by its primary key, for the dispatcher's
/// on-demand materialize path (a domain mapping resolved but the site was
/// never cached, e.g. after a fresh deploy with an empty disk cache).
pub async fn find_site(pool: &PgPool, user_id: &str, site_name: &str) -> Result<Option<SiteRow>> {
    let row = sqlx::query_as::<_, SiteRow>(
        "SELECT user_id, site_name, display_name, rkey FROM site WHERE user_id = $1 AND site_name = $2",
    )
    .bind(user_id)
    .bind(site_name)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Find the site a delete event's `(did, rkey)` belongs to. A delete
/// event carries no site name, only the record key that was deleted.
pub async fn find_site_by_rkey(pool: &PgPool, user_id: &str, rkey: &str) -> Result<Option<SiteRow>> {
    let row = sqlx::query_as::<_, SiteRow>(
        "SELECT user_id, site_name, display_name, rkey FROM site WHERE user_id = $1 AND rkey = $2",
    )
    .bind(user_id)
    .bind(rkey)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Remove a site's catalog row (used on confirmed deletion).
pub async fn remove_site(pool: &PgPool, user_id: &str, site_name: &str) -> Result<()> {
    sqlx::query("DELETE FROM site WHERE user_id = $1 AND site_name = $2")
        .bind(user_id)
        .bind(site_name)
        .execute(pool)
        .await?;
    Ok(())
}

/// Compute the `custom_domain.id` for a `(user_id, domain)` pair: the
/// low-order 16 hex digits of `sha256(user_id || ":" || domain)`.
pub fn custom_domain_id(user_id: &str, domain: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(format!("{user_id}:{domain}").as_bytes());
    let hex = hex::encode(digest);
    hex[hex.len() - 16..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_domain_id_is_deterministic_16_hex_chars() {
        let a = custom_domain_id("did:plc:u1", "example.com");
        let b = custom_domain_id("did:plc:u1", "example.com");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn custom_domain_id_differs_per_domain() {
        assert_ne!(
            custom_domain_id("did:plc:u1", "a.com"),
            custom_domain_id("did:plc:u1", "b.com")
        );
    }
}
