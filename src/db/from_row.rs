//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql, types::Type};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?
        .parse::<T>()
        .map_err(|_| rusqlite::Error::InvalidColumnType(col, col_name.to_string(), Type::Text))
}

fn parse_optional_enum<T: std::str::FromStr>(
    row: &Row,
    col: usize,
    col_name: &str,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(col)? {
        Some(s) => s
            .parse::<T>()
            .map(Some)
            .map_err(|_| rusqlite::Error::InvalidColumnType(col, col_name.to_string(), Type::Text)),
        None => Ok(None),
    }
}

/// Decode a JSON-text column.
fn parse_json<T: serde::de::DeserializeOwned>(row: &Row, col: usize) -> rusqlite::Result<T> {
    let text: String = row.get(col)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, Type::Text, Box::new(e)))
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const PRODUCT_GROUP_COLS: &str = "id, owner_id, name, description, license_prefix, license_separator, license_charset, license_length, license_type, license_duration, auto_allowed_ip, auto_allowed_ip_limit, created_at, updated_at";

pub const PRODUCT_COLS: &str = "id, owner_id, name, description, product_group_id, license_prefix, license_separator, license_charset, license_length, license_type, license_duration, auto_allowed_ip, auto_allowed_ip_limit, created_at, updated_at";

pub const FEATURE_COLS: &str =
    "id, owner_id, product_id, product_group_id, name, code, description, created_at";

pub const RELEASE_COLS: &str = "id, owner_id, product_id, product_group_id, version, created_at";

pub const LICENSE_COLS: &str = "id, key, owner_id, license_type, product_id, allowed_ips, allowed_networks, auto_allowed_ip, auto_allowed_ip_limit, expires_at, features, releases, status, created_at, updated_at";

pub const CHECK_LOG_COLS: &str = "id, license_key, license_id, product_id, owner_id, request, response, ip_address, user_agent, status_code, created_at";

pub const ADMIN_LOG_COLS: &str =
    "id, action, entity_type, entity_id, owner_id, details, created_at";

// ============ FromRow Implementations ============

/// Reads the eight template columns starting at `start`.
fn template_from_row(row: &Row, start: usize) -> rusqlite::Result<LicenseTemplate> {
    Ok(LicenseTemplate {
        license_prefix: row.get(start)?,
        license_separator: row.get(start + 1)?,
        license_charset: row.get(start + 2)?,
        license_length: row.get(start + 3)?,
        license_type: parse_optional_enum(row, start + 4, "license_type")?,
        license_duration: row.get(start + 5)?,
        auto_allowed_ip: row.get(start + 6)?,
        auto_allowed_ip_limit: row.get(start + 7)?,
    })
}

impl FromRow for ProductGroup {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ProductGroup {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            template: template_from_row(row, 4)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            product_group_id: row.get(4)?,
            template: template_from_row(row, 5)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }
}

impl FromRow for Feature {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Feature {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            product_id: row.get(2)?,
            product_group_id: row.get(3)?,
            name: row.get(4)?,
            code: row.get(5)?,
            description: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

impl FromRow for Release {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Release {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            product_id: row.get(2)?,
            product_group_id: row.get(3)?,
            version: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for License {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            key: row.get(1)?,
            owner_id: row.get(2)?,
            license_type: parse_enum(row, 3, "license_type")?,
            product_id: row.get(4)?,
            allowed_ips: parse_json(row, 5)?,
            allowed_networks: parse_json(row, 6)?,
            auto_allowed_ip: row.get(7)?,
            auto_allowed_ip_limit: row.get(8)?,
            expires_at: row.get(9)?,
            features: parse_json(row, 10)?,
            releases: parse_json(row, 11)?,
            status: parse_enum(row, 12, "status")?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }
}

impl FromRow for LicenseCheckLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(LicenseCheckLog {
            id: row.get(0)?,
            license_key: row.get(1)?,
            license_id: row.get(2)?,
            product_id: row.get(3)?,
            owner_id: row.get(4)?,
            request: parse_json(row, 5)?,
            response: parse_json(row, 6)?,
            ip_address: row.get(7)?,
            user_agent: row.get(8)?,
            status_code: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

impl FromRow for AdminLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let details: Option<String> = row.get(5)?;
        Ok(AdminLog {
            id: row.get(0)?,
            action: parse_enum(row, 1, "action")?,
            entity_type: parse_enum(row, 2, "entity_type")?,
            entity_id: row.get(3)?,
            owner_id: row.get(4)?,
            details: details.and_then(|s| serde_json::from_str(&s).ok()),
            created_at: row.get(6)?,
        })
    }
}
