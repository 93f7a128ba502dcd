use chrono::Utc;
use rusqlite::{Connection, ToSql, params, types::Value};

use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    ADMIN_LOG_COLS, CHECK_LOG_COLS, FEATURE_COLS, FromRow, LICENSE_COLS, PRODUCT_COLS,
    PRODUCT_GROUP_COLS, RELEASE_COLS, query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Set a column to an explicit value (including NULL).
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.fields.push((column, v.into())),
            None => self.fields.push((column, Value::Null)),
        }
        self
    }

    fn set_template(self, template: &UpdateLicenseTemplate) -> Self {
        let mut builder = self
            .set_opt("license_prefix", template.license_prefix.clone())
            .set_opt("license_separator", template.license_separator.clone())
            .set_opt("license_charset", template.license_charset.clone())
            .set_opt("license_length", template.license_length)
            .set_opt("auto_allowed_ip", template.auto_allowed_ip)
            .set_opt("auto_allowed_ip_limit", template.auto_allowed_ip_limit);
        if let Some(ref license_type) = template.license_type {
            builder = builder.set_nullable(
                "license_type",
                license_type.map(|t| t.as_ref().to_string()),
            );
        }
        if let Some(ref duration) = template.license_duration {
            builder = builder.set_nullable("license_duration", duration.clone());
        }
        builder
    }

    /// Execute the update and return the updated entity using RETURNING clause.
    /// With no fields to change, returns the current row unchanged.
    fn execute_returning<T: FromRow>(
        mut self,
        conn: &Connection,
        returning_cols: &str,
    ) -> Result<Option<T>> {
        if self.fields.is_empty() {
            return query_one(
                conn,
                &format!("SELECT {} FROM {} WHERE id = ?1", returning_cols, self.table),
                &[&self.id],
            );
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ? RETURNING {}",
            self.table,
            sets.join(", "),
            returning_cols
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(rusqlite::params_from_iter(values), T::from_row)?;
        Ok(rows.next().transpose()?)
    }
}

/// Accumulates `AND` filters together with their bound values so COUNT
/// and SELECT share one WHERE clause.
#[derive(Default)]
struct Filter {
    clauses: Vec<&'static str>,
    values: Vec<Value>,
}

impl Filter {
    fn eq(mut self, clause: &'static str, value: Option<impl Into<Value>>) -> Self {
        if let Some(v) = value {
            self.clauses.push(clause);
            self.values.push(v.into());
        }
        self
    }

    fn raw(mut self, clause: &'static str, enabled: bool) -> Self {
        if enabled {
            self.clauses.push(clause);
        }
        self
    }

    fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn refs(&self) -> Vec<&dyn ToSql> {
        self.values.iter().map(|v| v as &dyn ToSql).collect()
    }

    fn paginate<T: FromRow>(
        &self,
        conn: &Connection,
        table: &str,
        cols: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<T>, i64)> {
        let where_clause = self.where_clause();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} {}", table, where_clause),
            self.refs().as_slice(),
            |row| row.get(0),
        )?;

        let mut select_params = self.refs();
        select_params.push(&limit);
        select_params.push(&offset);
        let items = query_all(
            conn,
            &format!(
                "SELECT {} FROM {} {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
                cols, table, where_clause
            ),
            &select_params,
        )?;
        Ok((items, total))
    }

    fn count(&self, conn: &Connection, table: &str) -> Result<i64> {
        Ok(conn.query_row(
            &format!("SELECT COUNT(*) FROM {} {}", table, self.where_clause()),
            self.refs().as_slice(),
            |row| row.get(0),
        )?)
    }
}

fn to_json_list(items: &[String]) -> Result<String> {
    Ok(serde_json::to_string(items)?)
}

// ============ Product Groups ============

pub fn create_product_group(conn: &Connection, input: &CreateProductGroup) -> Result<ProductGroup> {
    let id = EntityType::ProductGroup.gen_id();
    let now = now();
    let t = &input.template;
    conn.execute(
        "INSERT INTO product_groups (id, owner_id, name, description, license_prefix, license_separator, license_charset, license_length, license_type, license_duration, auto_allowed_ip, auto_allowed_ip_limit, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        params![
            &id,
            &input.owner_id,
            input.name.trim(),
            &input.description,
            &t.license_prefix,
            &t.license_separator,
            &t.license_charset,
            t.license_length,
            t.license_type.map(|lt| lt.as_ref().to_string()),
            &t.license_duration,
            t.auto_allowed_ip,
            t.auto_allowed_ip_limit,
            now,
        ],
    )?;

    Ok(ProductGroup {
        id,
        owner_id: input.owner_id.clone(),
        name: input.name.trim().to_string(),
        description: input.description.clone(),
        template: t.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_product_group_by_id(conn: &Connection, id: &str) -> Result<Option<ProductGroup>> {
    query_one(
        conn,
        &format!("SELECT {} FROM product_groups WHERE id = ?1", PRODUCT_GROUP_COLS),
        &[&id],
    )
}

pub fn list_product_groups_paginated(
    conn: &Connection,
    owner_id: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<ProductGroup>, i64)> {
    Filter::default()
        .eq("owner_id = ?", owner_id.map(str::to_string))
        .paginate(conn, "product_groups", PRODUCT_GROUP_COLS, limit, offset)
}

pub fn update_product_group(
    conn: &Connection,
    id: &str,
    input: &UpdateProductGroup,
) -> Result<Option<ProductGroup>> {
    UpdateBuilder::new("product_groups", id)
        .with_updated_at()
        .set_opt("name", input.name.as_ref().map(|n| n.trim().to_string()))
        .set_opt("description", input.description.clone())
        .set_template(&input.template)
        .execute_returning(conn, PRODUCT_GROUP_COLS)
}

/// Products of the group are detached (`ON DELETE SET NULL`), not deleted.
pub fn delete_product_group(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM product_groups WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

// ============ Products ============

pub fn create_product(conn: &Connection, input: &CreateProduct) -> Result<Product> {
    let id = EntityType::Product.gen_id();
    let now = now();
    let t = &input.template;
    conn.execute(
        "INSERT INTO products (id, owner_id, name, description, product_group_id, license_prefix, license_separator, license_charset, license_length, license_type, license_duration, auto_allowed_ip, auto_allowed_ip_limit, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
        params![
            &id,
            &input.owner_id,
            input.name.trim(),
            &input.description,
            &input.product_group_id,
            &t.license_prefix,
            &t.license_separator,
            &t.license_charset,
            t.license_length,
            t.license_type.map(|lt| lt.as_ref().to_string()),
            &t.license_duration,
            t.auto_allowed_ip,
            t.auto_allowed_ip_limit,
            now,
        ],
    )?;

    Ok(Product {
        id,
        owner_id: input.owner_id.clone(),
        name: input.name.trim().to_string(),
        description: input.description.clone(),
        product_group_id: input.product_group_id.clone(),
        template: t.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_product_by_id(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS),
        &[&id],
    )
}

pub fn list_products_paginated(
    conn: &Connection,
    owner_id: Option<&str>,
    product_group_id: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Product>, i64)> {
    Filter::default()
        .eq("owner_id = ?", owner_id.map(str::to_string))
        .eq("product_group_id = ?", product_group_id.map(str::to_string))
        .paginate(conn, "products", PRODUCT_COLS, limit, offset)
}

pub fn update_product(
    conn: &Connection,
    id: &str,
    input: &UpdateProduct,
) -> Result<Option<Product>> {
    let mut builder = UpdateBuilder::new("products", id)
        .with_updated_at()
        .set_opt("name", input.name.as_ref().map(|n| n.trim().to_string()))
        .set_opt("description", input.description.clone())
        .set_template(&input.template);
    if let Some(ref group_id) = input.product_group_id {
        builder = builder.set_nullable("product_group_id", group_id.clone());
    }
    builder.execute_returning(conn, PRODUCT_COLS)
}

pub fn delete_product(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM products WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

pub fn count_licenses_for_product(conn: &Connection, product_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM licenses WHERE product_id = ?1",
        params![product_id],
        |row| row.get(0),
    )?)
}

// ============ Features ============

pub fn create_feature(conn: &Connection, input: &CreateFeature) -> Result<Feature> {
    let id = EntityType::Feature.gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO features (id, owner_id, product_id, product_group_id, name, code, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &id,
            &input.owner_id,
            &input.product_id,
            &input.product_group_id,
            input.name.trim(),
            input.code.trim(),
            &input.description,
            now,
        ],
    )?;

    Ok(Feature {
        id,
        owner_id: input.owner_id.clone(),
        product_id: input.product_id.clone(),
        product_group_id: input.product_group_id.clone(),
        name: input.name.trim().to_string(),
        code: input.code.trim().to_string(),
        description: input.description.clone(),
        created_at: now,
    })
}

pub fn get_feature_by_id(conn: &Connection, id: &str) -> Result<Option<Feature>> {
    query_one(
        conn,
        &format!("SELECT {} FROM features WHERE id = ?1", FEATURE_COLS),
        &[&id],
    )
}

fn catalog_filter(query: &CatalogListQuery) -> Filter {
    Filter::default()
        .eq("product_id = ?", query.product_id.clone())
        .eq("product_group_id = ?", query.product_group_id.clone())
        .eq("owner_id = ?", query.owner_id.clone())
        .raw(
            "product_id IS NULL AND product_group_id IS NULL",
            query.global,
        )
}

pub fn list_features_paginated(
    conn: &Connection,
    query: &CatalogListQuery,
) -> Result<(Vec<Feature>, i64)> {
    let page = query.page();
    catalog_filter(query).paginate(conn, "features", FEATURE_COLS, page.limit(), page.offset())
}

pub fn update_feature(conn: &Connection, id: &str, input: &UpdateFeature) -> Result<Option<Feature>> {
    UpdateBuilder::new("features", id)
        .set_opt("name", input.name.as_ref().map(|n| n.trim().to_string()))
        .set_opt("code", input.code.as_ref().map(|c| c.trim().to_string()))
        .set_opt("description", input.description.clone())
        .execute_returning(conn, FEATURE_COLS)
}

pub fn delete_feature(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM features WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

// ============ Releases ============

pub fn create_release(conn: &Connection, input: &CreateRelease) -> Result<Release> {
    let id = EntityType::Release.gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO releases (id, owner_id, product_id, product_group_id, version, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &id,
            &input.owner_id,
            &input.product_id,
            &input.product_group_id,
            input.version.trim(),
            now,
        ],
    )?;

    Ok(Release {
        id,
        owner_id: input.owner_id.clone(),
        product_id: input.product_id.clone(),
        product_group_id: input.product_group_id.clone(),
        version: input.version.trim().to_string(),
        created_at: now,
    })
}

pub fn get_release_by_id(conn: &Connection, id: &str) -> Result<Option<Release>> {
    query_one(
        conn,
        &format!("SELECT {} FROM releases WHERE id = ?1", RELEASE_COLS),
        &[&id],
    )
}

pub fn list_releases_paginated(
    conn: &Connection,
    query: &CatalogListQuery,
) -> Result<(Vec<Release>, i64)> {
    let page = query.page();
    catalog_filter(query).paginate(conn, "releases", RELEASE_COLS, page.limit(), page.offset())
}

pub fn update_release(conn: &Connection, id: &str, input: &UpdateRelease) -> Result<Option<Release>> {
    UpdateBuilder::new("releases", id)
        .set("version", input.version.trim().to_string())
        .execute_returning(conn, RELEASE_COLS)
}

pub fn delete_release(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM releases WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

/// Keep only the requested values that exist in `table` for the product,
/// its group, or globally. Request order is kept and duplicates dropped.
fn confirm_scoped(
    conn: &Connection,
    sql: &str,
    product: &Product,
    requested: &[String],
) -> Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(sql)?;
    let available = stmt
        .query_map(params![&product.id, &product.product_group_id], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<std::result::Result<std::collections::HashSet<_>, _>>()?;

    let mut confirmed: Vec<String> = Vec::with_capacity(requested.len());
    for value in requested {
        let value = value.trim();
        if available.contains(value) && !confirmed.iter().any(|c| c == value) {
            confirmed.push(value.to_string());
        }
    }
    Ok(confirmed)
}

pub fn confirm_feature_codes(
    conn: &Connection,
    product: &Product,
    codes: &[String],
) -> Result<Vec<String>> {
    confirm_scoped(
        conn,
        "SELECT code FROM features
         WHERE product_id = ?1 OR product_group_id = ?2
            OR (product_id IS NULL AND product_group_id IS NULL)",
        product,
        codes,
    )
}

pub fn confirm_release_versions(
    conn: &Connection,
    product: &Product,
    versions: &[String],
) -> Result<Vec<String>> {
    confirm_scoped(
        conn,
        "SELECT version FROM releases
         WHERE product_id = ?1 OR product_group_id = ?2
            OR (product_id IS NULL AND product_group_id IS NULL)",
        product,
        versions,
    )
}

// ============ Licenses ============

pub fn create_license(conn: &Connection, license: &License) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO licenses ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            LICENSE_COLS
        ),
        params![
            &license.id,
            &license.key,
            &license.owner_id,
            license.license_type.as_ref(),
            &license.product_id,
            to_json_list(&license.allowed_ips)?,
            to_json_list(&license.allowed_networks)?,
            license.auto_allowed_ip,
            license.auto_allowed_ip_limit,
            license.expires_at,
            to_json_list(&license.features)?,
            to_json_list(&license.releases)?,
            license.status.as_ref(),
            license.created_at,
            license.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get_license_by_key(conn: &Connection, key: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE key = ?1", LICENSE_COLS),
        &[&key],
    )
}

pub fn list_licenses_paginated(
    conn: &Connection,
    owner_id: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<License>, i64)> {
    Filter::default()
        .eq("owner_id = ?", owner_id.map(str::to_string))
        .paginate(conn, "licenses", LICENSE_COLS, limit, offset)
}

/// Overwrite the mutable fields of the license with `license.key`.
/// Returns false when no row matched.
pub fn update_license(conn: &Connection, license: &License) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE licenses SET license_type = ?2, allowed_ips = ?3, allowed_networks = ?4,
                auto_allowed_ip = ?5, auto_allowed_ip_limit = ?6, expires_at = ?7,
                features = ?8, releases = ?9, status = ?10, updated_at = ?11
         WHERE key = ?1",
        params![
            &license.key,
            license.license_type.as_ref(),
            to_json_list(&license.allowed_ips)?,
            to_json_list(&license.allowed_networks)?,
            license.auto_allowed_ip,
            license.auto_allowed_ip_limit,
            license.expires_at,
            to_json_list(&license.features)?,
            to_json_list(&license.releases)?,
            license.status.as_ref(),
            license.updated_at,
        ],
    )?;
    Ok(updated > 0)
}

pub fn delete_license_by_key(conn: &Connection, key: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM licenses WHERE key = ?1", params![key])?;
    Ok(deleted > 0)
}

/// Append `ip` to the license's allow-list if auto-allow is on, the list is
/// below its limit, and the address is not already present. The guard and
/// the append happen in one statement, so concurrent checks cannot push the
/// list past the limit. Returns true when the address was appended.
pub fn admit_allowed_ip(conn: &Connection, key: &str, ip: &str) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE licenses
         SET allowed_ips = json_insert(allowed_ips, '$[#]', ?2), updated_at = ?3
         WHERE key = ?1
           AND auto_allowed_ip = 1
           AND json_array_length(allowed_ips) < auto_allowed_ip_limit
           AND NOT EXISTS (SELECT 1 FROM json_each(licenses.allowed_ips) WHERE value = ?2)",
        params![key, ip, now()],
    )?;
    Ok(updated > 0)
}

// ============ Audit Logs ============

pub fn create_check_log(conn: &Connection, log: &LicenseCheckLog) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO license_check_logs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            CHECK_LOG_COLS
        ),
        params![
            &log.id,
            &log.license_key,
            &log.license_id,
            &log.product_id,
            &log.owner_id,
            serde_json::to_string(&log.request)?,
            serde_json::to_string(&log.response)?,
            &log.ip_address,
            &log.user_agent,
            log.status_code,
            log.created_at,
        ],
    )?;
    Ok(())
}

pub fn create_admin_log(conn: &Connection, log: &AdminLog) -> Result<()> {
    let details = log.details.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        &format!(
            "INSERT INTO admin_logs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            ADMIN_LOG_COLS
        ),
        params![
            &log.id,
            log.action.as_ref(),
            log.entity_type.as_ref(),
            &log.entity_id,
            &log.owner_id,
            details,
            log.created_at,
        ],
    )?;
    Ok(())
}

pub fn list_check_logs(conn: &Connection, query: &CheckLogQuery) -> Result<(Vec<LicenseCheckLog>, i64)> {
    let page = query.page();
    Filter::default()
        .eq("license_key = ?", query.license_key.clone())
        .eq("product_id = ?", query.product_id.clone())
        .eq("status_code = ?", query.status_code)
        .paginate(conn, "license_check_logs", CHECK_LOG_COLS, page.limit(), page.offset())
}

pub fn list_admin_logs(conn: &Connection, query: &AdminLogQuery) -> Result<(Vec<AdminLog>, i64)> {
    let page = query.page();
    Filter::default()
        .eq("owner_id = ?", query.owner_id.clone())
        .eq("action = ?", query.action.map(|a| a.as_ref().to_string()))
        .paginate(conn, "admin_logs", ADMIN_LOG_COLS, page.limit(), page.offset())
}

/// Delete audit entries created before `cutoff`. Returns rows removed.
pub fn purge_audit_logs_before(conn: &Connection, cutoff: i64) -> Result<usize> {
    let checks = conn.execute(
        "DELETE FROM license_check_logs WHERE created_at < ?1",
        params![cutoff],
    )?;
    let actions = conn.execute("DELETE FROM admin_logs WHERE created_at < ?1", params![cutoff])?;
    Ok(checks + actions)
}

// ============ Stats ============

/// Catalogue counters from the main database.
pub fn count_catalog_stats(
    conn: &Connection,
    owner_id: Option<&str>,
    now: i64,
) -> Result<(i64, i64, i64)> {
    let owned = || Filter::default().eq("owner_id = ?", owner_id.map(str::to_string));
    let products = owned().count(conn, "products")?;
    let licenses = owned().count(conn, "licenses")?;
    let active = owned()
        .raw("status = 'active'", true)
        .eq("(expires_at IS NULL OR expires_at >= ?)", Some(now))
        .count(conn, "licenses")?;
    Ok((products, licenses, active))
}

/// Audit counters since `since`: (checks, failed checks, admin actions).
pub fn count_audit_stats(
    conn: &Connection,
    owner_id: Option<&str>,
    since: i64,
) -> Result<(i64, i64, i64)> {
    let base = || {
        Filter::default()
            .eq("owner_id = ?", owner_id.map(str::to_string))
            .eq("created_at >= ?", Some(since))
    };
    let checks = base().count(conn, "license_check_logs")?;
    let failed = base()
        .raw(
            "(status_code <> 200 OR json_extract(response, '$.valid') = 0)",
            true,
        )
        .count(conn, "license_check_logs")?;
    let actions = base().count(conn, "admin_logs")?;
    Ok((checks, failed, actions))
}
