use rusqlite::Connection;

/// Initialize the main database schema (everything except audit logs)
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Product groups: fallback license-generation defaults
        CREATE TABLE IF NOT EXISTS product_groups (
            id TEXT PRIMARY KEY,
            owner_id TEXT,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            license_prefix TEXT NOT NULL DEFAULT '',
            license_separator TEXT NOT NULL DEFAULT '',
            license_charset TEXT NOT NULL DEFAULT '',
            license_length INTEGER NOT NULL DEFAULT 0,
            license_type TEXT CHECK (license_type IN ('perpetual', 'timed', 'trial')),
            license_duration TEXT,
            auto_allowed_ip INTEGER NOT NULL DEFAULT 0,
            auto_allowed_ip_limit INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_product_groups_owner ON product_groups(owner_id);

        -- Products: deleting a group only detaches its products
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            owner_id TEXT,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            product_group_id TEXT REFERENCES product_groups(id) ON DELETE SET NULL,
            license_prefix TEXT NOT NULL DEFAULT '',
            license_separator TEXT NOT NULL DEFAULT '',
            license_charset TEXT NOT NULL DEFAULT '',
            license_length INTEGER NOT NULL DEFAULT 0,
            license_type TEXT CHECK (license_type IN ('perpetual', 'timed', 'trial')),
            license_duration TEXT,
            auto_allowed_ip INTEGER NOT NULL DEFAULT 0,
            auto_allowed_ip_limit INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_products_owner ON products(owner_id);
        CREATE INDEX IF NOT EXISTS idx_products_group ON products(product_group_id);

        -- Features: scoped to one product, one group, or global (neither)
        CREATE TABLE IF NOT EXISTS features (
            id TEXT PRIMARY KEY,
            owner_id TEXT,
            product_id TEXT REFERENCES products(id) ON DELETE CASCADE,
            product_group_id TEXT REFERENCES product_groups(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            CHECK (product_id IS NULL OR product_group_id IS NULL)
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_features_scope_code
            ON features(code, COALESCE(product_id, ''), COALESCE(product_group_id, ''));

        -- Releases: same scoping rules as features
        CREATE TABLE IF NOT EXISTS releases (
            id TEXT PRIMARY KEY,
            owner_id TEXT,
            product_id TEXT REFERENCES products(id) ON DELETE CASCADE,
            product_group_id TEXT REFERENCES product_groups(id) ON DELETE CASCADE,
            version TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            CHECK (product_id IS NULL OR product_group_id IS NULL)
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_releases_scope_version
            ON releases(version, COALESCE(product_id, ''), COALESCE(product_group_id, ''));

        -- Licenses: settings are baked in at generation time.
        -- List columns hold JSON arrays of strings.
        CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            key TEXT NOT NULL UNIQUE,
            owner_id TEXT,
            license_type TEXT NOT NULL CHECK (license_type IN ('perpetual', 'timed', 'trial')),
            product_id TEXT NOT NULL REFERENCES products(id) ON DELETE RESTRICT,
            allowed_ips TEXT NOT NULL DEFAULT '[]',
            allowed_networks TEXT NOT NULL DEFAULT '[]',
            auto_allowed_ip INTEGER NOT NULL DEFAULT 0,
            auto_allowed_ip_limit INTEGER NOT NULL DEFAULT 0,
            expires_at INTEGER,
            features TEXT NOT NULL DEFAULT '[]',
            releases TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'revoked', 'expired')),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_licenses_product ON licenses(product_id);
        CREATE INDEX IF NOT EXISTS idx_licenses_owner ON licenses(owner_id);
        "#,
    )?;
    Ok(())
}

/// Initialize the audit database schema (separate file to isolate growth)
pub fn init_audit_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS license_check_logs (
            id TEXT PRIMARY KEY,
            license_key TEXT NOT NULL,
            license_id TEXT,
            product_id TEXT,
            owner_id TEXT,
            request TEXT NOT NULL,
            response TEXT NOT NULL,
            ip_address TEXT,
            user_agent TEXT,
            status_code INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_check_logs_key ON license_check_logs(license_key);
        CREATE INDEX IF NOT EXISTS idx_check_logs_product ON license_check_logs(product_id);
        CREATE INDEX IF NOT EXISTS idx_check_logs_created ON license_check_logs(created_at);

        CREATE TABLE IF NOT EXISTS admin_logs (
            id TEXT PRIMARY KEY,
            action TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT,
            owner_id TEXT,
            details TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_admin_logs_owner ON admin_logs(owner_id);
        CREATE INDEX IF NOT EXISTS idx_admin_logs_created ON admin_logs(created_at);
        "#,
    )?;
    Ok(())
}
