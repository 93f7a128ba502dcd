//! Effective license-generation settings.
//!
//! Each field resolves on its own: a non-empty request override wins, then
//! the product's value, then its group's, then [`GenerationDefaults`]. The
//! result is baked into the license at generation time and never
//! re-resolved, so later product or group edits do not touch issued keys.

use crate::models::{LicenseTemplate, Product, ProductGroup};

/// Built-in fallbacks for every inheritable generation setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationDefaults {
    pub prefix: String,
    pub separator: String,
    /// Compact charset spec, see [`crate::keygen::parse_charset`].
    pub charset: String,
    pub length: usize,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            prefix: "LICENSE".to_string(),
            separator: "-".to_string(),
            charset: "a-z,A-Z,0-9".to_string(),
            length: 12,
        }
    }
}

/// Per-request overrides from the generate call.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub prefix: Option<String>,
    pub separator: Option<String>,
    pub charset: Option<String>,
    pub length: Option<i64>,
    pub auto_allowed_ip: Option<bool>,
    pub auto_allowed_ip_limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseSettings {
    pub prefix: String,
    pub separator: String,
    pub charset: String,
    pub length: usize,
    pub auto_allowed_ip: bool,
    pub auto_allowed_ip_limit: i64,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn positive(value: Option<i64>) -> Option<usize> {
    value.filter(|v| *v > 0).and_then(|v| usize::try_from(v).ok())
}

pub fn resolve_settings(
    product: &Product,
    group: Option<&ProductGroup>,
    overrides: &SettingsOverrides,
    defaults: &GenerationDefaults,
) -> LicenseSettings {
    let own = &product.template;
    let inherited = group.map(|g| &g.template);

    let pick = |request: Option<&str>, field: fn(&LicenseTemplate) -> &str, fallback: &str| {
        non_empty(request)
            .or_else(|| non_empty(Some(field(own))))
            .or_else(|| inherited.and_then(|t| non_empty(Some(field(t)))))
            .unwrap_or(fallback)
            .to_string()
    };

    // The product only wins for separator when it differs from the default,
    // so a group can still customise it for products left at "-".
    let separator = non_empty(overrides.separator.as_deref())
        .or_else(|| {
            non_empty(Some(own.license_separator.as_str())).filter(|s| *s != defaults.separator)
        })
        .or_else(|| inherited.and_then(|t| non_empty(Some(t.license_separator.as_str()))))
        .unwrap_or(defaults.separator.as_str())
        .to_string();

    let length = positive(overrides.length)
        .or_else(|| positive(Some(own.license_length)))
        .or_else(|| inherited.and_then(|t| positive(Some(t.license_length))))
        .unwrap_or(defaults.length);

    let (auto_allowed_ip, auto_allowed_ip_limit) = resolve_auto_allow(own, inherited, overrides);

    LicenseSettings {
        prefix: pick(
            overrides.prefix.as_deref(),
            |t| t.license_prefix.as_str(),
            defaults.prefix.as_str(),
        ),
        separator,
        charset: pick(
            overrides.charset.as_deref(),
            |t| t.license_charset.as_str(),
            defaults.charset.as_str(),
        ),
        length,
        auto_allowed_ip,
        auto_allowed_ip_limit,
    }
}

/// Auto-allow policy: request > product (when enabled) > group (when
/// enabled) > disabled. An explicit request flag without a limit borrows the
/// first positive limit from the product, then the group.
fn resolve_auto_allow(
    own: &LicenseTemplate,
    inherited: Option<&LicenseTemplate>,
    overrides: &SettingsOverrides,
) -> (bool, i64) {
    if let Some(enabled) = overrides.auto_allowed_ip {
        if !enabled {
            return (false, 0);
        }
        let limit = overrides
            .auto_allowed_ip_limit
            .filter(|l| *l > 0)
            .or(Some(own.auto_allowed_ip_limit).filter(|l| *l > 0))
            .or_else(|| inherited.map(|t| t.auto_allowed_ip_limit).filter(|l| *l > 0))
            .unwrap_or(0);
        return (true, limit);
    }
    if own.auto_allowed_ip {
        return (true, own.auto_allowed_ip_limit);
    }
    match inherited {
        Some(t) if t.auto_allowed_ip => (true, t.auto_allowed_ip_limit),
        _ => (false, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(template: LicenseTemplate) -> Product {
        Product {
            id: "kh_prod_1".into(),
            owner_id: None,
            name: "App".into(),
            description: String::new(),
            product_group_id: Some("kh_grp_1".into()),
            template,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn group(template: LicenseTemplate) -> ProductGroup {
        ProductGroup {
            id: "kh_grp_1".into(),
            owner_id: None,
            name: "Suite".into(),
            description: String::new(),
            template,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn full(prefix: &str, sep: &str, charset: &str, length: i64) -> LicenseTemplate {
        LicenseTemplate {
            license_prefix: prefix.into(),
            license_separator: sep.into(),
            license_charset: charset.into(),
            license_length: length,
            ..Default::default()
        }
    }

    fn resolve(p: &Product, g: Option<&ProductGroup>, o: &SettingsOverrides) -> LicenseSettings {
        resolve_settings(p, g, o, &GenerationDefaults::default())
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let s = resolve(&product(LicenseTemplate::default()), None, &SettingsOverrides::default());
        assert_eq!(s.prefix, "LICENSE");
        assert_eq!(s.separator, "-");
        assert_eq!(s.charset, "a-z,A-Z,0-9");
        assert_eq!(s.length, 12);
        assert!(!s.auto_allowed_ip);
        assert_eq!(s.auto_allowed_ip_limit, 0);
    }

    #[test]
    fn test_product_beats_group_beats_default_per_field() {
        let g = group(full("GRP", "_", "A-F", 20));

        let s = resolve(&product(full("PRD", "", "", 0)), Some(&g), &SettingsOverrides::default());
        assert_eq!(s.prefix, "PRD");
        assert_eq!(s.separator, "_");
        assert_eq!(s.charset, "A-F");
        assert_eq!(s.length, 20);

        let s = resolve(&product(full("", "", "0-9", 8)), Some(&g), &SettingsOverrides::default());
        assert_eq!(s.prefix, "GRP");
        assert_eq!(s.charset, "0-9");
        assert_eq!(s.length, 8);

        let s = resolve(&product(full("", "", "", 0)), None, &SettingsOverrides::default());
        assert_eq!(s.prefix, "LICENSE");
    }

    #[test]
    fn test_every_presence_combination_for_prefix() {
        let defaults = GenerationDefaults::default();
        for product_set in [false, true] {
            for group_set in [false, true] {
                for request_set in [false, true] {
                    let p = product(full(if product_set { "P" } else { "" }, "", "", 0));
                    let g = group(full(if group_set { "G" } else { "" }, "", "", 0));
                    let o = SettingsOverrides {
                        prefix: request_set.then(|| "R".to_string()),
                        ..Default::default()
                    };
                    let expected = if request_set {
                        "R"
                    } else if product_set {
                        "P"
                    } else if group_set {
                        "G"
                    } else {
                        "LICENSE"
                    };
                    assert_eq!(resolve_settings(&p, Some(&g), &o, &defaults).prefix, expected);
                }
            }
        }
    }

    #[test]
    fn test_request_overrides_win() {
        let g = group(full("GRP", "_", "A-F", 20));
        let o = SettingsOverrides {
            prefix: Some("REQ".into()),
            separator: Some(".".into()),
            charset: Some("x".into()),
            length: Some(4),
            ..Default::default()
        };
        let s = resolve(&product(full("PRD", "#", "0-9", 8)), Some(&g), &o);
        assert_eq!(s.prefix, "REQ");
        assert_eq!(s.separator, ".");
        assert_eq!(s.charset, "x");
        assert_eq!(s.length, 4);
    }

    #[test]
    fn test_empty_or_zero_overrides_are_ignored() {
        let o = SettingsOverrides {
            prefix: Some(String::new()),
            length: Some(0),
            ..Default::default()
        };
        let s = resolve(&product(full("PRD", "", "", 10)), None, &o);
        assert_eq!(s.prefix, "PRD");
        assert_eq!(s.length, 10);
    }

    #[test]
    fn test_default_product_separator_yields_to_group() {
        let g = group(full("", "_", "", 0));
        let s = resolve(&product(full("", "-", "", 0)), Some(&g), &SettingsOverrides::default());
        assert_eq!(s.separator, "_");

        let s = resolve(&product(full("", "#", "", 0)), Some(&g), &SettingsOverrides::default());
        assert_eq!(s.separator, "#");
    }

    fn auto(enabled: bool, limit: i64) -> LicenseTemplate {
        LicenseTemplate {
            auto_allowed_ip: enabled,
            auto_allowed_ip_limit: limit,
            ..Default::default()
        }
    }

    #[test]
    fn test_auto_allow_product_enabled_wins() {
        let s = resolve(&product(auto(true, 5)), Some(&group(auto(true, 10))), &SettingsOverrides::default());
        assert!(s.auto_allowed_ip);
        assert_eq!(s.auto_allowed_ip_limit, 5);
    }

    #[test]
    fn test_auto_allow_inherits_group_when_product_unset() {
        let s = resolve(&product(auto(false, 0)), Some(&group(auto(true, 10))), &SettingsOverrides::default());
        assert!(s.auto_allowed_ip);
        assert_eq!(s.auto_allowed_ip_limit, 10);
    }

    #[test]
    fn test_auto_allow_request_limit_overrides_group() {
        let o = SettingsOverrides {
            auto_allowed_ip: Some(true),
            auto_allowed_ip_limit: Some(3),
            ..Default::default()
        };
        let s = resolve(&product(auto(false, 0)), Some(&group(auto(true, 10))), &o);
        assert!(s.auto_allowed_ip);
        assert_eq!(s.auto_allowed_ip_limit, 3);
    }

    #[test]
    fn test_auto_allow_request_without_limit_borrows_inherited_limit() {
        let o = SettingsOverrides {
            auto_allowed_ip: Some(true),
            ..Default::default()
        };
        let s = resolve(&product(auto(false, 0)), Some(&group(auto(false, 7))), &o);
        assert_eq!((s.auto_allowed_ip, s.auto_allowed_ip_limit), (true, 7));
    }

    #[test]
    fn test_auto_allow_request_can_disable() {
        let o = SettingsOverrides {
            auto_allowed_ip: Some(false),
            ..Default::default()
        };
        let s = resolve(&product(auto(true, 5)), None, &o);
        assert_eq!((s.auto_allowed_ip, s.auto_allowed_ip_limit), (false, 0));
    }

    #[test]
    fn test_auto_allow_disabled_everywhere() {
        let s = resolve(&product(auto(false, 4)), Some(&group(auto(false, 9))), &SettingsOverrides::default());
        assert_eq!((s.auto_allowed_ip, s.auto_allowed_ip_limit), (false, 0));
    }
}
