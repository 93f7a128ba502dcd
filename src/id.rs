//! Prefixed ID generation for keyhold entities.
//!
//! Format: `kh_{entity}_{uuid_simple}` (32 hex chars, no hyphens). The
//! entity tag makes a misplaced ID obvious in logs and admin requests.

use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    License,
    Product,
    ProductGroup,
    Feature,
    Release,
    CheckLog,
    AdminLog,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::License => "kh_lic",
            Self::Product => "kh_prod",
            Self::ProductGroup => "kh_grp",
            Self::Feature => "kh_feat",
            Self::Release => "kh_rel",
            Self::CheckLog => "kh_chk",
            Self::AdminLog => "kh_adm",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [EntityType; 7] = [
        EntityType::License,
        EntityType::Product,
        EntityType::ProductGroup,
        EntityType::Feature,
        EntityType::Release,
        EntityType::CheckLog,
        EntityType::AdminLog,
    ];

    #[test]
    fn test_id_format() {
        let id = EntityType::License.gen_id();
        assert!(id.starts_with("kh_lic_"));
        assert_eq!(id.len(), "kh_lic_".len() + 32);
    }

    #[test]
    fn test_all_prefixes_unique() {
        let mut seen = std::collections::HashSet::new();
        for entity in ALL {
            assert!(seen.insert(entity.prefix()), "Duplicate prefix: {}", entity.prefix());
        }
    }
}
