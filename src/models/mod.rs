mod audit_log;
mod catalog;
mod license;
mod product;
mod product_group;
mod stats;

pub use audit_log::*;
pub use catalog::*;
pub use license::*;
pub use product::*;
pub use product_group::*;
pub use stats::*;

use serde::{Deserialize, Deserializer};

/// Deserialize a double Option field where:
/// - Field absent in JSON → None (don't update)
/// - Field present with null → Some(None) (set to NULL in DB)
/// - Field present with value → Some(Some(value)) (set to value)
pub(crate) fn deserialize_optional_nullable<'de, D, T>(
    deserializer: D,
) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let value: Option<T> = Option::deserialize(deserializer)?;
    Ok(Some(value))
}
