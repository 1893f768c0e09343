use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{AdjustType, IntervalLevel, TidemarkError, TidemarkResult, Timestamp};

pub const ENTITY_ID_DELIMITER: char = '_';

/// Natural key of an entity: `{entity_type}_{exchange}_{code}`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: String,
    pub exchange: String,
    pub code: String,
}

impl EntityKey {
    pub fn new(
        entity_type: impl Into<String>,
        exchange: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            exchange: exchange.into(),
            code: code.into(),
        }
    }

    pub fn entity_id(&self) -> String {
        encode_entity_id(&self.entity_type, &self.exchange, &self.code)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.entity_id())
    }
}

pub fn encode_entity_id(entity_type: &str, exchange: &str, code: &str) -> String {
    format!("{entity_type}{ENTITY_ID_DELIMITER}{exchange}{ENTITY_ID_DELIMITER}{code}")
}

/// Splits an entity id into its natural key. Everything after the exchange is the
/// code, delimiters included.
pub fn decode_entity_id(entity_id: &str) -> TidemarkResult<EntityKey> {
    let mut parts = entity_id.splitn(3, ENTITY_ID_DELIMITER);
    let entity_type = parts.next().unwrap_or_default();
    let Some(exchange) = parts.next() else {
        return Err(TidemarkError::invalid(format!(
            "entity id '{entity_id}' needs at least entity type and exchange"
        )));
    };
    let code = parts.next().unwrap_or_default();
    Ok(EntityKey::new(entity_type, exchange, code))
}

pub fn code_of(entity_id: &str) -> TidemarkResult<String> {
    Ok(decode_entity_id(entity_id)?.code)
}

/// Deterministic record id used as the de-duplication key: calendar date for
/// daily and coarser bars, full date-time with offset below a day.
pub fn record_id(entity_id: &str, timestamp: Timestamp, level: IntervalLevel) -> TidemarkResult<String> {
    let suffix = if level.is_daily_or_coarser() {
        timestamp.format_day()?
    } else {
        timestamp.format_iso8601()?
    };
    Ok(format!("{entity_id}{ENTITY_ID_DELIMITER}{suffix}"))
}

/// Typed lookup key for bar schemas.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SchemaKey {
    pub entity_type: String,
    pub level: IntervalLevel,
    pub adjust_type: Option<AdjustType>,
}

impl SchemaKey {
    pub fn new(
        entity_type: impl Into<String>,
        level: IntervalLevel,
        adjust_type: Option<AdjustType>,
    ) -> Self {
        Self {
            entity_type: entity_type.into().to_lowercase(),
            level,
            adjust_type: adjust_type.filter(|adjust| !adjust.is_default()),
        }
    }

    /// `Capitalize(entity_type) + Capitalize(level) + [Capitalize(adjust)] + "Kdata"`.
    pub fn schema_name(&self) -> String {
        let mut name = capitalize(&self.entity_type);
        name.push_str(&capitalize(self.level.as_str()));
        if let Some(adjust) = self.adjust_type {
            name.push_str(&capitalize(adjust.as_str()));
        }
        name.push_str("Kdata");
        name
    }

    pub fn table_name(&self) -> String {
        let mut table = format!("{}_{}", self.entity_type, self.level.as_str());
        if let Some(adjust) = self.adjust_type {
            table.push('_');
            table.push_str(adjust.as_str());
        }
        table.push_str("_kdata");
        table
    }
}

pub fn kdata_schema_name(
    entity_type: &str,
    level: IntervalLevel,
    adjust_type: Option<AdjustType>,
) -> String {
    SchemaKey::new(entity_type, level, adjust_type).schema_name()
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_roundtrips_well_formed_ids() {
        let key = decode_entity_id("stock_sh_600000").expect("decode");
        assert_eq!(key, EntityKey::new("stock", "sh", "600000"));
        assert_eq!(key.entity_id(), "stock_sh_600000");
    }

    #[test]
    fn decode_keeps_delimiters_inside_code() {
        let key = decode_entity_id("future_shfe_rb_2405_c").expect("decode");
        assert_eq!(key.entity_type, "future");
        assert_eq!(key.exchange, "shfe");
        assert_eq!(key.code, "rb_2405_c");
        assert_eq!(key.entity_id(), "future_shfe_rb_2405_c");
    }

    #[test]
    fn decode_rejects_single_token() {
        assert!(decode_entity_id("stock").is_err());
        let key = decode_entity_id("country_galaxy").expect("two tokens");
        assert_eq!(key.code, "");
    }

    #[test]
    fn record_id_is_deterministic() {
        let ts = Timestamp::parse("2024-01-02T07:00:00Z").expect("ts");
        let first = record_id("stock_sh_600000", ts, IntervalLevel::Day1).expect("id");
        let second = record_id("stock_sh_600000", ts, IntervalLevel::Day1).expect("id");
        assert_eq!(first, second);
        assert_eq!(first, "stock_sh_600000_2024-01-02");

        let intraday = record_id("stock_sh_600000", ts, IntervalLevel::Min30).expect("id");
        assert_eq!(intraday, "stock_sh_600000_2024-01-02T07:00:00.000000+00:00");
    }

    #[test]
    fn schema_names_follow_kdata_rule() {
        assert_eq!(
            kdata_schema_name("stock", IntervalLevel::Day1, None),
            "Stock1dKdata"
        );
        assert_eq!(
            kdata_schema_name("stock", IntervalLevel::Day1, Some(AdjustType::Qfq)),
            "Stock1dKdata"
        );
        assert_eq!(
            kdata_schema_name("stock", IntervalLevel::Week1, Some(AdjustType::Hfq)),
            "Stock1wkHfqKdata"
        );
        assert_eq!(
            SchemaKey::new("Index", IntervalLevel::Min30, None).table_name(),
            "index_30m_kdata"
        );
    }
}
