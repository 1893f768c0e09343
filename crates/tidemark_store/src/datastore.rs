use std::path::Path;

use tidemark_core::TidemarkResult;

use crate::{StoreBuilder, StoreConfig};

pub fn load_or_init_config(base: &Path) -> TidemarkResult<StoreConfig> {
    StoreConfig::load_or_init(base)
}

/// Builder over the config stored in `base`, writing a default sqlite config
/// the first time.
pub fn open_builder(base: &Path) -> TidemarkResult<StoreBuilder> {
    let config = load_or_init_config(base)?;
    Ok(StoreBuilder::new(config, base))
}
