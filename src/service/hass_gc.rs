use crate::opt_env_var;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Identifies a discovery config that we have published to hass
#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct PublishedEntity {
    pub unique_id: String,
    pub integration: String,
}

fn config_dir() -> anyhow::Result<PathBuf> {
    if let Some(dir) = opt_env_var::<PathBuf>("REMO_CONFIG_DIR")? {
        return Ok(dir);
    }
    Ok(dirs_next::config_dir()
        .ok_or_else(|| anyhow!("No config dir found"))?
        .join("remo2mqtt"))
}

fn persistence_path_in(dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    Ok(dir.join("hass-entities.json"))
}

pub fn load_published_entities() -> anyhow::Result<HashSet<PublishedEntity>> {
    load_published_entities_from(&config_dir()?)
}

pub fn save_published_entities(entities: &HashSet<PublishedEntity>) -> anyhow::Result<()> {
    save_published_entities_to(&config_dir()?, entities)
}

fn load_published_entities_from(dir: &Path) -> anyhow::Result<HashSet<PublishedEntity>> {
    let path = persistence_path_in(dir)?;
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let data = std::fs::read_to_string(path)?;
    if data.is_empty() {
        return Ok(HashSet::new());
    }
    let entities: HashSet<PublishedEntity> = serde_json::from_str(&data)?;
    Ok(entities)
}

fn save_published_entities_to(
    dir: &Path,
    entities: &HashSet<PublishedEntity>,
) -> anyhow::Result<()> {
    let path = persistence_path_in(dir)?;
    let data = serde_json::to_string_pretty(entities)?;
    std::fs::write(path, data)?;
    Ok(())
}

/// Returns the entities that were published previously but
/// are not part of the current set, in a stable order.
pub fn stale_entities(
    previous: &HashSet<PublishedEntity>,
    current: &HashSet<PublishedEntity>,
) -> Vec<PublishedEntity> {
    let mut stale: Vec<_> = previous.difference(current).cloned().collect();
    stale.sort();
    stale
}
