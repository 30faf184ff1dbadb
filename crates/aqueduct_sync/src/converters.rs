//! Serde helpers for config fields.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Deserializes a plain seconds number into a [`Duration`].
pub fn deserialize_seconds_to_duration<'de, D>(de: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs: u64 = Deserialize::deserialize(de)?;
    Ok(Duration::from_secs(secs))
}
