//! `purge`

use anyhow::Result;
use colored::*;

use super::connect_store;
use crate::config::AppConfig;
use crate::pipeline::{DeleteMode, EntityStore};

pub async fn handle_purge(config: &AppConfig, entity_type: &str, mode: DeleteMode, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!(
            "Purging every '{}' entity ({:?}) needs --yes",
            entity_type,
            mode
        );
    }

    let store = connect_store(config).await?;
    let affected = store.purge_type(entity_type, mode).await?;
    let verb = match mode {
        DeleteMode::Logical => "Flagged",
        DeleteMode::Physical => "Deleted",
    };
    println!("{} {} {} rows", verb, affected.to_string().bright_green(), entity_type.cyan());
    Ok(())
}
