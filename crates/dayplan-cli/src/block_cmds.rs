//! Handlers for `dayplan block` subcommands.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use dayplan_core::PlanService;
use dayplan_core::collab::StaticAnchorProvider;
use dayplan_core::store::PlanStore;

use crate::BlockCommands;
use crate::config::DayplanConfig;

pub async fn run_block_command(
    command: BlockCommands,
    config: &DayplanConfig,
    store: Arc<dyn PlanStore>,
) -> Result<()> {
    let service = PlanService::with_default_estimators(
        Arc::new(StaticAnchorProvider::default()),
        store,
        &config.scheduler,
    );

    match command {
        BlockCommands::MergeMetadata {
            user,
            block_id,
            patch,
        } => {
            let patch = parse_patch(&patch)?;
            let block = service.merge_block_metadata(&user, block_id, &patch).await?;

            println!("Metadata of block {} updated.", block.id);
            println!(
                "{}",
                serde_json::to_string_pretty(&block.metadata)
                    .context("failed to serialize metadata")?
            );
            Ok(())
        }
    }
}

fn parse_patch(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("patch is not valid JSON: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_patch_accepts_objects_and_reports_garbage() {
        let value = parse_patch(r#"{"note": "bring charger", "mood": null}"#).unwrap();
        assert_eq!(value["note"], "bring charger");
        assert!(value["mood"].is_null());

        let err = parse_patch("{note: x}").unwrap_err();
        assert!(err.to_string().contains("not valid JSON"), "{err:#}");
    }
}
