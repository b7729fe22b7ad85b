use anyhow::{Context, Result};

use ersatz::apk::ManifestApkIdReader;
use ersatz::cache::IndexCache;
use ersatz::checksum::PaddingFreeSha256;
use ersatz::metadata::{MetadataReader, YamlMetadataDir};
use ersatz::model::LocalAppOverride;
use ersatz::pipeline::{CancelFlag, Collaborators, Mirror};
use ersatz::prepare::GraphicsPublisher;
use ersatz::remote::RemoteClient;
use ersatz::store::write_atomic;

use crate::cli_runtime::MirrorContext;
use crate::{CacheCommands, Commands};

pub(crate) fn handle_command(
    ctx: &MirrorContext,
    command: Commands,
    cancel: CancelFlag,
) -> Result<()> {
    let client = RemoteClient::new(&ctx.config.http)?;
    let metadata = YamlMetadataDir::new(ctx.layout.metadata_dir());
    let checksums = PaddingFreeSha256;
    let preparer =
        GraphicsPublisher::new(&ctx.layout, &checksums, ctx.config.sanitize_icon_names);
    let apk_ids = ManifestApkIdReader;

    let mut config = ctx.config.clone();
    if let Commands::Update {
        jobs: Some(jobs), ..
    } = &command
    {
        config.jobs = (*jobs).max(1);
    }

    let mirror = Mirror {
        config: &config,
        layout: &ctx.layout,
        sources: &ctx.sources,
        names: &ctx.names,
        collab: Collaborators {
            metadata: &metadata,
            preparer: &preparer,
            index_fetcher: &client,
            asset_fetcher: &client,
            apk_ids: &apk_ids,
        },
        cancel,
    };

    match command {
        Commands::Update { output, json, .. } => {
            let report = mirror.run()?;
            let output = match output {
                Some(p) => p,
                None => ctx.layout.merged_apps_file(),
            };
            let bytes =
                serde_json::to_vec_pretty(&report.merged).context("serialize merged apps")?;
            write_atomic(&output, &bytes)
                .with_context(|| format!("write {}", output.display()))?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("serialize run report")?
                );
            } else {
                println!(
                    "Merged {} apps ({} downloaded, {} already present)",
                    report.merged.len(),
                    report.downloaded,
                    report.skipped
                );
                for app_id in &report.not_found {
                    println!("not found: {}", app_id);
                }
                for (app_id, reason) in &report.rejected {
                    println!("rejected: {}: {}", app_id, reason);
                }
                for (app_id, reason) in &report.failed {
                    println!("failed: {}: {}", app_id, reason);
                }
                println!("Wrote {}", output.display());
            }
        }

        Commands::Fetch { json } => {
            let (_, report) = mirror.fetch()?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("serialize fetch report")?
                );
            } else {
                for (url, outcome) in &report.outcomes {
                    println!("{:?}\t{}", outcome, url);
                }
            }
        }

        Commands::Show { app_id, refresh } => {
            let cache = if refresh {
                mirror.fetch()?.0
            } else {
                mirror.load_cache()?
            };
            let local = metadata
                .read_overrides()?
                .remove(&app_id)
                .unwrap_or_else(|| LocalAppOverride::new(app_id.clone(), Default::default()));
            let merged = mirror.merge_one(&cache, &local)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&merged).context("serialize merged app")?
            );
        }

        Commands::Cache { command } => match command {
            CacheCommands::Show { json } => {
                let cache = IndexCache::load(&ctx.layout.cache_file(), &ctx.sources)?;
                let rows: Vec<serde_json::Value> = cache
                    .urls()
                    .map(|url| {
                        let entry = cache.entry(url);
                        serde_json::json!({
                            "url": url,
                            "etag": entry.and_then(|e| e.etag.clone()),
                            "apps": entry
                                .and_then(|e| e.index.as_ref())
                                .map(|i| i.apps.len()),
                        })
                    })
                    .collect();
                if json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&rows).context("serialize cache json")?
                    );
                } else {
                    for row in rows {
                        println!(
                            "{}\tetag={}\tapps={}",
                            row["url"].as_str().unwrap_or_default(),
                            row["etag"].as_str().unwrap_or("-"),
                            row["apps"]
                        );
                    }
                }
            }
            CacheCommands::Clear => {
                let path = ctx.layout.cache_file();
                if path.exists() {
                    std::fs::remove_file(&path)
                        .with_context(|| format!("remove {}", path.display()))?;
                    println!("Removed {}", path.display());
                } else {
                    println!("No index cache at {}", path.display());
                }
            }
        },
    }

    Ok(())
}
