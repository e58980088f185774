use std::{fs, path::Path, sync::Arc};

use color_eyre::eyre::{Context, Result};
use serde::Serialize;
use tessera_backends::memory::MemoryFeatureStore;
use tessera_chain::FilterChain;
use tessera_dispatch::{
    Config, DispatchOutput, DispatchRequest, SessionContext, StoreSubsetSink, load_config,
};
use tessera_tasks::{
    raster::{FileRasterCatalog, MemoryRasterCatalog},
    tasks::{
        ClipOptions, ClipSnapshot, ClipTask, EnvelopeClipProcessor, ExpressionEvaluationTask,
        RangeMaskTask, RasterStatisticsTask,
    },
};
use tracing::info;

use crate::{args::Command, run::run_task};

pub fn config_from(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => Ok(Config::default()),
    }
}

fn uri(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("serialize output")
}

fn load_store(path: &Path) -> Result<MemoryFeatureStore> {
    let store = MemoryFeatureStore::load(path)?;
    info!(datasets = ?store.dataset_ids(), "Loaded datasets");
    Ok(store)
}

/// Run one CLI command, returning what should be printed.
pub async fn run_command(command: Command, config: Config) -> Result<String> {
    match command {
        Command::Build { chain, dialect } => {
            let content = fs::read_to_string(&chain).with_context(|| format!("read {chain:?}"))?;
            let value = serde_json::from_str(&content).with_context(|| format!("parse {chain:?}"))?;
            let chain = FilterChain::from_structured(value)?;
            Ok(chain.build_expression(dialect))
        }

        Command::Stats {
            raster,
            band,
            sample_size,
        } => {
            let session = SessionContext::with_memory_store(config, &MemoryFeatureStore::new())?;
            let mut snapshot = session.stats_snapshot(&uri(&raster), band);
            if let Some(n) = sample_size {
                snapshot = snapshot.with_sample_size(n);
            }
            let task = RasterStatisticsTask::new(snapshot, Arc::new(FileRasterCatalog::new()));
            to_json(&run_task(session.scheduler(), task).await?)
        }

        Command::Mask {
            raster,
            band,
            min,
            max,
            output_dir,
        } => {
            let session = SessionContext::with_memory_store(config, &MemoryFeatureStore::new())?;
            let task = RangeMaskTask::new(
                session.range_mask_snapshot(&uri(&raster), band, min, max),
                Arc::new(FileRasterCatalog::new()),
                MemoryRasterCatalog::new(),
                FileRasterCatalog::rooted(output_dir),
            );
            to_json(&run_task(session.scheduler(), task).await?)
        }

        Command::Clip {
            raster,
            datasets,
            mask,
            output,
            crop,
            all_touched,
        } => {
            let store = load_store(&datasets)?;
            let session = SessionContext::with_memory_store(config, &store)?;
            let options = ClipOptions {
                crop_to_mask: crop,
                all_touched,
            };
            let task = ClipTask::new(
                ClipSnapshot::new(uri(&raster), mask, uri(&output)).with_options(options),
                Arc::new(FileRasterCatalog::new()),
                Arc::new(store.clone()),
                session.features(),
                Arc::new(EnvelopeClipProcessor),
                FileRasterCatalog::new(),
            );
            to_json(&run_task(session.scheduler(), task).await?)
        }

        Command::Evaluate {
            datasets,
            dataset,
            expression,
            fields,
            limit,
        } => {
            let store = load_store(&datasets)?;
            let session = SessionContext::with_memory_store(config, &store)?;
            let mut snapshot = session.evaluation_snapshot(&dataset, &expression)?;
            if let Some(fields) = fields {
                snapshot = snapshot.with_fields(fields);
            }
            if let Some(limit) = limit {
                snapshot = snapshot.with_limit(limit);
            }
            let task = ExpressionEvaluationTask::new(snapshot, session.features());
            to_json(&run_task(session.scheduler(), task).await?)
        }

        Command::Dispatch { datasets, request } => {
            let store = load_store(&datasets)?;
            let content =
                fs::read_to_string(&request).with_context(|| format!("read {request:?}"))?;
            let request: DispatchRequest =
                serde_json::from_str(&content).with_context(|| format!("parse {request:?}"))?;

            let session = SessionContext::with_memory_store(config, &store)?;
            let task = session.dispatch_task(request, Arc::new(StoreSubsetSink::new(store.clone())));
            let DispatchOutput { served, exported } = run_task(session.scheduler(), task).await?;

            info!(served_by = ?served.served_by, journal = session.journal().to_json_lines(), "Dispatched");
            match served.export {
                Some(_) => String::from_utf8(exported).context("exported rows are not utf-8"),
                None => to_json(&served),
            }
        }
    }
}
