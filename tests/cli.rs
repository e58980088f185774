mod common;

use std::fs;

use color_eyre::Result;
use ctor::ctor;
use serde_json::Value;
use tempfile::TempDir;
use tessera::{args::Command, commands::run_command};
use tessera_chain::{CombinationStrategy, FilterChain};
use tessera_dispatch::{
    Config, DispatchRequest,
    request::{ExportRequest, SpatialRequest},
};
use tessera_filter_types::{
    descriptor::{DatasetDescriptor, ProviderKind},
    dialect::Dialect,
    fragment::{FilterFragment, FragmentKind},
    spatial::SpatialPredicate,
};
use test_case::test_case;

use common::{init_test_tracing, write_datasets, write_raster};

#[ctor]
fn init() {
    init_test_tracing();
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        write_datasets(&dir.path().join("datasets.json"));
        write_raster(&dir.path().join("dem.tsr"));
        Self { dir }
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    fn write_request(&self, request: &DispatchRequest) -> std::path::PathBuf {
        let path = self.path("request.json");
        fs::write(&path, serde_json::to_vec(request).unwrap()).unwrap();
        path
    }
}

fn parcels() -> DatasetDescriptor {
    DatasetDescriptor::new("parcels", ProviderKind::Memory, "parcels")
}

fn roads() -> DatasetDescriptor {
    DatasetDescriptor::new("roads", ProviderKind::Memory, "roads")
}

#[test_case(Dialect::Postgresql)]
#[test_case(Dialect::Expression)]
#[tokio::test]
async fn build_prints_saved_chain_expression(dialect: Dialect) -> Result<()> {
    let fixture = Fixture::new();
    let mut chain = FilterChain::new("parcels", CombinationStrategy::PriorityAnd);
    chain.add(FilterFragment::new(FragmentKind::FieldCondition, "zone = 'A'", "zone"), false);
    chain.add(FilterFragment::new(FragmentKind::FidList, "\"fid\" IN (1, 2)", "selection"), false);

    let path = fixture.path("chain.json");
    fs::write(&path, serde_json::to_vec(&chain.to_structured()?)?)?;

    let output = run_command(Command::Build { chain: path, dialect }, Config::default()).await?;
    assert_eq!(output, chain.build_expression(dialect));
    assert!(output.contains("zone = 'A'"));
    Ok(())
}

#[tokio::test]
async fn stats_scans_small_raster() -> Result<()> {
    let fixture = Fixture::new();
    let command = Command::Stats {
        raster: fixture.path("dem.tsr"),
        band: 1,
        sample_size: None,
    };

    let output: Value = serde_json::from_str(&run_command(command, Config::default()).await?)?;
    assert_eq!(output["was_sampled"], false);
    assert_eq!(output["total_pixels"], 16);
    assert_eq!(output["statistics"]["min"], 0.0);
    assert_eq!(output["statistics"]["max"], 15.0);
    Ok(())
}

#[tokio::test]
async fn stats_on_missing_raster_fails() {
    let fixture = Fixture::new();
    let command = Command::Stats {
        raster: fixture.path("nope.tsr"),
        band: 1,
        sample_size: None,
    };
    assert!(run_command(command, Config::default()).await.is_err());
}

#[tokio::test]
async fn mask_derives_rules_for_both_tails() -> Result<()> {
    let fixture = Fixture::new();
    let command = Command::Mask {
        raster: fixture.path("dem.tsr"),
        band: 1,
        min: 5.0,
        max: 10.0,
        output_dir: fixture.path(""),
    };

    let output: Value = serde_json::from_str(&run_command(command, Config::default()).await?)?;
    assert_eq!(output["rules"].as_array().map(Vec::len), Some(2));
    assert_eq!(output["output"]["strategy"], "memory");
    Ok(())
}

#[tokio::test]
async fn clip_writes_cropped_raster() -> Result<()> {
    let fixture = Fixture::new();
    let output_path = fixture.path("clipped.tsr");
    let command = Command::Clip {
        raster: fixture.path("dem.tsr"),
        datasets: fixture.path("datasets.json"),
        mask: "mask".to_string(),
        output: output_path.clone(),
        crop: true,
        all_touched: false,
    };

    let output: Value = serde_json::from_str(&run_command(command, Config::default()).await?)?;
    assert_eq!((output["width"].as_u64(), output["height"].as_u64()), (Some(2), Some(2)));
    assert!(output_path.exists());
    Ok(())
}

#[tokio::test]
async fn evaluate_stops_at_limit() -> Result<()> {
    let fixture = Fixture::new();
    let command = Command::Evaluate {
        datasets: fixture.path("datasets.json"),
        dataset: "parcels".to_string(),
        expression: "zone = 'B'".to_string(),
        fields: Some(vec!["area".to_string()]),
        limit: Some(2),
    };

    let output: Value = serde_json::from_str(&run_command(command, Config::default()).await?)?;
    assert_eq!(output["feature_ids"], serde_json::json!([1, 3]));
    assert_eq!(output["rows"][1]["area"], 30.0);
    assert_eq!(output["truncated"], true);
    Ok(())
}

#[test_case(true, "modern" ; "modern pipeline")]
#[test_case(false, "legacy" ; "pipeline disabled")]
#[tokio::test]
async fn dispatch_spatial_filter(enabled: bool, served_by: &str) -> Result<()> {
    let fixture = Fixture::new();
    let request = fixture.write_request(&DispatchRequest::SpatialFilter(SpatialRequest {
        target: parcels(),
        source: roads(),
        predicate: SpatialPredicate::intersects(),
        operator: None,
    }));

    let mut config = Config::default();
    config.modern_pipeline.enabled = enabled;
    let command = Command::Dispatch {
        datasets: fixture.path("datasets.json"),
        request,
    };

    let output: Value = serde_json::from_str(&run_command(command, config).await?)?;
    assert_eq!(output["served_by"], served_by);
    assert_eq!(output["applications"][0]["expression"], r#""fid" IN (2, 3, 4)"#);
    Ok(())
}

#[tokio::test]
async fn dispatch_export_prints_json_lines() -> Result<()> {
    let fixture = Fixture::new();
    let request = fixture.write_request(&DispatchRequest::Export(ExportRequest {
        target: parcels(),
        expression: Some("zone = 'A'".to_string()),
        fields: Some(vec!["zone".to_string()]),
    }));
    let command = Command::Dispatch {
        datasets: fixture.path("datasets.json"),
        request,
    };

    let output = run_command(command, Config::default()).await?;
    let rows: Vec<Value> = output
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0], serde_json::json!({"fid": 0, "zone": "A"}));
    Ok(())
}
