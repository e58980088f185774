use std::{fs, path::Path};

use collection_macros::btreemap;
use serde_json::{Map, Value};
use tessera_backends::{
    memory::MemoryDataset,
    registry::Feature,
};
use tessera_filter_types::{
    descriptor::{DatasetDescriptor, ProviderKind},
    spatial::{Envelope, GeometryType},
};
use tessera_tasks::raster::RasterData;

/// Initialize test infrastructure with color_eyre and tracing.
/// Call this from a #[ctor] function in each test file.
pub fn init_test_tracing() {
    use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    color_eyre::install().unwrap();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_test_writer())
        .init();
}

fn feature(id: i64, envelope: Envelope, zone: &str) -> Feature {
    let attributes: Map<String, Value> = btreemap! {
        "zone" => Value::from(zone),
        "area" => Value::from(id as f64 * 10.0),
    }
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    Feature {
        id,
        envelope,
        attributes,
    }
}

/// Ten unit squares along the x axis alternating zones A and B, a road crossing squares 2, 3
/// and 4, and a polygon mask over `[1, 3] x [1, 3]`.
pub fn write_datasets(path: &Path) {
    let squares = (0..10)
        .map(|i| {
            let x = i as f64 * 2.0;
            let zone = if i % 2 == 0 { "A" } else { "B" };
            feature(i, Envelope::new(x, 0.0, x + 1.0, 1.0), zone)
        })
        .collect();

    let datasets = vec![
        MemoryDataset::new(
            DatasetDescriptor::new("parcels", ProviderKind::Memory, "parcels"),
            GeometryType::Polygon,
        )
        .with_features(squares),
        MemoryDataset::new(
            DatasetDescriptor::new("roads", ProviderKind::Memory, "roads"),
            GeometryType::Line,
        )
        .with_features(vec![feature(1, Envelope::new(4.5, 0.5, 8.5, 0.6), "-")])
        .indexed(),
        MemoryDataset::new(
            DatasetDescriptor::new("mask", ProviderKind::Memory, "mask"),
            GeometryType::Polygon,
        )
        .with_features(vec![feature(1, Envelope::new(1.0, 1.0, 3.0, 3.0), "-")]),
    ];
    fs::write(path, serde_json::to_vec(&datasets).unwrap()).unwrap();
}

/// A 4x4 single band raster over `[0, 4] x [0, 4]` whose samples are their own index.
pub fn write_raster(path: &Path) {
    let raster = RasterData::new(
        4,
        4,
        Envelope::new(0.0, 0.0, 4.0, 4.0),
        vec![(0..16).map(f64::from).collect()],
    );
    fs::write(path, raster.encode()).unwrap();
}
