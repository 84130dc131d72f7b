use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nav_core::baker::test_support::FlatPlaneProbe;
use nav_core::baker::{bake_section, BakeParams};
use nav_core::coords::{SceneId, SectionAddress, SectionKey};
use nav_core::registry::Registry;
use nav_runtime::asset_provider::FsBlobLoader;
use nav_runtime::dashboard::{self, DashboardState};
use nav_runtime::manifest::{Manifest, SectionDefinition, SubsceneDefinition};
use nav_runtime::streaming::StreamingSystem;

/// Coordinator tick rate when no `--tick-ms` is given.
const DEFAULT_TICK_MS: u64 = 50;

#[tokio::main]
async fn main() {
    let demo_mode = std::env::args().any(|a| a == "--demo");
    let dashboard_port: u16 = std::env::args()
        .skip_while(|a| a != "--dashboard-port")
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(8000);
    let tick_ms: u64 = std::env::args()
        .skip_while(|a| a != "--tick-ms")
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_TICK_MS);
    let assets_dir: PathBuf = std::env::args()
        .skip_while(|a| a != "--assets-dir")
        .nth(1)
        .unwrap_or_else(|| "assets".into())
        .into();
    let manifest_path: PathBuf = std::env::args()
        .skip_while(|a| a != "--manifest")
        .nth(1)
        .unwrap_or_else(|| "manifest.json".into())
        .into();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    tracing::info!("nav-runtime -- streaming coordinator");

    if demo_mode {
        tracing::info!("Baking demo section into {}...", assets_dir.display());
        if let Err(e) = bake_demo_assets(&assets_dir, &manifest_path) {
            tracing::error!("Demo bake failed: {:#}", e);
            return;
        }
    }

    let manifest = match Manifest::load_from_path(&manifest_path) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("Failed to load manifest {}: {}", manifest_path.display(), e);
            return;
        }
    };
    tracing::info!("Manifest loaded: {} sections", manifest.section_count());

    let loader = FsBlobLoader { root: assets_dir.clone() };
    let registry = Arc::new(Registry::new());
    let mut system = match StreamingSystem::new(loader, Arc::clone(&registry), 16) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to start streaming system: {}", e);
            return;
        }
    };

    // Start live dashboard (non-blocking -- runs on its own tasks).
    let dashboard_state = Arc::new(DashboardState::new());
    let dash = Arc::clone(&dashboard_state);
    tokio::spawn(async move {
        dashboard::server::start(dash, dashboard_port).await;
    });
    tokio::spawn(dashboard::forward_events(Arc::clone(&dashboard_state), system.subscribe()));

    let addresses: Vec<SectionAddress> = manifest
        .subscenes()
        .iter()
        .flat_map(|s| &s.sections)
        .filter_map(|s| s.address().ok())
        .collect();
    for addr in &addresses {
        system.request_load(*addr);
    }

    tracing::info!("Streaming {} sections, dashboard on http://0.0.0.0:{}", addresses.len(), dashboard_port);

    // ── Coordinator loop ─────────────────────────────────────────────────
    let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let start = Instant::now();
                system.tick();
                dashboard_state.metrics.record_tick(start.elapsed());
                dashboard_state.set_sections_resident(system.loaded_count() as u64);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down...");
                break;
            }
        }
    }

    // ── Unload everything on the way out ──────────────────────────────────
    for addr in &addresses {
        system.request_unload(*addr);
    }
    for _ in 0..addresses.len() + 1 {
        system.tick();
    }
    tracing::info!("Shutdown complete: {} sections still resident", system.loaded_count());
}

/// Bakes a single flat-plane section into `assets_dir` and writes a matching
/// manifest to `manifest_path`, so `--demo` has something to stream without
/// requiring a real baked asset pack on disk.
fn bake_demo_assets(assets_dir: &std::path::Path, manifest_path: &std::path::Path) -> anyhow::Result<()> {
    let section_key = SectionKey::new(0, 0, 0);
    let (ext_x, _ext_y, ext_z) = nav_core::lattice::section_extents();
    let probe = FlatPlaneProbe::new(0.0, (-1.0, ext_x + 1.0), (-1.0, ext_z + 1.0));
    let bytes = bake_section(section_key, &probe, &BakeParams::default())
        .ok_or_else(|| anyhow::anyhow!("demo bake produced an empty section"))?;

    let scene = SceneId::from_bytes([0x42; 16]);
    let section_id = section_key.pack().map_err(|e| anyhow::anyhow!("{e}"))?;
    let addr = SectionAddress::new(scene, section_id);
    let resource_key = addr.resource_key();

    let blob_path = assets_dir.join(&resource_key);
    std::fs::create_dir_all(blob_path.parent().unwrap())?;
    std::fs::write(&blob_path, &bytes)?;

    let manifest = Manifest::from_subscenes(vec![SubsceneDefinition {
        scene_id: scene.to_string(),
        scene_path: "Scenes/Demo".to_string(),
        sections: vec![SectionDefinition {
            scene_id: scene.to_string(),
            section_id: section_id.0,
            resource_key,
        }],
    }]);
    std::fs::write(manifest_path, serde_json::to_string_pretty(manifest.subscenes())?)?;
    Ok(())
}
