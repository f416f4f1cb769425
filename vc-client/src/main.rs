use std::path::PathBuf;

use anyhow::{Context, Result};
use bevy::log::LogPlugin;
use bevy::prelude::*;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vc_avatar::AvatarPlugin;
use vc_net::DefaultAssetSource;
use vc_render::CompositorPlugin;
use vc_utils::{CompanionConfig, companion_assets_root};

mod debug_ui;
mod decode;
mod host;
mod loader;
mod plugins;
mod preloader;
mod progress;

use decode::MemoryAssetsPlugin;
use plugins::{ClientCorePlugin, ClientDebugPlugin};

#[derive(Parser, Debug)]
#[command(name = "vc-client", about = "Virtual companion renderer")]
struct Args {
    /// TOML config file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    humanoid: Option<String>,
    #[arg(long)]
    animation: Option<String>,
    #[arg(long)]
    point_cloud: Option<String>,
    /// Open the debug overlay at startup (F3 toggles it).
    #[arg(long)]
    debug: bool,
}

fn load_config(args: &Args) -> Result<CompanionConfig> {
    let mut config = match &args.config {
        Some(path) => CompanionConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CompanionConfig::default(),
    };
    if let Some(url) = &args.humanoid {
        config.humanoid_url = url.clone();
    }
    if let Some(url) = &args.animation {
        config.animation_url = Some(url.clone());
    }
    if let Some(url) = &args.point_cloud {
        config.point_cloud.url = Some(url.clone());
    }
    if args.debug {
        config.debug_overlay = true;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .without_time()
        .compact()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let assets_root = companion_assets_root();
    let source = DefaultAssetSource::shared(assets_root.clone())
        .context("failed to set up the asset source")?;
    info!(
        root = %assets_root.display(),
        humanoid = %config.humanoid_url,
        "starting companion"
    );

    App::new()
        .add_plugins(MemoryAssetsPlugin::default())
        .add_plugins(
            DefaultPlugins
                .set(AssetPlugin {
                    file_path: assets_root.to_string_lossy().into_owned(),
                    ..default()
                })
                .set(WindowPlugin {
                    primary_window: Some(Window {
                        title: "Companion".into(),
                        ..default()
                    }),
                    ..default()
                })
                .disable::<LogPlugin>(),
        )
        .add_plugins((
            ClientCorePlugin::new(config, source),
            CompositorPlugin,
            AvatarPlugin,
            ClientDebugPlugin,
        ))
        .run();
    Ok(())
}
