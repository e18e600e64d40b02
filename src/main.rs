use anyhow::Result;
use vstage::catalog::Catalog;
use vstage::cli::CliOverrides;
use vstage::config::AppConfig;

const CONFIG_PATH: &str = "config/stage.json";

fn main() -> Result<()> {
    let overrides = CliOverrides::parse_from_env()?;
    let mut config = AppConfig::load_or_default(CONFIG_PATH);
    config.apply_overrides(&overrides.into_config_overrides());

    let catalog = match Catalog::load(&config.playback.catalog) {
        Ok(catalog) => {
            eprintln!("[stage] catalog: {} clips", catalog.len());
            catalog
        }
        Err(err) => {
            eprintln!("[stage] catalog load failed: {err:#}. Running with an empty catalog.");
            Catalog::empty()
        }
    };

    vstage::app::run(config, catalog)
}
