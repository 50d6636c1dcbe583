use anyhow::Result;
use narrated::core::config::Config;
use narrated::core::io::NativeStorage;
use narrated::services::tts::elevenlabs::ElevenLabsClient;
use narrated::services::workflow::WorkflowManager;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yml".to_string());
    let config = match Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please ensure '{}' exists with valid settings.", config_path);
            return Err(e);
        }
    };
    let run_config = config.validate()?;

    let tts = Box::new(ElevenLabsClient::new(&run_config)?);
    let storage = Arc::new(NativeStorage::new());

    let manager = WorkflowManager::new(run_config, tts, storage);
    manager.run().await?;

    Ok(())
}
