use notes_sync_lib::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    notes_sync_lib::run(AppConfig::from_env()).await
}
