#[tokio::main]
async fn main() -> anyhow::Result<()> {
    eomi::app::main().await
}
