#[tokio::main]
async fn main() -> anyhow::Result<()> {
    moodwatch_lib::run().await
}
