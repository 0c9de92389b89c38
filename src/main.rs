#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    switchboard::run().await
}
