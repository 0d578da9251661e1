#[tokio::main]
async fn main() {
    weft::web_client::run().await;
}
