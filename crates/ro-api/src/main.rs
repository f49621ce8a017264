#[tokio::main]
async fn main() {
    if let Err(err) = ro_api::run().await {
        tracing::error!(error = %err, "ro-api exited with error");
        eprintln!("ro-api: {err}");
        std::process::exit(1);
    }
}
