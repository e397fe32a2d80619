#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = exam_conduct::run().await {
        eprintln!("exam-conduct fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
