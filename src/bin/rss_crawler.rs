use pink_spider::schedule::CrawlKind;

#[tokio::main]
async fn main() -> pink_spider::Result<()> {
    pink_spider::cli::run(CrawlKind::Rss).await
}
