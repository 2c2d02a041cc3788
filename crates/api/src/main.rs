use std::net::SocketAddr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    plaza_observability::init();

    let app = plaza_api::app::build_app();

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "plaza-api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
