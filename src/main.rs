use accounts::{app, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    accounts::init_tracing();

    let state = AppState::init().await?;
    app::serve(app::build_app(state)).await
}
