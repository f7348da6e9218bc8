//! Writes the OpenAPI document to `openapi.json` (or the path given as the
//! first argument).

use lead_enrich_api::handlers::ApiDoc;
use utoipa::OpenApi;

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());

    let doc = ApiDoc::openapi().to_pretty_json()?;
    std::fs::write(&path, doc)?;

    println!("OpenAPI document written to {}", path);
    Ok(())
}
