//! services/palette_host/src/bin/openapi.rs
//!
//! Writes the OpenAPI document for the palette host's REST routes to
//! `openapi.json`, or to the path given as the first argument.

use palette_host_lib::web::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());
    std::fs::write(&path, ApiDoc::openapi().to_pretty_json()?)?;
    println!("OpenAPI specification generated at {}", path);
    Ok(())
}
