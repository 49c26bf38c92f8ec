//! Tool catalog unit tests

use tokio_test::{assert_err, assert_ok};

use toolhost::catalog::{InMemoryCatalog, ToolCatalog};
use toolhost::errors::EngineError;
use toolhost::filesys::file::File;
use toolhost::models::tool::{LaunchConfig, Tool};

fn create_test_tool(id: &str, slug: &str) -> Tool {
    Tool {
        id: id.to_string(),
        slug: slug.to_string(),
        name: format!("Tool {}", id),
        launch_config: LaunchConfig::Container {
            image: format!("registry.local/{}:latest", slug),
            args: vec![],
            env: Default::default(),
            container_port: 8080,
        },
        health_path: "/health".to_string(),
    }
}

#[tokio::test]
async fn test_catalog_insert_and_resolve() {
    let catalog = InMemoryCatalog::new();
    assert_ok!(catalog.insert(create_test_tool("t-1", "weather")));
    assert_ok!(catalog.insert(create_test_tool("t-2", "search")));

    let tool = catalog.resolve_slug("search").await.unwrap();
    assert_eq!(tool.id, "t-2");
    assert!(catalog.resolve_slug("t-2").await.is_none());
    assert_eq!(catalog.len(), 2);
}

#[tokio::test]
async fn test_catalog_replace_keeps_slug_unique() {
    let catalog = InMemoryCatalog::new();
    assert_ok!(catalog.insert(create_test_tool("t-1", "weather")));

    // Same id may take a new slug
    assert_ok!(catalog.insert(create_test_tool("t-1", "forecast")));
    assert!(catalog.resolve_slug("weather").await.is_none());

    // Another id may not take it
    assert_err!(catalog.insert(create_test_tool("t-2", "forecast")));
    assert_err!(catalog.insert(create_test_tool("t-3", "white space")));
}

#[tokio::test]
async fn test_catalog_file_with_duplicate_slugs_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let file = File::new(tmp.path().join("tools.json"));
    let tools = vec![create_test_tool("t-1", "weather"), create_test_tool("t-2", "weather")];
    file.write_json(&tools).await.unwrap();

    let result = InMemoryCatalog::load_file(&file).await;
    assert!(matches!(result, Err(EngineError::ValidationError(_))));
}
