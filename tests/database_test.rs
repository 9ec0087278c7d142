use sea_orm::{ConnectionTrait, EntityTrait};
use storefront_api::config::AppConfig;
use storefront_api::db;
use storefront_api::entities::Order;

#[tokio::test]
async fn migrations_apply_to_a_file_database_and_are_repeatable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storefront.db");
    let mut cfg = AppConfig::new(
        format!("sqlite://{}?mode=rwc", path.display()),
        "file-db-test-secret-0123456789abcdef".to_string(),
        "test".to_string(),
    );
    cfg.db_max_connections = 2;
    cfg.db_min_connections = 1;

    let pool = db::establish_connection_from_app_config(&cfg).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    db::check_connection(&pool).await.unwrap();

    assert!(Order::find().all(&pool).await.unwrap().is_empty());
    assert!(path.exists());
    pool.execute_unprepared("SELECT 1").await.unwrap();
}
