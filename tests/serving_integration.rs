//! Serving path integration tests
//!
//! Training through the pipeline, loading with store fallback, canary
//! routing and snapshot isolation across reloads.

#[allow(dead_code)]
mod common;

use churnserve::compute::dataset;
use churnserve::compute::ModelHandle;
use churnserve::types::{CustomerFeatures, ModelStatus, ModelType};
use churnserve::ChurnError;
use common::{train_version, training_rows, TestEnv};

fn customers(n: usize) -> Vec<CustomerFeatures> {
    (0..n)
        .map(|i| CustomerFeatures::example(&format!("CUST_{:05}", i)))
        .collect()
}

#[tokio::test]
async fn test_train_then_serve() {
    let env = TestEnv::new();
    let app = env.app().await;
    assert!(app.models.current().is_degraded());

    let version = train_version(&app, ModelType::RandomForest).await;
    let info = app.models.reload().await;
    assert_eq!(info.active_version.as_deref(), Some(version.as_str()));
    assert!(!info.has_canary);

    let service = app.prediction_service();
    let response = service
        .predict_single(&CustomerFeatures::example("CUST_1"))
        .await
        .unwrap();
    assert_eq!(response.model_version, version);
    assert_eq!(app.db.prediction_count().await, 1);
}

#[tokio::test]
async fn test_generated_csv_trains() {
    let env = TestEnv::new();
    let app = env.app().await;
    let path = env.config.storage.raw_data_path();
    dataset::write_labeled(&path, &training_rows(300, 9)).unwrap();

    let rows = dataset::read_labeled(&path).unwrap();
    assert_eq!(rows.len(), 300);

    let outcome = app
        .training_pipeline()
        .train_named(rows, "gradient_boosting")
        .await
        .unwrap();
    assert_eq!(outcome.version.model_type, ModelType::GradientBoosting);
    assert_eq!(outcome.version.status, ModelStatus::Active);
    assert!(outcome.metrics.roc_auc > 0.5, "auc = {}", outcome.metrics.roc_auc);
}

#[tokio::test]
async fn test_local_fallback_then_degraded() {
    let env = TestEnv::new();
    let app = env.app().await;
    let version = train_version(&app, ModelType::RandomForest).await;

    // Tracking store gone: the local copy still serves.
    std::fs::remove_dir_all(env.path("mlruns")).unwrap();
    let handle = ModelHandle::load(app.registry.clone(), env.loader()).await;
    assert_eq!(
        handle.current().get_info().active_version.as_deref(),
        Some(version.as_str())
    );

    // Both stores gone: construction still succeeds, in degraded mode.
    std::fs::remove_dir_all(&env.config.storage.model_registry_path).unwrap();
    handle.reload().await;
    let manager = handle.current();
    assert!(manager.is_degraded());
    assert!(matches!(manager.select(false), Err(ChurnError::NoModelLoaded)));
}

#[tokio::test]
async fn test_cli_changes_reach_running_server() {
    let env = TestEnv::persistent();
    let server = env.app().await;
    assert!(server.models.current().is_degraded());

    // A CLI invocation opens its own app over the same directories.
    let cli = env.app().await;
    let first = train_version(&cli, ModelType::RandomForest).await;
    let info = server.models.reload().await;
    assert_eq!(info.active_version.as_deref(), Some(first.as_str()));

    let second = train_version(&cli, ModelType::RandomForest).await;
    cli.registry.promote_to_canary(&first, 25).await.unwrap();
    let info = server.models.reload().await;
    assert_eq!(info.active_version.as_deref(), Some(second.as_str()));
    assert_eq!(info.canary_version.as_deref(), Some(first.as_str()));
    assert_eq!(info.canary_traffic_percent, 25);

    // Predictions stored by the server do not clobber the CLI's transitions.
    server
        .prediction_service()
        .predict_single(&CustomerFeatures::example("CUST_1"))
        .await
        .unwrap();
    cli.registry.rollback_canary().await.unwrap();
    assert!(!server.models.reload().await.has_canary);
    assert_eq!(cli.db.prediction_count().await, 1);
    assert_eq!(server.registry.list_all().await.len(), 2);
}

#[tokio::test]
async fn test_canary_traffic_split() {
    let env = TestEnv::new();
    let app = env.app().await;
    let old = train_version(&app, ModelType::RandomForest).await;
    let new = train_version(&app, ModelType::GradientBoosting).await;

    // Zero traffic: the canary is loaded but never chosen.
    app.registry.promote_to_canary(&old, 0).await.unwrap();
    let info = app.models.reload().await;
    assert!(info.has_active && info.has_canary);

    let service = app.prediction_service();
    for customer in customers(200) {
        let response = service.predict_single(&customer).await.unwrap();
        assert_eq!(response.model_version, new);
    }

    // Full traffic: single requests go to the canary, batches never do.
    app.registry.promote_to_canary(&old, 100).await.unwrap();
    app.models.reload().await;
    for customer in customers(50) {
        assert_eq!(service.predict_single(&customer).await.unwrap().model_version, old);
    }
    let batch = service.predict_batch(&customers(25)).await.unwrap();
    assert_eq!(batch.model_version, new);

    let stats = service.stats();
    assert_eq!(stats.single_requests, 250);
    assert_eq!(stats.canary_requests, 50);
    assert_eq!(stats.batch_rows, 25);
}

#[tokio::test]
async fn test_in_flight_snapshot_survives_reload() {
    let env = TestEnv::new();
    let app = env.app().await;
    let first = train_version(&app, ModelType::RandomForest).await;
    app.models.reload().await;

    let snapshot = app.models.current();
    let second = train_version(&app, ModelType::RandomForest).await;
    app.models.reload().await;

    let model = snapshot.select(false).unwrap();
    assert_eq!(model.version(), first);
    let vector = model
        .artifact
        .transformer
        .transform(&CustomerFeatures::example("CUST_1").to_record())
        .unwrap();
    assert!(model.predict(&vector).is_ok());

    assert_eq!(app.models.current().select(false).unwrap().version(), second);
}

#[tokio::test]
async fn test_batch_inference_file() {
    let env = TestEnv::new();
    let app = env.app().await;
    train_version(&app, ModelType::RandomForest).await;
    app.models.reload().await;

    let input = env.config.storage.raw_data_path();
    let output = env.config.storage.batch_output_path();
    dataset::write_labeled(&input, &training_rows(40, 1)).unwrap();

    let response = app.prediction_service().predict_file(&input, &output).await.unwrap();
    assert_eq!(response.total, 40);
    assert!(output.exists());
    assert_eq!(app.db.prediction_count().await, 40);
}
