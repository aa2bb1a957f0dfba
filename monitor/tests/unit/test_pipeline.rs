//! Deployment pipeline tests

use std::sync::Arc;
use std::time::Duration;

use servmon::deploy::executor::StepExecutor;
use servmon::deploy::pipeline::DeploymentPipeline;
use servmon::deploy::step::{Step, StepOrder, StepStatus};
use servmon::errors::StepError;

use crate::support::{arc_record, Fixture, RecordingExecutor};

const ALL_STEPS: [Step; 4] = [Step::Pull, Step::Compile, Step::Install, Step::GenerateChangelogs];

#[tokio::test]
async fn test_steps_run_in_listed_order_by_default() {
    let fixture = Fixture::new();
    let record = arc_record(&fixture, "Main");
    let executor = Arc::new(RecordingExecutor::default());

    let pipeline = DeploymentPipeline::new(record.clone(), ALL_STEPS.to_vec());
    assert_eq!(pipeline.order(), StepOrder::Fifo);
    let guard = pipeline.try_attach().unwrap();

    let report = pipeline.run(guard, executor.clone(), None).await;

    assert!(report.succeeded());
    assert_eq!(executor.steps(), ALL_STEPS.to_vec());
    assert_eq!(report.executed_steps(), ALL_STEPS.to_vec());
    assert!(!record.has_pipeline());
}

#[tokio::test]
async fn test_lifo_order_runs_last_listed_step_first() {
    let fixture = Fixture::new();
    let record = arc_record(&fixture, "Main");
    let executor = Arc::new(RecordingExecutor::default());

    let pipeline = DeploymentPipeline::new(record, vec![Step::Pull, Step::Compile, Step::Install])
        .with_order(StepOrder::Lifo);
    let guard = pipeline.try_attach().unwrap();
    pipeline.run(guard, executor.clone(), None).await;

    assert_eq!(executor.steps(), vec![Step::Install, Step::Compile, Step::Pull]);
}

#[tokio::test]
async fn test_failure_stops_pipeline_without_continue_on_error() {
    let fixture = Fixture::new();
    let record = arc_record(&fixture, "Main");
    let executor = Arc::new(RecordingExecutor::failing_on(&[Step::Compile]));

    let pipeline = DeploymentPipeline::new(record.clone(), ALL_STEPS.to_vec());
    let guard = pipeline.try_attach().unwrap();
    let report = pipeline.run(guard, executor.clone(), None).await;

    assert!(!report.succeeded());
    assert_eq!(executor.steps(), vec![Step::Pull, Step::Compile]);
    assert_eq!(report.status_of(Step::Pull), Some(&StepStatus::Succeeded));
    assert!(matches!(report.status_of(Step::Compile), Some(StepStatus::Failed(_))));
    assert_eq!(report.status_of(Step::Install), Some(&StepStatus::Skipped));
    assert_eq!(report.status_of(Step::GenerateChangelogs), Some(&StepStatus::Skipped));
    assert!(!record.has_pipeline());
}

#[tokio::test]
async fn test_continue_on_error_runs_remaining_steps() {
    let fixture = Fixture::new();
    let record = arc_record(&fixture, "Main");
    let executor = Arc::new(RecordingExecutor::failing_on(&[Step::Compile]));

    let pipeline =
        DeploymentPipeline::new(record, ALL_STEPS.to_vec()).with_continue_on_error(true);
    let guard = pipeline.try_attach().unwrap();
    let report = pipeline.run(guard, executor.clone(), None).await;

    assert_eq!(executor.steps(), ALL_STEPS.to_vec());
    assert!(!report.succeeded());
    assert_eq!(report.status_of(Step::Install), Some(&StepStatus::Succeeded));
}

#[tokio::test]
async fn test_only_one_pipeline_attaches_per_record() {
    let fixture = Fixture::new();
    let record = arc_record(&fixture, "Main");

    let first = DeploymentPipeline::new(record.clone(), vec![Step::Pull]);
    let second = DeploymentPipeline::new(record.clone(), vec![Step::Compile]);

    let guard = first.try_attach().unwrap();
    assert!(second.try_attach().is_none());
    assert_eq!(record.attached_pipeline().unwrap().id, first.id());

    drop(guard);
    assert!(!record.has_pipeline());
    assert!(second.try_attach().is_some());
}

#[tokio::test]
async fn test_slot_is_released_when_spawned_pipeline_finishes() {
    let fixture = Fixture::new();
    let record = arc_record(&fixture, "Main");
    let executor: Arc<dyn StepExecutor> =
        Arc::new(RecordingExecutor::slow(Duration::from_millis(100)));

    let pipeline = DeploymentPipeline::new(record.clone(), vec![Step::Pull]);
    let guard = pipeline.try_attach().unwrap();
    let handle = pipeline.spawn(guard, executor, None);

    assert!(record.has_pipeline());
    let report = handle.await.unwrap();
    assert!(report.succeeded());
    assert!(!record.has_pipeline());
}

#[tokio::test]
async fn test_step_timeout_fails_the_step() {
    let fixture = Fixture::new();
    let record = arc_record(&fixture, "Main");
    let executor = Arc::new(RecordingExecutor::slow(Duration::from_secs(5)));

    let pipeline = DeploymentPipeline::new(record.clone(), vec![Step::Compile, Step::Install]);
    let guard = pipeline.try_attach().unwrap();
    let report = pipeline
        .run(guard, executor.clone(), Some(Duration::from_millis(50)))
        .await;

    let expected = StepError::TimedOut(Duration::from_millis(50)).to_string();
    assert_eq!(report.status_of(Step::Compile), Some(&StepStatus::Failed(expected)));
    assert_eq!(report.status_of(Step::Install), Some(&StepStatus::Skipped));
    assert_eq!(executor.steps(), vec![Step::Compile]);
    assert!(!record.has_pipeline());
}
