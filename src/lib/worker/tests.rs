use std::{sync::Arc, sync::atomic::Ordering, time::Duration};

use anyhow::Result;
use async_trait::async_trait;

use super::types::{Action, Worker, WorkerError};
use crate::lib::{
    tasks::{
        runtime::{Runtime, RuntimeError},
        types::{ContainerConfig, State, Task},
    },
    testing::{FakeRuntime, task},
};

fn worker_with(runtime: Arc<FakeRuntime>) -> Worker {
    Worker::new("worker-1", runtime)
}

mod run_task_tests {
    use super::*;

    #[tokio::test]
    async fn empty_queue_is_a_noop_success() {
        let worker = worker_with(Arc::new(FakeRuntime::default()));

        let result = worker.run_task().await.unwrap();

        assert_eq!(result.action, Action::Idle);
        assert!(worker.get_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn scheduled_task_starts_and_runs() {
        let runtime = Arc::new(FakeRuntime::default());
        let worker = worker_with(runtime.clone());
        let t1 = task("t1", State::Scheduled);

        worker.add_task(t1.clone()).await;
        let result = worker.run_task().await.unwrap();

        assert_eq!(result.action, Action::Start);
        let stored = worker.get_task(t1.id).await.unwrap();
        assert_eq!(stored.state, State::Running);
        assert_eq!(stored.container_id.as_deref(), Some("container-0"));
        assert!(stored.start_time.is_some());
        assert_eq!(runtime.started(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn tasks_run_in_the_order_they_were_added() {
        let runtime = Arc::new(FakeRuntime::default());
        let worker = worker_with(runtime.clone());
        let names = ["first", "second", "third", "fourth"];

        for name in names {
            worker.add_task(task(name, State::Scheduled)).await;
        }
        for _ in names {
            worker.run_task().await.unwrap();
        }

        assert_eq!(runtime.started(), names.map(String::from).to_vec());
        assert_eq!(worker.queue_depth().await, 0);
    }

    #[tokio::test]
    async fn runtime_failure_marks_task_failed() {
        let worker = worker_with(Arc::new(FakeRuntime::failing()));
        let t1 = task("t1", State::Scheduled);

        worker.add_task(t1.clone()).await;
        let error = worker.run_task().await.unwrap_err();

        assert!(matches!(error, WorkerError::Runtime { task_id, .. } if task_id == t1.id));
        let stored = worker.get_task(t1.id).await.unwrap();
        assert_eq!(stored.state, State::Failed);
        assert_eq!(stored.container_id, None);
    }

    #[tokio::test]
    async fn invalid_transition_leaves_record_untouched() {
        let worker = worker_with(Arc::new(FakeRuntime::default()));
        let t1 = task("t1", State::Scheduled);
        worker.add_task(t1.clone()).await;
        worker.run_task().await.unwrap();
        let before = worker.get_task(t1.id).await.unwrap();

        let mut regress = before.clone();
        regress.state = State::Pending;
        regress.container_id = Some("other".to_string());
        worker.add_task(regress).await;
        let error = worker.run_task().await.unwrap_err();

        match error {
            WorkerError::InvalidStateTransition { task_id, from, to } => {
                assert_eq!(task_id, t1.id);
                assert_eq!(from, State::Running);
                assert_eq!(to, State::Pending);
            }
            other => panic!("unexpected error: {other}"),
        }
        let after = worker.get_task(t1.id).await.unwrap();
        assert_eq!(
            serde_json::to_vec(&after).unwrap(),
            serde_json::to_vec(&before).unwrap()
        );
    }

    #[tokio::test]
    async fn reapplying_running_succeeds_without_state_loss() {
        let runtime = Arc::new(FakeRuntime::default());
        let worker = worker_with(runtime.clone());
        let t1 = task("t1", State::Scheduled);
        worker.add_task(t1.clone()).await;
        worker.run_task().await.unwrap();
        let running = worker.get_task(t1.id).await.unwrap();

        for _ in 0..2 {
            worker.add_task(running.clone()).await;
            let result = worker.run_task().await.unwrap();
            assert_eq!(result.action, Action::Noop);
            assert_eq!(result.container_id.as_deref(), Some("container-0"));
        }

        assert_eq!(worker.get_task(t1.id).await.unwrap(), running);
        assert_eq!(runtime.started().len(), 1);
    }

    #[tokio::test]
    async fn unexpected_desired_state_is_reported_not_fatal() {
        let worker = worker_with(Arc::new(FakeRuntime::default()));
        let t1 = task("t1", State::Running);

        worker.add_task(t1.clone()).await;
        let error = worker.run_task().await.unwrap_err();

        assert!(matches!(error, WorkerError::UnexpectedState { state: State::Running, .. }));

        worker.add_task(task("t2", State::Scheduled)).await;
        assert_eq!(worker.run_task().await.unwrap().action, Action::Start);
    }

    #[tokio::test]
    async fn completed_event_stops_running_task() {
        let runtime = Arc::new(FakeRuntime::default());
        let worker = worker_with(runtime.clone());
        let t1 = task("t1", State::Scheduled);
        worker.add_task(t1.clone()).await;
        worker.run_task().await.unwrap();

        // The stop request carries no container id; the persisted one is used.
        let mut stop = t1.clone();
        stop.state = State::Completed;
        worker.add_task(stop).await;
        let result = worker.run_task().await.unwrap();

        assert_eq!(result.action, Action::Stop);
        let stored = worker.get_task(t1.id).await.unwrap();
        assert_eq!(stored.state, State::Completed);
        assert!(stored.finish_time.is_some());
        assert_eq!(runtime.stopped(), vec!["container-0".to_string()]);
    }

    #[tokio::test]
    async fn second_stop_through_queue_is_rejected() {
        let worker = worker_with(Arc::new(FakeRuntime::default()));
        let t1 = task("t1", State::Scheduled);
        worker.add_task(t1.clone()).await;
        worker.run_task().await.unwrap();
        worker.request_stop(t1.id).await.unwrap();
        worker.run_task().await.unwrap();

        worker.add_task(worker.get_task(t1.id).await.unwrap()).await;
        let error = worker.run_task().await.unwrap_err();

        assert!(matches!(
            error,
            WorkerError::InvalidStateTransition { from: State::Completed, to: State::Completed, .. }
        ));
    }
}

mod stop_task_tests {
    use super::*;

    async fn running_worker(runtime: Arc<FakeRuntime>) -> (Worker, Task) {
        let worker = worker_with(runtime);
        let t1 = task("t1", State::Scheduled);
        worker.add_task(t1.clone()).await;
        worker.run_task().await.unwrap();
        let running = worker.get_task(t1.id).await.unwrap();
        (worker, running)
    }

    #[tokio::test]
    async fn stop_failure_still_completes_task() {
        let runtime = Arc::new(FakeRuntime::default());
        let (worker, running) = running_worker(runtime.clone()).await;
        runtime.fail_stop.store(true, Ordering::SeqCst);

        let result = worker.stop_task(running.clone()).await.unwrap();

        assert_eq!(result.action, Action::Stop);
        assert_eq!(worker.get_task(running.id).await.unwrap().state, State::Completed);
    }

    #[tokio::test]
    async fn back_to_back_stops_both_succeed() {
        let runtime = Arc::new(FakeRuntime::default());
        let (worker, running) = running_worker(runtime.clone()).await;

        worker.stop_task(running.clone()).await.unwrap();
        let completed = worker.get_task(running.id).await.unwrap();
        let second = worker.stop_task(running.clone()).await.unwrap();

        assert_eq!(second.action, Action::Noop);
        assert_eq!(worker.get_task(running.id).await.unwrap(), completed);
        assert_eq!(completed.state, State::Completed);
        assert_eq!(runtime.stopped().len(), 1);
    }

    #[tokio::test]
    async fn failed_task_is_never_overwritten() {
        let worker = worker_with(Arc::new(FakeRuntime::failing()));
        let t1 = task("t1", State::Scheduled);
        worker.add_task(t1.clone()).await;
        let _ = worker.run_task().await;

        worker.stop_task(t1.clone()).await.unwrap();

        assert_eq!(worker.get_task(t1.id).await.unwrap().state, State::Failed);
    }

    #[tokio::test]
    async fn request_stop_for_finished_task_queues_nothing() {
        let runtime = Arc::new(FakeRuntime::default());
        let worker = worker_with(runtime.clone());
        let t1 = task("t1", State::Scheduled);
        worker.add_task(t1.clone()).await;
        worker.run_task().await.unwrap();
        worker.request_stop(t1.id).await.unwrap();
        worker.run_task().await.unwrap();

        let error = worker.request_stop(t1.id).await.unwrap_err();

        assert!(matches!(
            error,
            WorkerError::InvalidStateTransition { from: State::Completed, to: State::Completed, .. }
        ));
        assert_eq!(worker.queue_depth().await, 0);
        assert_eq!(runtime.stopped().len(), 1);
    }

    #[tokio::test]
    async fn request_stop_for_failed_task_queues_nothing() {
        let worker = worker_with(Arc::new(FakeRuntime::failing()));
        let t1 = task("t1", State::Scheduled);
        worker.add_task(t1.clone()).await;
        worker.run_task().await.unwrap_err();

        let error = worker.request_stop(t1.id).await.unwrap_err();

        assert!(matches!(
            error,
            WorkerError::InvalidStateTransition { from: State::Failed, .. }
        ));
        assert_eq!(worker.queue_depth().await, 0);
        assert_eq!(worker.get_task(t1.id).await.unwrap().state, State::Failed);
    }

    #[tokio::test]
    async fn request_stop_for_unknown_task_fails() {
        let worker = worker_with(Arc::new(FakeRuntime::default()));
        let unknown = task("ghost", State::Running);

        let error = worker.request_stop(unknown.id).await.unwrap_err();

        assert!(matches!(error, WorkerError::TaskNotFound(id) if id == unknown.id));
        assert_eq!(worker.queue_depth().await, 0);
    }
}

struct SlowRuntime;

#[async_trait]
impl Runtime for SlowRuntime {
    async fn run(&self, _config: &ContainerConfig) -> Result<String, RuntimeError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok("late".to_string())
    }

    async fn stop(&self, container_id: &str) -> Result<String, RuntimeError> {
        Ok(container_id.to_string())
    }
}

#[tokio::test(start_paused = true)]
async fn runtime_timeout_fails_the_task() {
    let worker =
        Worker::new("worker-1", Arc::new(SlowRuntime)).with_runtime_timeout(Duration::from_secs(1));
    let t1 = task("t1", State::Scheduled);

    worker.add_task(t1.clone()).await;
    let error = worker.run_task().await.unwrap_err();

    assert!(matches!(
        error,
        WorkerError::Runtime { source: RuntimeError::Timeout(_), .. }
    ));
    assert_eq!(worker.get_task(t1.id).await.unwrap().state, State::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_enqueue_and_drain() -> Result<()> {
    let runtime = Arc::new(FakeRuntime::default());
    let worker = Arc::new(worker_with(runtime.clone()));
    let total = 200;

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let worker = worker.clone();
            tokio::spawn(async move {
                for i in 0..total / 4 {
                    worker.add_task(task(&format!("t-{p}-{i}"), State::Scheduled)).await;
                }
            })
        })
        .collect();

    let drainer = {
        let worker = worker.clone();
        tokio::spawn(async move {
            let mut processed = 0;
            while processed < total {
                match worker.run_task().await {
                    Ok(result) if result.action == Action::Idle => tokio::task::yield_now().await,
                    Ok(_) => processed += 1,
                    Err(error) => panic!("unexpected error: {error}"),
                }
            }
        })
    };

    for producer in producers {
        producer.await?;
    }
    drainer.await?;

    let tasks = worker.get_tasks().await;
    assert_eq!(tasks.len(), total);
    assert!(tasks.iter().all(|task| task.state == State::Running));
    assert_eq!(runtime.started().len(), total);

    Ok(())
}

#[tokio::test]
async fn stats_count_tasks_and_allocation() {
    let worker = worker_with(Arc::new(FakeRuntime::default()));
    let mut t1 = task("t1", State::Scheduled);
    t1.memory = 1024;
    t1.cpu = 0.5;
    worker.add_task(t1).await;
    worker.run_task().await.unwrap();
    worker.add_task(task("t2", State::Scheduled)).await;

    let stats = worker.collect_stats().await;

    assert_eq!(stats.task_count, 1);
    assert_eq!(stats.queue_depth, 1);
    assert_eq!(stats.memory_allocated, 1024);
    assert_eq!(stats.cpu_allocated, 0.5);
    assert_eq!(worker.stats().await, stats);
}

mod api_tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::lib::{
        api::ErrResponse,
        tasks::types::{TaskEvent, TaskId},
        worker::{api::TaskServer, types::Stats},
    };

    fn server() -> (Arc<Worker>, axum::Router) {
        let worker = Arc::new(worker_with(Arc::new(FakeRuntime::default())));
        let router = TaskServer::new(worker.clone(), "127.0.0.1", 0).router();
        (worker, router)
    }

    fn post_json(body: String) -> Request<Body> {
        Request::post("/tasks")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn post_queues_task_and_returns_it() -> Result<()> {
        let (worker, router) = server();
        let event = TaskEvent::new(State::Scheduled, Task::new("t1", "postgres:13"));

        let response = router.oneshot(post_json(serde_json::to_string(&event)?)).await?;

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let accepted: Task = serde_json::from_slice(&body)?;
        assert_eq!(accepted.id, event.task.id);
        assert_eq!(accepted.state, State::Scheduled);
        assert_eq!(worker.queue_depth().await, 1);

        Ok(())
    }

    #[tokio::test]
    async fn post_with_unknown_field_is_bad_request() -> Result<()> {
        let (worker, router) = server();
        let mut event = serde_json::to_value(TaskEvent::new(
            State::Scheduled,
            Task::new("t1", "postgres:13"),
        ))?;
        event["unexpected"] = serde_json::json!(true);

        let response = router.oneshot(post_json(event.to_string())).await?;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let error: ErrResponse = serde_json::from_slice(&body)?;
        assert!(error.message.contains("unexpected"));
        assert_eq!(worker.queue_depth().await, 0);

        Ok(())
    }

    #[tokio::test]
    async fn get_lists_persisted_tasks() -> Result<()> {
        let (worker, router) = server();
        worker.add_task(task("t1", State::Scheduled)).await;
        worker.run_task().await?;

        let response = router
            .oneshot(Request::get("/tasks").body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let tasks: Vec<Task> = serde_json::from_slice(&body)?;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].state, State::Running);

        Ok(())
    }

    #[tokio::test]
    async fn delete_known_task_queues_stop() -> Result<()> {
        let (worker, router) = server();
        let t1 = task("t1", State::Scheduled);
        worker.add_task(t1.clone()).await;
        worker.run_task().await?;

        let response = router
            .oneshot(Request::delete(format!("/tasks/{}", t1.id)).body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(worker.queue_depth().await, 1);
        worker.run_task().await?;
        assert_eq!(worker.get_task(t1.id).await.unwrap().state, State::Completed);

        Ok(())
    }

    #[tokio::test]
    async fn delete_completed_task_is_conflict() -> Result<()> {
        let (worker, router) = server();
        let t1 = task("t1", State::Scheduled);
        worker.add_task(t1.clone()).await;
        worker.run_task().await?;
        worker.request_stop(t1.id).await?;
        worker.run_task().await?;

        let response = router
            .oneshot(Request::delete(format!("/tasks/{}", t1.id)).body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let error: ErrResponse = serde_json::from_slice(&body)?;
        assert!(error.message.contains("Completed -> Completed"));
        assert_eq!(worker.queue_depth().await, 0);

        Ok(())
    }

    #[tokio::test]
    async fn delete_unknown_task_is_not_found() -> Result<()> {
        let (worker, router) = server();
        let before = worker.get_tasks().await;

        let response = router
            .oneshot(
                Request::delete(format!("/tasks/{}", TaskId::new()))
                    .body(Body::empty())?,
            )
            .await?;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(worker.get_tasks().await, before);
        assert_eq!(worker.queue_depth().await, 0);

        Ok(())
    }

    #[tokio::test]
    async fn delete_malformed_id_is_bad_request() -> Result<()> {
        let (_, router) = server();

        let response = router
            .oneshot(Request::delete("/tasks/not-a-uuid").body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        Ok(())
    }

    #[tokio::test]
    async fn stats_endpoint_reports_queue_depth() -> Result<()> {
        let (worker, router) = server();
        worker.add_task(task("t1", State::Scheduled)).await;

        let response = router
            .oneshot(Request::get("/stats").body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let stats: Stats = serde_json::from_slice(&body)?;
        assert_eq!(stats.queue_depth, 1);

        Ok(())
    }
}

mod config_from_file_tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::lib::worker::config::Config;

    #[tokio::test]
    async fn reads_config_file() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            &mut file,
            r#"
name: worker-2
port: 6000
queue_poll_interval_secs: 3
"#
        )?;

        let config = Config::from_file(file.path()).await?;

        assert_eq!(config.name, "worker-2");
        assert_eq!(config.port, 6000);
        assert_eq!(config.queue_poll_interval(), Duration::from_secs(3));
        assert_eq!(config.stats_interval_secs, Config::default().stats_interval_secs);

        Ok(())
    }

    #[tokio::test]
    async fn rejects_zero_intervals() -> Result<()> {
        for field in ["queue_poll_interval_secs", "stats_interval_secs", "runtime_timeout_secs"] {
            let mut file = NamedTempFile::new()?;
            writeln!(&mut file, "{field}: 0")?;

            let error = Config::from_file(file.path()).await.unwrap_err();

            assert_eq!(error.to_string(), format!("{field} must be greater than zero"));
        }

        Ok(())
    }

    #[tokio::test]
    async fn rejects_unknown_keys() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(&mut file, "nmae: typo")?;

        let error = Config::from_file(file.path()).await.unwrap_err();

        assert!(error.to_string().contains("unknown field `nmae`"));

        Ok(())
    }
}
