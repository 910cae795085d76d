//! End-to-end dispatch tests: real queue, mock transport.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mailq::db::Db;
use mailq::mail::{Branding, Email, MailError, Mailer};
use mailq::model::{Job, NewJob, Status, WELCOME_EMAIL};
use mailq::worker::{DispatchConfig, DispatchObserver, Dispatcher};
use serde_json::json;

/// Records sent emails; fails with scripted errors first, if any.
#[derive(Default)]
struct MockMailer {
    sent: Mutex<Vec<Email>>,
    failures: Mutex<VecDeque<MailError>>,
}

impl MockMailer {
    fn failing_with(failures: impl IntoIterator<Item = MailError>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failures: Mutex::new(failures.into_iter().collect()),
        }
    }

    fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

#[derive(Default)]
struct CountingObserver {
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl DispatchObserver for CountingObserver {
    fn on_completed(&self, _job: &Job) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_failed(&self, _job: &Job, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

async fn test_db() -> Db {
    let db = Db::in_memory().await.expect("open in-memory store");
    db.migrate().await.expect("run migrations");
    // No backoff gating in tests; retries are immediately claimable.
    let mut db = db;
    db.retry_backoff = Duration::ZERO;
    db
}

fn dispatcher(db: Arc<Db>, mailer: Arc<MockMailer>) -> Dispatcher {
    Dispatcher::new(
        db,
        mailer,
        Branding::new("https://safespace.in"),
        DispatchConfig::default(),
    )
}

fn welcome_job() -> NewJob {
    NewJob::new(
        WELCOME_EMAIL,
        json!({"name": "Ana", "email": "ana@example.com", "userId": "u1"}),
    )
}

fn generic_job() -> NewJob {
    NewJob::new(
        "send-generic-email",
        json!({
            "to": "user@example.com",
            "subject": "Heads up",
            "text": "A new threat was reported near you."
        }),
    )
}

#[tokio::test]
async fn welcome_job_sends_exactly_one_email() {
    let db = Arc::new(test_db().await);
    let mailer = Arc::new(MockMailer::default());
    let worker = dispatcher(db.clone(), mailer.clone());

    let job = db.enqueue(welcome_job()).await.unwrap();
    assert!(worker.run_once("w1").await.unwrap());

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ana@example.com");
    assert!(sent[0].subject.contains("Welcome"));

    let done = db.get_job(job.id).await.unwrap();
    assert_eq!(done.status, Status::Completed);
    assert_eq!(done.attempts, 1);
}

#[tokio::test]
async fn run_once_reports_an_empty_queue() {
    let db = Arc::new(test_db().await);
    let worker = dispatcher(db, Arc::new(MockMailer::default()));

    assert!(!worker.run_once("w1").await.unwrap());
}

#[tokio::test]
async fn transient_failures_exhaust_the_retry_budget() {
    let db = Arc::new(test_db().await);
    let mailer = Arc::new(MockMailer::failing_with([
        MailError::Transport("connection refused".into()),
        MailError::Transport("connection refused".into()),
        MailError::Transport("connection refused".into()),
    ]));
    let worker = dispatcher(db.clone(), mailer.clone());

    let job = db.enqueue(generic_job()).await.unwrap();

    for _ in 0..3 {
        assert!(worker.run_once("w1").await.unwrap());
    }

    let failed = db.get_job(job.id).await.unwrap();
    assert_eq!(failed.status, Status::Failed);
    assert_eq!(failed.attempts, 3);
    assert!(
        failed
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("connection refused"))
    );
    assert!(mailer.sent().is_empty());

    // Nothing left to claim.
    assert!(!worker.run_once("w1").await.unwrap());
}

#[tokio::test]
async fn transient_failure_then_success_completes_the_job() {
    let db = Arc::new(test_db().await);
    let mailer = Arc::new(MockMailer::failing_with([MailError::Transport(
        "rate limited".into(),
    )]));
    let worker = dispatcher(db.clone(), mailer.clone());

    let job = db.enqueue(generic_job()).await.unwrap();

    assert!(worker.run_once("w1").await.unwrap());
    assert!(worker.run_once("w1").await.unwrap());

    let done = db.get_job(job.id).await.unwrap();
    assert_eq!(done.status, Status::Completed);
    assert_eq!(done.attempts, 2);
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn unknown_job_type_fails_permanently_without_sending() {
    let db = Arc::new(test_db().await);
    let mailer = Arc::new(MockMailer::default());
    let worker = dispatcher(db.clone(), mailer.clone());

    let job = db
        .enqueue(NewJob::new("send-carrier-pigeon", json!({})))
        .await
        .unwrap();
    assert!(worker.run_once("w1").await.unwrap());

    let failed = db.get_job(job.id).await.unwrap();
    assert_eq!(failed.status, Status::Failed);
    assert_eq!(failed.attempts, 1);
    assert!(
        failed
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("unrecognized job type"))
    );
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn malformed_payload_fails_permanently() {
    let db = Arc::new(test_db().await);
    let mailer = Arc::new(MockMailer::default());
    let worker = dispatcher(db.clone(), mailer.clone());

    let job = db
        .enqueue(NewJob::new(WELCOME_EMAIL, json!({"name": "Ana"})))
        .await
        .unwrap();
    assert!(worker.run_once("w1").await.unwrap());

    let failed = db.get_job(job.id).await.unwrap();
    assert_eq!(failed.status, Status::Failed);
    assert_eq!(failed.attempts, 1);
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn message_build_errors_are_not_retried() {
    let db = Arc::new(test_db().await);
    let mailer = Arc::new(MockMailer::failing_with([MailError::InvalidAddress(
        "not-an-address".into(),
    )]));
    let worker = dispatcher(db.clone(), mailer.clone());

    let job = db.enqueue(generic_job()).await.unwrap();
    assert!(worker.run_once("w1").await.unwrap());

    // Budget remained, but the failure is not transient.
    let failed = db.get_job(job.id).await.unwrap();
    assert_eq!(failed.status, Status::Failed);
    assert_eq!(failed.attempts, 1);
    assert!(!worker.run_once("w1").await.unwrap());
}

#[tokio::test]
async fn observer_sees_completions_and_failures() {
    let db = Arc::new(test_db().await);
    let mailer = Arc::new(MockMailer::default());
    let observer = Arc::new(CountingObserver::default());
    let worker = dispatcher(db.clone(), mailer.clone()).observer(observer.clone());

    db.enqueue(welcome_job()).await.unwrap();
    db.enqueue(NewJob::new("send-carrier-pigeon", json!({})))
        .await
        .unwrap();

    assert!(worker.run_once("w1").await.unwrap());
    assert!(worker.run_once("w1").await.unwrap());

    assert_eq!(observer.completed.load(Ordering::SeqCst), 1);
    assert_eq!(observer.failed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn observer_sees_each_retry_failure() {
    let db = Arc::new(test_db().await);
    let mailer = Arc::new(MockMailer::failing_with([
        MailError::Transport("timeout".into()),
        MailError::Transport("timeout".into()),
    ]));
    let observer = Arc::new(CountingObserver::default());
    let worker = dispatcher(db.clone(), mailer.clone()).observer(observer.clone());

    let job = db.enqueue(generic_job()).await.unwrap();

    for _ in 0..3 {
        assert!(worker.run_once("w1").await.unwrap());
    }

    let done = db.get_job(job.id).await.unwrap();
    assert_eq!(done.status, Status::Completed);
    assert_eq!(done.attempts, done.max_attempts);
    assert_eq!(observer.failed.load(Ordering::SeqCst), 2);
    assert_eq!(observer.completed.load(Ordering::SeqCst), 1);
}
