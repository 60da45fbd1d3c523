use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use manuscript_desk::auth::{Actor, IdentityService, Registration, TokenService};
use manuscript_desk::error::ServiceError;
use manuscript_desk::notify::{Email, Notifier, NotifyError};
use manuscript_desk::object_store::{
    LocalStore, ObjectStore, ObjectStoreError, SignedUrl, SignedUrlRequest, StoredObject,
};
use manuscript_desk::signing::UrlSigner;
use manuscript_desk::state_machine::ManuscriptStatus;
use manuscript_desk::storage::models::{Role, User};
use manuscript_desk::storage::Database;
use manuscript_desk::workflow::{
    Delivery, DeliveryMode, ListParams, ManuscriptPatch, NewManuscript, Upload, Workflow,
};

const SECRET: &[u8] = b"workflow-test-secret-0123456789ab";

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Email>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, email: Email) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    db: Database,
    store: Arc<LocalStore>,
    notifier: Arc<RecordingNotifier>,
    workflow: Workflow,
    admin: Actor,
    author: Actor,
    expert: Actor,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    let store = Arc::new(
        LocalStore::new(dir.path().join("files"))
            .unwrap()
            .with_signed_urls(UrlSigner::new(SECRET), "http://localhost:8080"),
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let workflow = Workflow::new(
        db.clone(),
        store.clone(),
        notifier.clone(),
        Duration::seconds(60),
    );

    let admin = add_user(&db, "admin-1", Role::Admin);
    let author = add_user(&db, "author-1", Role::Author);
    let expert = add_user(&db, "expert-1", Role::Expert);

    Harness {
        _dir: dir,
        db,
        store,
        notifier,
        workflow,
        admin,
        author,
        expert,
    }
}

fn add_user(db: &Database, id: &str, role: Role) -> Actor {
    let now = Utc::now();
    let user = User {
        id: id.to_string(),
        name: format!("User {id}"),
        email: format!("{id}@example.com"),
        password_hash: None,
        google_id: None,
        role,
        notifications: Vec::new(),
        reset_token_hash: None,
        reset_expires_at: None,
        created_at: now,
        updated_at: now,
    };
    assert!(db.create_user(&user).unwrap());
    Actor {
        id: id.to_string(),
        role,
    }
}

fn pdf(name: &str, body: &'static [u8]) -> Upload {
    Upload::new(name, Some("application/pdf"), Bytes::from_static(body))
}

fn submission(title: &str) -> NewManuscript {
    NewManuscript {
        title: title.to_string(),
        description: "An abstract".to_string(),
        file: Some(pdf("paper.pdf", b"%PDF-1.4 body")),
        thumbnail: None,
    }
}

/// Let spawned email deliveries run
async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_full_review_lifecycle() {
    let h = harness();

    let created = h
        .workflow
        .create(&h.author, submission("On Things"))
        .await
        .unwrap();
    assert_eq!(created.status, ManuscriptStatus::Pending);
    assert_eq!(created.author_id, h.author.id);

    let assigned = h
        .workflow
        .assign_reviewer(&h.admin, &created.id, &h.expert.id)
        .unwrap();
    assert_eq!(assigned.status, ManuscriptStatus::Submitted);
    assert_eq!(assigned.reviewer_id.as_deref(), Some("expert-1"));
    assert!(assigned.submitted_at.is_some());

    let started = h.workflow.start_review(&h.expert, &created.id).unwrap();
    assert_eq!(started.status, ManuscriptStatus::UnderReview);

    let decided = h
        .workflow
        .decide(&h.expert, &created.id, "accepted", "  Solid work.  ")
        .unwrap();
    assert_eq!(decided.status, ManuscriptStatus::Accepted);
    assert_eq!(decided.reviewer_comments, "Solid work.");

    let published = h.workflow.toggle_publish(&h.admin, &created.id).unwrap();
    assert_eq!(published.status, ManuscriptStatus::Published);
    assert!(published.published_at.is_some());

    // Anonymous callers can now fetch it
    let delivery = h
        .workflow
        .deliver_file(None, &created.id, DeliveryMode::Stream)
        .await
        .unwrap();
    match delivery {
        Delivery::Stream(blob) => {
            assert_eq!(blob.data, Bytes::from_static(b"%PDF-1.4 body"));
            assert_eq!(blob.content_type, "application/pdf");
            assert_eq!(blob.filename, "paper.pdf");
        }
        Delivery::Url(_) => panic!("expected a stream"),
    }

    let catalogue = h.workflow.list_published(None, None).unwrap();
    assert_eq!(catalogue.total, 1);
    assert_eq!(
        catalogue.items[0].author.as_ref().map(|a| a.id.as_str()),
        Some("author-1")
    );

    settle().await;
    let expert_inbox = h.db.get_user("expert-1").unwrap().unwrap().notifications;
    assert_eq!(expert_inbox.len(), 1);
    let author_inbox = h.db.get_user("author-1").unwrap().unwrap().notifications;
    assert_eq!(author_inbox.len(), 2);

    let sent = h.notifier.sent.lock().unwrap();
    assert!(sent.iter().any(|e| e.to == "expert-1@example.com"));
    assert!(sent
        .iter()
        .any(|e| e.to == "author-1@example.com" && e.subject.contains("published")));
}

#[tokio::test]
async fn test_invalid_transition_leaves_record_unchanged() {
    let h = harness();
    let m = h
        .workflow
        .create(&h.author, submission("Draft"))
        .await
        .unwrap();

    // Pending cannot be published
    let err = h.workflow.toggle_publish(&h.admin, &m.id).unwrap_err();
    assert!(matches!(err, ServiceError::StateConflict(_)));

    h.workflow
        .assign_reviewer(&h.admin, &m.id, &h.expert.id)
        .unwrap();

    // Decisions need a review in progress
    let err = h
        .workflow
        .decide(&h.expert, &m.id, "accepted", "")
        .unwrap_err();
    assert!(matches!(err, ServiceError::StateConflict(_)));

    let stored = h.db.get_manuscript(&m.id).unwrap().unwrap();
    assert_eq!(stored.status, ManuscriptStatus::Submitted);
    assert_eq!(stored.reviewer_comments, "");
    assert!(stored.reviewed_at.is_none());
}

#[tokio::test]
async fn test_assign_after_pending_is_conflict() {
    let h = harness();
    let m = h
        .workflow
        .create(&h.author, submission("Draft"))
        .await
        .unwrap();
    h.workflow
        .assign_reviewer(&h.admin, &m.id, &h.expert.id)
        .unwrap();

    let other = add_user(&h.db, "expert-2", Role::Expert);
    let err = h
        .workflow
        .assign_reviewer(&h.admin, &m.id, &other.id)
        .unwrap_err();
    assert!(matches!(err, ServiceError::StateConflict(_)));

    // Status wins over an invalid reviewer
    let err = h
        .workflow
        .assign_reviewer(&h.admin, &m.id, "nobody")
        .unwrap_err();
    assert!(matches!(err, ServiceError::StateConflict(_)));

    let stored = h.db.get_manuscript(&m.id).unwrap().unwrap();
    assert_eq!(stored.reviewer_id.as_deref(), Some("expert-1"));
}

#[tokio::test]
async fn test_assign_requires_an_expert() {
    let h = harness();
    let m = h
        .workflow
        .create(&h.author, submission("Draft"))
        .await
        .unwrap();

    for reviewer in ["nobody", "author-1"] {
        let err = h
            .workflow
            .assign_reviewer(&h.admin, &m.id, reviewer)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ref msg) if msg == "Invalid reviewer"));
    }

    let err = h
        .workflow
        .assign_reviewer(&h.author, &m.id, &h.expert.id)
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let err = h
        .workflow
        .assign_reviewer(&h.admin, "missing", &h.expert.id)
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn test_unassigned_reviewer_is_forbidden() {
    let h = harness();
    let m = h
        .workflow
        .create(&h.author, submission("Draft"))
        .await
        .unwrap();
    h.workflow
        .assign_reviewer(&h.admin, &m.id, &h.expert.id)
        .unwrap();

    let stranger = add_user(&h.db, "expert-2", Role::Expert);
    let err = h.workflow.start_review(&stranger, &m.id).unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    h.workflow.start_review(&h.expert, &m.id).unwrap();
    let err = h
        .workflow
        .decide(&stranger, &m.id, "rejected", "no")
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let err = h
        .workflow
        .decide(&h.expert, &m.id, "maybe", "")
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let decided = h
        .workflow
        .decide(&h.expert, &m.id, "rejected", "Out of scope")
        .unwrap();
    assert_eq!(decided.status, ManuscriptStatus::Rejected);

    // Rejected manuscripts stay unpublished
    let err = h.workflow.toggle_publish(&h.admin, &m.id).unwrap_err();
    assert!(matches!(err, ServiceError::StateConflict(_)));
}

#[tokio::test]
async fn test_publish_toggle_round_trip() {
    let h = harness();
    let m = h
        .workflow
        .create(&h.author, submission("Draft"))
        .await
        .unwrap();
    h.workflow
        .assign_reviewer(&h.admin, &m.id, &h.expert.id)
        .unwrap();
    h.workflow.start_review(&h.expert, &m.id).unwrap();
    h.workflow.decide(&h.expert, &m.id, "accepted", "").unwrap();

    let published = h.workflow.toggle_publish(&h.admin, &m.id).unwrap();
    assert_eq!(published.status, ManuscriptStatus::Published);

    let unpublished = h.workflow.toggle_publish(&h.admin, &m.id).unwrap();
    assert_eq!(unpublished.status, ManuscriptStatus::Accepted);
    assert!(unpublished.published_at.is_none());
    assert_eq!(h.workflow.list_published(None, None).unwrap().total, 0);

    // Back to private: anonymous access is gone
    let err = h.workflow.get_visible(None, &m.id).unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));
}

// ============================================================================
// Author operations
// ============================================================================

#[tokio::test]
async fn test_create_requires_file() {
    let h = harness();
    let input = NewManuscript {
        file: None,
        ..submission("No file")
    };
    let err = h.workflow.create(&h.author, input).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let input = NewManuscript {
        title: "   ".to_string(),
        ..submission("")
    };
    let err = h.workflow.create(&h.author, input).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let input = NewManuscript {
        file: Some(Upload::new("song.mp3", None, Bytes::from_static(b"ID3"))),
        ..submission("Wrong type")
    };
    let err = h.workflow.create(&h.author, input).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let page = h.workflow.list(&h.admin, ListParams::default()).unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_only_authors_create() {
    let h = harness();
    for actor in [&h.admin, &h.expert] {
        let err = h
            .workflow
            .create(actor, submission("Not mine to submit"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }
}

#[tokio::test]
async fn test_non_owner_cannot_edit_or_delete() {
    let h = harness();
    let m = h
        .workflow
        .create(&h.author, submission("Mine"))
        .await
        .unwrap();
    let other = add_user(&h.db, "author-2", Role::Author);

    let patch = ManuscriptPatch {
        title: Some("Hijacked".to_string()),
        ..Default::default()
    };
    let err = h.workflow.update(&other, &m.id, patch).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let err = h.workflow.delete(&other, &m.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let stored = h.db.get_manuscript(&m.id).unwrap().unwrap();
    assert_eq!(stored.title, "Mine");
}

#[tokio::test]
async fn test_update_swaps_blobs() {
    let h = harness();
    let m = h
        .workflow
        .create(&h.author, submission("First"))
        .await
        .unwrap();
    let old_key = m.file_id.clone();

    let patch = ManuscriptPatch {
        title: Some("Second".to_string()),
        file: Some(pdf("revised.pdf", b"%PDF revised")),
        thumbnail: Some(Upload::new("cover.png", None, Bytes::from_static(b"\x89PNG"))),
        ..Default::default()
    };
    let updated = h.workflow.update(&h.author, &m.id, patch).await.unwrap();

    assert_eq!(updated.title, "Second");
    assert_eq!(updated.filename, "revised.pdf");
    assert_ne!(updated.file_id, old_key);
    assert!(!h.store.exists(&old_key).await.unwrap());
    assert!(h.store.exists(&updated.file_id).await.unwrap());

    let thumb = h.workflow.deliver_thumbnail(Some(&h.author), &m.id).await.unwrap();
    assert_eq!(thumb.content_type, "image/png");
    assert_eq!(thumb.filename, "thumbnail.png");
}

#[tokio::test]
async fn test_update_after_assignment_is_conflict() {
    let h = harness();
    let m = h
        .workflow
        .create(&h.author, submission("First"))
        .await
        .unwrap();
    h.workflow
        .assign_reviewer(&h.admin, &m.id, &h.expert.id)
        .unwrap();

    let patch = ManuscriptPatch {
        file: Some(pdf("late.pdf", b"%PDF late")),
        ..Default::default()
    };
    let err = h.workflow.update(&h.author, &m.id, patch).await.unwrap_err();
    assert!(matches!(err, ServiceError::StateConflict(_)));

    let err = h.workflow.delete(&h.author, &m.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::StateConflict(_)));

    let stored = h.db.get_manuscript(&m.id).unwrap().unwrap();
    assert_eq!(stored.file_id, m.file_id);
}

#[tokio::test]
async fn test_delete_with_missing_blob_succeeds() {
    let h = harness();
    let m = h
        .workflow
        .create(&h.author, submission("Doomed"))
        .await
        .unwrap();
    h.store.delete(&m.file_id).await.unwrap();

    h.workflow.delete(&h.author, &m.id).await.unwrap();
    assert!(h.db.get_manuscript(&m.id).unwrap().is_none());

    let err = h.workflow.delete(&h.author, &m.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

// ============================================================================
// Queries and delivery
// ============================================================================

#[tokio::test]
async fn test_list_is_role_scoped() {
    let h = harness();
    let other = add_user(&h.db, "author-2", Role::Author);
    let mine = h
        .workflow
        .create(&h.author, submission("Mine"))
        .await
        .unwrap();
    h.workflow
        .create(&other, submission("Theirs"))
        .await
        .unwrap();
    h.workflow
        .assign_reviewer(&h.admin, &mine.id, &h.expert.id)
        .unwrap();

    assert_eq!(h.workflow.list(&h.admin, ListParams::default()).unwrap().total, 2);

    let authored = h.workflow.list(&h.author, ListParams::default()).unwrap();
    assert_eq!(authored.total, 1);
    assert_eq!(authored.items[0].manuscript.id, mine.id);

    let assigned = h.workflow.list(&h.expert, ListParams::default()).unwrap();
    assert_eq!(assigned.total, 1);
    assert_eq!(
        assigned.items[0].reviewer.as_ref().map(|r| r.id.as_str()),
        Some("expert-1")
    );

    let pending = h
        .workflow
        .list(
            &h.admin,
            ListParams {
                status: Some(ManuscriptStatus::Pending),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(pending.total, 1);
}

#[tokio::test]
async fn test_visibility_before_publication() {
    let h = harness();
    let m = h
        .workflow
        .create(&h.author, submission("Private"))
        .await
        .unwrap();

    assert!(h.workflow.get_visible(Some(&h.author), &m.id).is_ok());
    assert!(h.workflow.get_visible(Some(&h.admin), &m.id).is_ok());
    for actor in [None, Some(&h.expert)] {
        let err = h.workflow.get_visible(actor, &m.id).unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    let err = h.workflow.get_visible(Some(&h.admin), "missing").unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    let err = h
        .workflow
        .deliver_thumbnail(Some(&h.author), &m.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn test_signed_url_is_fresh_per_call() {
    let h = harness();
    let m = h
        .workflow
        .create(&h.author, submission("Linked"))
        .await
        .unwrap();

    let first = match h
        .workflow
        .deliver_file(Some(&h.author), &m.id, DeliveryMode::Url)
        .await
        .unwrap()
    {
        Delivery::Url(url) => url,
        Delivery::Stream(_) => panic!("expected a URL"),
    };
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let second = match h
        .workflow
        .deliver_file(Some(&h.author), &m.id, DeliveryMode::Url)
        .await
        .unwrap()
    {
        Delivery::Url(url) => url,
        Delivery::Stream(_) => panic!("expected a URL"),
    };

    assert_ne!(first.url, second.url);
    assert!(second.expires_at > first.expires_at);
    assert!(first.url.contains(&m.file_id));
}

#[tokio::test]
async fn test_missing_payload_is_reported() {
    let h = harness();
    let m = h
        .workflow
        .create(&h.author, submission("Lost"))
        .await
        .unwrap();
    h.store.delete(&m.file_id).await.unwrap();

    for mode in [DeliveryMode::Stream, DeliveryMode::Url] {
        let err = h
            .workflow
            .deliver_file(Some(&h.author), &m.id, mode)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PayloadMissing(_)));
    }
}

// ============================================================================
// Expert requests
// ============================================================================

#[tokio::test]
async fn test_expert_request_approval_promotes() {
    let h = harness();

    let err = h
        .workflow
        .submit_expert_request(&h.author, "   ")
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let request = h
        .workflow
        .submit_expert_request(&h.author, "Ten years of refereeing")
        .unwrap();
    let err = h
        .workflow
        .submit_expert_request(&h.author, "Again")
        .unwrap_err();
    assert!(matches!(err, ServiceError::StateConflict(_)));

    let err = h
        .workflow
        .list_pending_expert_requests(&h.author)
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let pending = h.workflow.list_pending_expert_requests(&h.admin).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(
        pending[0].requester.as_ref().map(|r| r.id.as_str()),
        Some("author-1")
    );

    h.workflow
        .approve_expert_request(&h.admin, &request.id)
        .unwrap();
    let user = h.db.get_user("author-1").unwrap().unwrap();
    assert_eq!(user.role, Role::Expert);
    assert_eq!(user.notifications.len(), 1);

    let err = h
        .workflow
        .reject_expert_request(&h.admin, &request.id)
        .unwrap_err();
    assert!(matches!(err, ServiceError::StateConflict(_)));

    let err = h
        .workflow
        .approve_expert_request(&h.admin, "missing")
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
    settle().await;
}

// ============================================================================
// Identity
// ============================================================================

fn identity(db: &Database, notifier: Arc<RecordingNotifier>) -> IdentityService {
    IdentityService::new(
        db.clone(),
        TokenService::new(SECRET, Duration::hours(1)),
        notifier,
        "http://localhost:5173/",
    )
}

#[tokio::test]
async fn test_register_login_and_reset() {
    let h = harness();
    let identity = identity(&h.db, h.notifier.clone());

    let session = identity
        .register(Registration {
            name: "Ada".to_string(),
            email: "Ada@Example.com".to_string(),
            password: "correct horse".to_string(),
        })
        .unwrap();
    assert_eq!(session.user.role, Role::Author);
    assert_eq!(session.user.email, "ada@example.com");

    let actor = identity.authenticate(&session.token).unwrap();
    assert_eq!(actor.id, session.user.id);

    let err = identity.login("ada@example.com", "wrong pass").unwrap_err();
    assert!(matches!(err, ServiceError::Unauthenticated(_)));
    identity.login("ada@example.com", "correct horse").unwrap();

    // Unknown addresses succeed silently
    identity.forgot_password("nobody@example.com").unwrap();
    identity.forgot_password("ada@example.com").unwrap();
    settle().await;

    let link = {
        let sent = h.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let text = sent[0].text.clone();
        text.lines()
            .find(|l| l.starts_with("http://localhost:5173/reset-password/"))
            .map(str::to_string)
            .unwrap()
    };
    let token = link.rsplit('/').next().unwrap();

    let err = identity.reset_password(token, "short").unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    identity.reset_password(token, "battery staple").unwrap();
    identity.login("ada@example.com", "battery staple").unwrap();

    // Single use
    let err = identity
        .reset_password(token, "another password")
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
}

#[tokio::test]
async fn test_promotion_applies_to_existing_tokens() {
    let h = harness();
    let identity = identity(&h.db, h.notifier.clone());

    let session = identity
        .register(Registration {
            name: "Grace".to_string(),
            email: "grace@example.com".to_string(),
            password: "compilers!".to_string(),
        })
        .unwrap();
    h.db.modify_user(&session.user.id, |u| {
        u.role = Role::Expert;
        Ok::<(), ()>(())
    })
    .unwrap();

    let actor = identity.authenticate(&session.token).unwrap();
    assert_eq!(actor.role, Role::Expert);
    assert_eq!(identity.list_experts().unwrap().len(), 2);
}

#[tokio::test]
async fn test_expired_reset_token_rejected() {
    let h = harness();
    let identity = identity(&h.db, h.notifier.clone());

    identity
        .register(Registration {
            name: "Lin".to_string(),
            email: "lin@example.com".to_string(),
            password: "first password".to_string(),
        })
        .unwrap();
    identity.forgot_password("lin@example.com").unwrap();
    settle().await;

    let token = {
        let sent = h.notifier.sent.lock().unwrap();
        let link = sent[0]
            .text
            .lines()
            .find(|l| l.starts_with("http://localhost:5173/reset-password/"))
            .map(str::to_string)
            .unwrap();
        link.rsplit('/').next().unwrap().to_string()
    };

    let user = h.db.get_user_by_email("lin@example.com").unwrap().unwrap();
    h.db.modify_user(&user.id, |u| {
        u.reset_expires_at = Some(Utc::now() - Duration::minutes(1));
        Ok::<(), ()>(())
    })
    .unwrap();

    let err = identity
        .reset_password(&token, "second password")
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
    identity.login("lin@example.com", "first password").unwrap();
}

// ============================================================================
// Failing collaborators
// ============================================================================

/// Delegates to a local store until its put allowance runs out.
struct FlakyStore {
    inner: Arc<LocalStore>,
    puts_left: AtomicUsize,
    put_keys: Mutex<Vec<String>>,
}

impl FlakyStore {
    fn new(inner: Arc<LocalStore>) -> Self {
        Self {
            inner,
            puts_left: AtomicUsize::new(usize::MAX),
            put_keys: Mutex::new(Vec::new()),
        }
    }

    fn allow_puts(&self, n: usize) {
        self.puts_left.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<StoredObject, ObjectStoreError> {
        let allowed = self
            .puts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(ObjectStoreError::Backend("bucket unavailable".to_string()));
        }
        let stored = self.inner.put(key, data).await?;
        self.put_keys.lock().unwrap().push(key.to_string());
        Ok(stored)
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        self.inner.exists(key).await
    }

    async fn signed_url(
        &self,
        key: &str,
        request: SignedUrlRequest<'_>,
    ) -> Result<SignedUrl, ObjectStoreError> {
        self.inner.signed_url(key, request).await
    }
}

struct FailingNotifier {
    attempts: AtomicUsize,
}

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _email: Email) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(NotifyError::Transport("smtp relay refused".to_string()))
    }
}

#[tokio::test]
async fn test_failed_file_put_leaves_record_untouched() {
    let h = harness();
    let store = Arc::new(FlakyStore::new(h.store.clone()));
    let workflow = Workflow::new(
        h.db.clone(),
        store.clone(),
        h.notifier.clone(),
        Duration::seconds(60),
    );

    let created = workflow
        .create(&h.author, submission("Stable"))
        .await
        .unwrap();
    let before = h.db.get_manuscript(&created.id).unwrap().unwrap();

    store.allow_puts(0);
    let err = workflow
        .update(
            &h.author,
            &created.id,
            ManuscriptPatch {
                title: Some("Changed".to_string()),
                file: Some(pdf("v2.pdf", b"%PDF-1.4 second")),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Dependency(_)), "{err:?}");

    let after = h.db.get_manuscript(&created.id).unwrap().unwrap();
    assert_eq!(after, before);
    assert!(h.store.exists(&before.file_id).await.unwrap());
}

#[tokio::test]
async fn test_failed_thumbnail_put_discards_fresh_file() {
    let h = harness();
    let store = Arc::new(FlakyStore::new(h.store.clone()));
    let workflow = Workflow::new(
        h.db.clone(),
        store.clone(),
        h.notifier.clone(),
        Duration::seconds(60),
    );

    let created = workflow
        .create(&h.author, submission("Stable"))
        .await
        .unwrap();
    let before = h.db.get_manuscript(&created.id).unwrap().unwrap();
    let puts_before = store.put_keys.lock().unwrap().len();

    // The new file lands, the thumbnail does not
    store.allow_puts(1);
    workflow
        .update(
            &h.author,
            &created.id,
            ManuscriptPatch {
                title: Some("Changed".to_string()),
                file: Some(pdf("v2.pdf", b"%PDF-1.4 second")),
                thumbnail: Some(Upload::new(
                    "cover.png",
                    None,
                    Bytes::from_static(b"\x89PNG"),
                )),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    let after = h.db.get_manuscript(&created.id).unwrap().unwrap();
    assert_eq!(after, before);
    assert!(h.store.exists(&before.file_id).await.unwrap());

    let fresh: Vec<String> = store.put_keys.lock().unwrap()[puts_before..].to_vec();
    assert_eq!(fresh.len(), 1);
    assert!(!h.store.exists(&fresh[0]).await.unwrap());
}

#[tokio::test]
async fn test_notifier_failure_does_not_fail_transitions() {
    let h = harness();
    let notifier = Arc::new(FailingNotifier {
        attempts: AtomicUsize::new(0),
    });
    let workflow = Workflow::new(
        h.db.clone(),
        h.store.clone(),
        notifier.clone(),
        Duration::seconds(60),
    );

    let m = workflow
        .create(&h.author, submission("Resilient"))
        .await
        .unwrap();
    workflow
        .assign_reviewer(&h.admin, &m.id, &h.expert.id)
        .unwrap();
    workflow.start_review(&h.expert, &m.id).unwrap();
    let decided = workflow
        .decide(&h.expert, &m.id, "accepted", "Fine")
        .unwrap();
    assert_eq!(decided.status, ManuscriptStatus::Accepted);
    let published = workflow.toggle_publish(&h.admin, &m.id).unwrap();
    assert_eq!(published.status, ManuscriptStatus::Published);

    settle().await;
    assert!(notifier.attempts.load(Ordering::SeqCst) >= 3);
    // Inbox entries are written even when email delivery fails
    let expert = h.db.get_user(&h.expert.id).unwrap().unwrap();
    assert_eq!(expert.notifications.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_assignment_has_one_winner() {
    let h = harness();
    let second = add_user(&h.db, "expert-2", Role::Expert);
    let m = h
        .workflow
        .create(&h.author, submission("Contested"))
        .await
        .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [h.expert.id.clone(), second.id.clone()]
        .into_iter()
        .map(|reviewer| {
            let workflow = h.workflow.clone();
            let admin = h.admin.clone();
            let id = m.id.clone();
            let barrier = barrier.clone();
            tokio::task::spawn_blocking(move || {
                barrier.wait();
                workflow
                    .assign_reviewer(&admin, &id, &reviewer)
                    .map(|m| m.reviewer_id)
            })
        })
        .collect();

    let mut winners = Vec::new();
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(reviewer) => winners.push(reviewer),
            Err(ServiceError::StateConflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(conflicts, 1);

    let stored = h.db.get_manuscript(&m.id).unwrap().unwrap();
    assert_eq!(stored.status, ManuscriptStatus::Submitted);
    assert_eq!(stored.reviewer_id, winners[0]);
    settle().await;
}

#[tokio::test]
async fn test_approval_never_demotes_admin() {
    let h = harness();
    let request = h
        .workflow
        .submit_expert_request(&h.author, "Happy to review")
        .unwrap();

    // Promoted to admin while the request was pending
    h.db.modify_user(&h.author.id, |u| {
        u.role = Role::Admin;
        Ok::<(), ()>(())
    })
    .unwrap();

    let approved = h
        .workflow
        .approve_expert_request(&h.admin, &request.id)
        .unwrap();
    assert_eq!(approved.id, request.id);
    let user = h.db.get_user(&h.author.id).unwrap().unwrap();
    assert_eq!(user.role, Role::Admin);
    settle().await;
}
