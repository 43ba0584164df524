//! Store adapter CRUD tests for users and senders

use dripmail::error::Error;
use dripmail::store_adapter::{CreateSender, StoreAdapter, UpdateSender, UpsertUser};
use dripmail::types::{Patch, UserId};
use dripmail_store_adapter_sqlite::StoreAdapterSqlite;
use tempfile::TempDir;

async fn create_test_adapter() -> (StoreAdapterSqlite, TempDir) {
	let temp_dir = TempDir::new().expect("Failed to create temp directory");
	let adapter = StoreAdapterSqlite::new(temp_dir.path()).await.expect("Failed to create adapter");
	(adapter, temp_dir)
}

fn alice() -> UpsertUser<'static> {
	UpsertUser {
		external_id: "google-123",
		email: "alice@example.com",
		name: "Alice",
		avatar_url: None,
	}
}

fn basic_sender<'a>(email: &'a str) -> CreateSender<'a> {
	CreateSender {
		email,
		name: "Alice",
		smtp_host: None,
		smtp_port: None,
		smtp_user: None,
		smtp_secret: None,
		is_default: false,
	}
}

#[tokio::test]
async fn test_upsert_user_creates_then_refreshes() {
	let (adapter, _temp) = create_test_adapter().await;

	let user = adapter.upsert_user(&alice()).await.unwrap();
	assert_eq!(&*user.email, "alice@example.com");

	// Same external identity with fresh attributes keeps the row
	let refreshed = adapter
		.upsert_user(&UpsertUser {
			external_id: "google-123",
			email: "alice@example.com",
			name: "Alice Cooper",
			avatar_url: Some("https://example.com/a.png"),
		})
		.await
		.unwrap();
	assert_eq!(refreshed.id, user.id);
	assert_eq!(&*refreshed.name, "Alice Cooper");
	assert_eq!(refreshed.avatar_url.as_deref(), Some("https://example.com/a.png"));

	let read_back = adapter.read_user(user.id).await.unwrap();
	assert_eq!(&*read_back.name, "Alice Cooper");
}

#[tokio::test]
async fn test_read_missing_user_is_not_found() {
	let (adapter, _temp) = create_test_adapter().await;
	assert!(matches!(adapter.read_user(UserId(999)).await, Err(Error::NotFound)));
}

#[tokio::test]
async fn test_duplicate_user_email_conflicts() {
	let (adapter, _temp) = create_test_adapter().await;
	adapter.upsert_user(&alice()).await.unwrap();

	let res = adapter
		.upsert_user(&UpsertUser {
			external_id: "google-456",
			email: "alice@example.com",
			name: "Impostor",
			avatar_url: None,
		})
		.await;
	assert!(matches!(res, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn test_first_sender_becomes_default() {
	let (adapter, _temp) = create_test_adapter().await;
	let user = adapter.upsert_user(&alice()).await.unwrap();

	let sender = adapter.create_sender(user.id, &basic_sender("a@corp.com")).await.unwrap();
	assert!(sender.is_default, "a user's first sender is the default");
	assert!(sender.is_active);

	let second = adapter.create_sender(user.id, &basic_sender("b@corp.com")).await.unwrap();
	assert!(!second.is_default);

	let def = adapter.default_sender(user.id).await.unwrap().unwrap();
	assert_eq!(def.id, sender.id);
}

#[tokio::test]
async fn test_at_most_one_default_sender() {
	let (adapter, _temp) = create_test_adapter().await;
	let user = adapter.upsert_user(&alice()).await.unwrap();

	let first = adapter.create_sender(user.id, &basic_sender("a@corp.com")).await.unwrap();
	let second = adapter
		.create_sender(
			user.id,
			&CreateSender { is_default: true, ..basic_sender("b@corp.com") },
		)
		.await
		.unwrap();
	assert!(second.is_default);

	let first = adapter.read_sender(user.id, first.id).await.unwrap();
	assert!(!first.is_default, "creating a new default clears the old one");

	let defaults: usize =
		adapter.list_senders(user.id).await.unwrap().iter().filter(|s| s.is_default).count();
	assert_eq!(defaults, 1);
}

#[tokio::test]
async fn test_sender_email_unique_per_user() {
	let (adapter, _temp) = create_test_adapter().await;
	let user = adapter.upsert_user(&alice()).await.unwrap();

	adapter.create_sender(user.id, &basic_sender("a@corp.com")).await.unwrap();
	let res = adapter.create_sender(user.id, &basic_sender("a@corp.com")).await;
	assert!(matches!(res, Err(Error::Conflict(_))));

	// Same address under another user is fine
	let other = adapter
		.upsert_user(&UpsertUser {
			external_id: "google-789",
			email: "bob@example.com",
			name: "Bob",
			avatar_url: None,
		})
		.await
		.unwrap();
	assert!(adapter.create_sender(other.id, &basic_sender("a@corp.com")).await.is_ok());
}

#[tokio::test]
async fn test_update_sender_patch_semantics() {
	let (adapter, _temp) = create_test_adapter().await;
	let user = adapter.upsert_user(&alice()).await.unwrap();
	let sender = adapter
		.create_sender(
			user.id,
			&CreateSender {
				smtp_host: Some("smtp.corp.com"),
				smtp_port: Some(587),
				smtp_user: Some("relay"),
				smtp_secret: Some("hunter2"),
				..basic_sender("a@corp.com")
			},
		)
		.await
		.unwrap();
	assert!(sender.smtp_config().is_some());

	let patch = UpdateSender {
		name: Patch::Value("Alice (work)".into()),
		smtp_host: Patch::Null,
		is_active: Patch::Value(false),
		..UpdateSender::default()
	};
	let updated = adapter.update_sender(user.id, sender.id, &patch).await.unwrap();
	assert_eq!(&*updated.name, "Alice (work)");
	assert!(updated.smtp_host.is_none());
	assert!(!updated.is_active);
	// Untouched fields survive
	assert_eq!(updated.smtp_user.as_deref(), Some("relay"));
	assert!(updated.smtp_config().is_none(), "config incomplete without a host");
}

#[tokio::test]
async fn test_update_foreign_sender_is_not_found() {
	let (adapter, _temp) = create_test_adapter().await;
	let user = adapter.upsert_user(&alice()).await.unwrap();
	let other = adapter
		.upsert_user(&UpsertUser {
			external_id: "google-789",
			email: "bob@example.com",
			name: "Bob",
			avatar_url: None,
		})
		.await
		.unwrap();
	let sender = adapter.create_sender(other.id, &basic_sender("b@corp.com")).await.unwrap();

	let res = adapter.update_sender(user.id, sender.id, &UpdateSender::default()).await;
	assert!(matches!(res, Err(Error::NotFound)));
}

#[tokio::test]
async fn test_default_sender_skips_inactive() {
	let (adapter, _temp) = create_test_adapter().await;
	let user = adapter.upsert_user(&alice()).await.unwrap();
	let sender = adapter.create_sender(user.id, &basic_sender("a@corp.com")).await.unwrap();

	let patch = UpdateSender { is_active: Patch::Value(false), ..UpdateSender::default() };
	adapter.update_sender(user.id, sender.id, &patch).await.unwrap();

	assert!(adapter.default_sender(user.id).await.unwrap().is_none());
	assert!(adapter.any_active_sender(user.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_sender_promotes_new_default() {
	let (adapter, _temp) = create_test_adapter().await;
	let user = adapter.upsert_user(&alice()).await.unwrap();
	let first = adapter.create_sender(user.id, &basic_sender("a@corp.com")).await.unwrap();
	let second = adapter.create_sender(user.id, &basic_sender("b@corp.com")).await.unwrap();

	adapter.delete_sender(user.id, first.id).await.unwrap();

	let remaining = adapter.list_senders(user.id).await.unwrap();
	assert_eq!(remaining.len(), 1);
	assert_eq!(remaining[0].id, second.id);
	assert!(remaining[0].is_default, "deleting the default promotes a survivor");
}

// vim: ts=4
