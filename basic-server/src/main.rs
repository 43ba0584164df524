use std::sync::Arc;

use dripmail::AppBuilder;
use dripmail::auth::google::GoogleIdentityProvider;
use dripmail::core::config::Config;
use dripmail_queue_adapter_sqlite::QueueAdapterSqlite;
use dripmail_store_adapter_sqlite::StoreAdapterSqlite;

#[tokio::main]
async fn main() {
	let config = match Config::from_env() {
		Ok(config) => config,
		Err(err) => {
			eprintln!("configuration error: {}", err);
			std::process::exit(1);
		}
	};

	if let Err(err) = run(config).await {
		eprintln!("fatal: {}", err);
		std::process::exit(1);
	}
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
	tokio::fs::create_dir_all(&*config.database_dir).await?;

	let store = Arc::new(StoreAdapterSqlite::new(&*config.database_dir).await?);
	let queue = Arc::new(QueueAdapterSqlite::new(&*config.database_dir).await?);

	let mut builder = AppBuilder::new().store_adapter(store).queue_adapter(queue);

	if let (Some(client_id), Some(client_secret), Some(callback_url)) = (
		config.google_client_id.clone(),
		config.google_client_secret.clone(),
		config.google_callback_url.clone(),
	) {
		let idp = GoogleIdentityProvider::new(client_id, client_secret, callback_url)?;
		builder = builder.identity_provider(Arc::new(idp));
	}

	builder.config(config).run().await?;

	Ok(())
}

// vim: ts=4
