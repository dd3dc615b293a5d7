//! Throwaway Postgres databases for integration tests.
//!
//! Each [`TestDatabase`] is a fresh database named `callqa_test_<uuid>` on the server behind
//! `CALLQA_PG_DSN`. It is dropped on [`TestDatabase::cleanup`] or, failing that, on `Drop`.
//! Set `CALLQA_KEEP_TEST_DB=1` to keep databases around for inspection after a failing run.

mod error;

pub use error::{Error, Result};

use std::{env, str::FromStr, thread};

use sqlx::{
	ConnectOptions, Connection, Executor,
	postgres::{PgConnectOptions, PgConnection},
};
use tokio::runtime::Builder;
use uuid::Uuid;

pub const DSN_ENV: &str = "CALLQA_PG_DSN";
pub const KEEP_ENV: &str = "CALLQA_KEEP_TEST_DB";

const NAME_PREFIX: &str = "callqa_test_";
const ADMIN_DATABASES: [&str; 2] = ["postgres", "template1"];

pub struct TestDatabase {
	name: String,
	dsn: String,
	admin: PgConnectOptions,
	state: Lifecycle,
}
impl TestDatabase {
	pub async fn new(base_dsn: &str) -> Result<Self> {
		let base = PgConnectOptions::from_str(base_dsn)
			.map_err(|err| Error::Message(format!("Failed to parse {DSN_ENV}: {err}.")))?;
		let (admin, mut conn) = connect_admin(&base).await?;
		let name = format!("{NAME_PREFIX}{}", Uuid::new_v4().simple());

		conn.execute(format!(r#"CREATE DATABASE "{name}""#).as_str())
			.await
			.map_err(|err| Error::Message(format!("Failed to create {name}: {err}.")))?;

		let dsn = base.database(&name).to_url_lossy().to_string();
		let state = if keep_requested(env::var(KEEP_ENV).ok().as_deref()) {
			Lifecycle::Kept
		} else {
			Lifecycle::Live
		};

		Ok(Self { name, dsn, admin, state })
	}

	pub fn dsn(&self) -> &str {
		&self.dsn
	}

	/// Drops the database now, surfacing any error. Kept databases are only reported.
	pub async fn cleanup(mut self) -> Result<()> {
		match self.state {
			Lifecycle::Dropped => Ok(()),
			Lifecycle::Kept => {
				eprintln!("Keeping test database {} ({}).", self.name, self.dsn);

				self.state = Lifecycle::Dropped;

				Ok(())
			},
			Lifecycle::Live => {
				drop_database(&self.name, &self.admin).await?;

				self.state = Lifecycle::Dropped;

				Ok(())
			},
		}
	}
}
impl Drop for TestDatabase {
	fn drop(&mut self) {
		if self.state != Lifecycle::Live {
			return;
		}

		let name = self.name.clone();
		let admin = self.admin.clone();

		// Drop may run inside a tokio runtime, so the cleanup gets its own thread and runtime.
		let worker = thread::spawn(move || {
			let result = Builder::new_current_thread()
				.enable_all()
				.build()
				.map_err(|err| Error::Message(err.to_string()))
				.and_then(|runtime| runtime.block_on(drop_database(&name, &admin)));

			if let Err(err) = result {
				eprintln!("Test database cleanup failed for {name}: {err}.");
			}
		});
		let _ = worker.join();
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
	Live,
	Kept,
	Dropped,
}

pub fn env_dsn() -> Option<String> {
	env::var(DSN_ENV).ok().filter(|dsn| !dsn.trim().is_empty())
}

fn keep_requested(raw: Option<&str>) -> bool {
	matches!(raw.map(str::trim), Some("1" | "true" | "yes"))
}

async fn connect_admin(base: &PgConnectOptions) -> Result<(PgConnectOptions, PgConnection)> {
	let mut last_err = None;

	for database in ADMIN_DATABASES {
		let options = base.clone().database(database);

		match PgConnection::connect_with(&options).await {
			Ok(conn) => return Ok((options, conn)),
			Err(err) => last_err = Some(err),
		}
	}

	Err(Error::Message(format!("Failed to connect to an admin database: {last_err:?}.")))
}

async fn drop_database(name: &str, admin: &PgConnectOptions) -> Result<()> {
	if !name.starts_with(NAME_PREFIX) {
		return Err(Error::Message(format!("Refusing to drop non-test database {name}.")));
	}

	let mut conn = PgConnection::connect_with(admin).await?;

	// Pools from the test may still hold sessions.
	sqlx::query(
		"\
SELECT pg_terminate_backend(pid)
FROM pg_stat_activity
WHERE datname = $1 AND pid <> pg_backend_pid()",
	)
	.bind(name)
	.fetch_all(&mut conn)
	.await?;
	conn.execute(format!(r#"DROP DATABASE IF EXISTS "{name}""#).as_str()).await?;

	Ok(())
}
