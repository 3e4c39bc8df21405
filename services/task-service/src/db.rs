use async_trait::async_trait;
use rustls::{ClientConfig, RootCertStore};
use tokio::task::JoinHandle;
use tokio_postgres::{config::SslMode, types::ToSql, Client, Config, Row};
use tokio_postgres_rustls::MakeRustlsConnect;

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::models::{Task, TaskStatus};

const SQL_CREATE_TASKS: &str = "CREATE TABLE IF NOT EXISTS tasks (\
id SERIAL PRIMARY KEY, \
title TEXT NOT NULL, \
status TEXT NOT NULL, \
attachment_url TEXT)";
const SQL_LIST_TASKS: &str = "SELECT id, title, status, attachment_url FROM tasks ORDER BY id ASC";
const SQL_INSERT_TASK: &str = "INSERT INTO tasks (title, status, attachment_url) VALUES ($1, $2, $3)";
const SQL_UPDATE_STATUS: &str = "UPDATE tasks SET status = $1 WHERE id = $2";
const SQL_DELETE_TASK: &str = "DELETE FROM tasks WHERE id = $1";

/// Task persistence. Update and delete report affected rows; zero is not an error.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn init_schema(&self) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<Task>, StoreError>;
    async fn insert(&self, title: Option<&str>, attachment_url: Option<&str>)
        -> Result<(), StoreError>;
    async fn mark_completed(&self, id: i32) -> Result<u64, StoreError>;
    async fn delete(&self, id: i32) -> Result<u64, StoreError>;
}

/// Best-effort startup provisioning: failures are logged and the process keeps starting.
pub async fn initialize_schema(store: &dyn TaskStore) -> bool {
    match store.init_schema().await {
        Ok(()) => {
            tracing::info!("database initialized");
            true
        }
        Err(err) => {
            tracing::error!(error = %err, "database initialization failed");
            false
        }
    }
}

/// TLS connector trusting the webpki root set. `sslmode` decides whether it is used.
pub fn tls_connector() -> MakeRustlsConnect {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    MakeRustlsConnect::new(config)
}

/// Opens a new connection for every operation; nothing is pooled.
pub struct PgTaskStore {
    config: DatabaseConfig,
    tls: MakeRustlsConnect,
}

impl PgTaskStore {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            tls: tls_connector(),
        }
    }

    fn pg_config(&self) -> Result<Config, StoreError> {
        match &self.config {
            DatabaseConfig::Url(url) => url
                .parse::<Config>()
                .map_err(|err| StoreError::Connect(err.to_string())),
            DatabaseConfig::Params {
                host,
                dbname,
                user,
                password,
                port,
                sslmode,
            } => {
                let mut config = Config::new();
                config
                    .host(host)
                    .dbname(dbname)
                    .user(user)
                    .password(password)
                    .port(*port)
                    .ssl_mode(parse_ssl_mode(sslmode));
                Ok(config)
            }
        }
    }

    async fn open(&self) -> Result<ScopedConnection, StoreError> {
        ScopedConnection::open(&self.pg_config()?, self.tls.clone()).await
    }

    /// Runs one statement in its own transaction and commits it.
    async fn execute_committed(
        &self,
        operation: &'static str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, StoreError> {
        let mut conn = self.open().await?;
        let tx = conn
            .client
            .transaction()
            .await
            .map_err(|err| StoreError::statement("begin transaction", err))?;
        let affected = tx
            .execute(sql, params)
            .await
            .map_err(|err| StoreError::statement(operation, err))?;
        tx.commit()
            .await
            .map_err(|err| StoreError::Commit(err.to_string()))?;
        Ok(affected)
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn init_schema(&self) -> Result<(), StoreError> {
        self.execute_committed("create table", SQL_CREATE_TASKS, &[])
            .await
            .map(|_| ())
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        let conn = self.open().await?;
        let rows = conn
            .client
            .query(SQL_LIST_TASKS, &[])
            .await
            .map_err(|err| StoreError::statement("list tasks", err))?;
        rows.iter().map(task_from_row).collect()
    }

    async fn insert(
        &self,
        title: Option<&str>,
        attachment_url: Option<&str>,
    ) -> Result<(), StoreError> {
        let status = TaskStatus::Pending;
        self.execute_committed(
            "insert task",
            SQL_INSERT_TASK,
            &[&title, &status.as_str(), &attachment_url],
        )
        .await
        .map(|_| ())
    }

    async fn mark_completed(&self, id: i32) -> Result<u64, StoreError> {
        let status = TaskStatus::Completed;
        self.execute_committed("update status", SQL_UPDATE_STATUS, &[&status.as_str(), &id])
            .await
    }

    async fn delete(&self, id: i32) -> Result<u64, StoreError> {
        self.execute_committed("delete task", SQL_DELETE_TASK, &[&id])
            .await
    }
}

fn task_from_row(row: &Row) -> Result<Task, StoreError> {
    let decode = |err: tokio_postgres::Error| StoreError::statement("decode task", err);
    Ok(Task {
        id: row.try_get("id").map_err(decode)?,
        title: row.try_get("title").map_err(decode)?,
        status: TaskStatus::from(row.try_get::<_, String>("status").map_err(decode)?),
        attachment_url: row.try_get("attachment_url").map_err(decode)?,
    })
}

/// Anything other than an explicit opt-down is treated as `require`.
fn parse_ssl_mode(value: &str) -> SslMode {
    match value.to_ascii_lowercase().as_str() {
        "disable" => SslMode::Disable,
        "allow" | "prefer" => SslMode::Prefer,
        _ => SslMode::Require,
    }
}

/// A client plus the task driving its socket. Dropping it closes the connection.
///
/// Fields drop in order: the client goes first, which makes the driver send
/// Terminate and finish on its own.
struct ScopedConnection {
    client: Client,
    _driver: JoinHandle<()>,
}

impl ScopedConnection {
    async fn open(config: &Config, tls: MakeRustlsConnect) -> Result<Self, StoreError> {
        let (client, connection) = config
            .connect(tls)
            .await
            .map_err(|err| StoreError::Connect(err.to_string()))?;
        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = %err, "database connection error");
            }
            tracing::trace!("database connection released");
        });
        Ok(Self {
            client,
            _driver: driver,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const SSL_REQUEST: [u8; 8] = [0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f];
    const TLS_HANDSHAKE_RECORD: u8 = 0x16;

    fn local_params(port: u16, sslmode: &str) -> DatabaseConfig {
        DatabaseConfig::Params {
            host: "127.0.0.1".to_string(),
            dbname: "postgres".to_string(),
            user: "nobody".to_string(),
            password: "nothing".to_string(),
            port,
            sslmode: sslmode.to_string(),
        }
    }

    #[test]
    fn ssl_mode_only_opts_down_when_asked() {
        assert!(matches!(parse_ssl_mode("require"), SslMode::Require));
        assert!(matches!(parse_ssl_mode("verify-full"), SslMode::Require));
        assert!(matches!(parse_ssl_mode("DISABLE"), SslMode::Disable));
        assert!(matches!(parse_ssl_mode("prefer"), SslMode::Prefer));
    }

    #[test]
    fn require_configs_build_from_params_and_urls() {
        let store = PgTaskStore::new(local_params(5432, "require"));
        let config = store.pg_config().unwrap();
        assert!(matches!(config.get_ssl_mode(), SslMode::Require));

        let store = PgTaskStore::new(DatabaseConfig::Url(
            "host=pg.postgres.database.azure.com dbname=postgres user=app sslmode=require"
                .to_string(),
        ));
        let config = store.pg_config().unwrap();
        assert!(matches!(config.get_ssl_mode(), SslMode::Require));
    }

    #[test]
    fn malformed_database_url_is_a_connect_error() {
        let store = PgTaskStore::new(DatabaseConfig::Url("host=db port=notaport".to_string()));
        assert!(matches!(store.pg_config(), Err(StoreError::Connect(_))));
    }

    #[tokio::test]
    async fn unreachable_database_fails_without_panicking() {
        let store = PgTaskStore::new(local_params(1, "disable"));

        assert!(matches!(store.list().await, Err(StoreError::Connect(_))));
        assert!(!initialize_schema(&store).await);
    }

    #[tokio::test]
    async fn require_starts_a_tls_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 8];
            socket.read_exact(&mut request).await.unwrap();
            socket.write_all(b"S").await.unwrap();
            let mut record = [0u8; 1];
            socket.read_exact(&mut record).await.unwrap();
            (request, record[0])
        });

        let store = PgTaskStore::new(local_params(port, "require"));
        // The server hangs up mid-handshake, so the call itself fails.
        assert!(matches!(store.list().await, Err(StoreError::Connect(_))));

        let (request, record) = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request, SSL_REQUEST);
        assert_eq!(record, TLS_HANDSHAKE_RECORD);
    }

    #[tokio::test]
    async fn dropping_a_connection_sends_terminate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut len = [0u8; 4];
            socket.read_exact(&mut len).await.unwrap();
            let mut startup = vec![0u8; u32::from_be_bytes(len) as usize - 4];
            socket.read_exact(&mut startup).await.unwrap();
            // AuthenticationOk, then ReadyForQuery (idle).
            socket.write_all(&[b'R', 0, 0, 0, 8, 0, 0, 0, 0]).await.unwrap();
            socket.write_all(&[b'Z', 0, 0, 0, 5, b'I']).await.unwrap();
            let mut tag = [0u8; 1];
            socket.read_exact(&mut tag).await.unwrap();
            tag[0]
        });

        let store = PgTaskStore::new(local_params(port, "disable"));
        let conn = store.open().await.unwrap();
        drop(conn);

        let tag = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tag, b'X');
    }
}
