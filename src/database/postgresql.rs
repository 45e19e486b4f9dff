use super::{BackupArtifact, BackupOutcome, Database, DbType};
use crate::config::DatabaseConfig;
use crate::error::{BackupError, Result};
use crate::export::batcher::quote_ident;
use crate::export::{export_database, ColumnInfo, Page, PageRequest, SqlValue, TableSource};
use crate::pipeline::ArtifactGuard;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::{Client, NoTls};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, error, info, warn};

const SCHEMA: &str = "public";

/// Where one PostgreSQL dump currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpState {
    Idle,
    Connected,
    Enumerating,
    ExportingTable(usize),
    Disconnected,
    Done,
    Failed,
}

/// Logical dump through a regular client connection, one table after another.
#[derive(Debug, Clone)]
pub struct PostgreSql {
    fetch_batch_size: u64,
    insert_batch_size: usize,
}

impl PostgreSql {
    pub fn new(fetch_batch_size: u64, insert_batch_size: usize) -> Self {
        PostgreSql {
            fetch_batch_size,
            insert_batch_size,
        }
    }
}

#[async_trait::async_trait]
impl Database for PostgreSql {
    fn db_type(&self) -> DbType {
        DbType::Postgresql
    }

    async fn backup(&self, config: &DatabaseConfig, backup_dir: &Path) -> Result<BackupOutcome> {
        let artifact = BackupArtifact::for_database(DbType::Postgresql, config, backup_dir);
        if let Some(parent) = artifact.local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        info!(database = %config.name, "Preparing database backup {}", artifact.local_path.display());

        let mut state = DumpState::Idle;
        let session = Session::connect(config).await?;
        state = advance(&config.name, state, DumpState::Connected);

        let result = write_dump(
            &session.client,
            &artifact.local_path,
            &config.skip_tables,
            self.fetch_batch_size,
            self.insert_batch_size,
            &mut state,
        )
        .await;

        // Released on every path, including a failed export.
        session.disconnect().await;
        state = advance(&config.name, state, DumpState::Disconnected);

        result?;
        advance(&config.name, state, DumpState::Done);
        Ok(BackupOutcome::Local(artifact))
    }
}

fn advance(database: &str, from: DumpState, to: DumpState) -> DumpState {
    debug!(database, "Dump state {:?} -> {:?}", from, to);
    to
}

/// Writes every table of `source` into a fresh file at `path`.
///
/// `state` moves to `ExportingTable(i)` as each table starts and ends in
/// `Failed` if any step fails. A failed or abandoned dump leaves no file behind.
pub async fn write_dump<S>(
    source: &S,
    path: &Path,
    skip_tables: &std::collections::BTreeSet<String>,
    fetch_batch_size: u64,
    insert_batch_size: usize,
    state: &mut DumpState,
) -> Result<()>
where
    S: TableSource + ?Sized,
{
    let mut guard = ArtifactGuard::new();
    guard.track(path);

    let result = async {
        let mut out = BufWriter::new(File::create(path).await?);
        *state = DumpState::Enumerating;
        export_database(
            source,
            &mut out,
            skip_tables,
            fetch_batch_size,
            insert_batch_size,
            |index, table| {
                debug!(table, "Dump state {:?} -> ExportingTable({})", *state, index);
                *state = DumpState::ExportingTable(index);
            },
        )
        .await?;
        out.flush().await?;
        out.into_inner().sync_all().await?;
        Ok::<_, BackupError>(())
    }
    .await;

    match result {
        Ok(()) => {
            guard.release();
            Ok(())
        }
        Err(e) => {
            *state = DumpState::Failed;
            // A partial dump is not a backup.
            guard.cleanup().await;
            Err(e)
        }
    }
}

struct Session {
    client: Client,
    connection: JoinHandle<()>,
}

impl Session {
    async fn connect(config: &DatabaseConfig) -> Result<Session> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .user(&config.user)
            .password(&config.password)
            .dbname(&config.name);

        let connection_error = |e: &dyn std::fmt::Display| BackupError::Connection {
            database: config.name.clone(),
            reason: e.to_string(),
        };

        let (client, connection) = if config.tls {
            let tls = MakeRustlsConnect::new(tls_config().map_err(|e| connection_error(&e))?);
            let (client, connection) = pg.connect(tls).await.map_err(|e| connection_error(&e))?;
            (client, spawn_connection(connection))
        } else {
            let (client, connection) = pg.connect(NoTls).await.map_err(|e| connection_error(&e))?;
            (client, spawn_connection(connection))
        };

        Ok(Session { client, connection })
    }

    async fn disconnect(self) {
        drop(self.client);
        if let Err(e) = self.connection.await {
            warn!("PostgreSQL connection task ended abnormally: {}", e);
        }
    }
}

fn spawn_connection<F>(connection: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = std::result::Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("PostgreSQL connection error: {}", e);
        }
    })
}

/// TLS without certificate verification, the same trust level as `sslmode=require`.
fn tls_config() -> std::result::Result<rustls::ClientConfig, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    Ok(rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(danger::NoCertificateVerification(provider)))
        .with_no_client_auth())
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::CryptoProvider;
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};
    use std::sync::Arc;

    #[derive(Debug)]
    pub struct NoCertificateVerification(pub Arc<CryptoProvider>);

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            rustls::crypto::verify_tls12_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}

fn query_error(e: tokio_postgres::Error) -> BackupError {
    BackupError::Query(e.to_string())
}

fn table_ref(table: &str) -> String {
    format!("{}.{}", quote_ident(SCHEMA), quote_ident(table))
}

/// Types `SqlValue::from_sql` understands in binary form, by `udt_name`.
/// Arrays are named after their element type with a leading underscore.
fn decoded_natively(udt_name: &str) -> bool {
    let base = udt_name.strip_prefix('_').unwrap_or(udt_name);
    matches!(
        base,
        "bool"
            | "int2"
            | "int4"
            | "int8"
            | "oid"
            | "float4"
            | "float8"
            | "numeric"
            | "text"
            | "varchar"
            | "bpchar"
            | "name"
            | "xml"
            | "bytea"
            | "date"
            | "time"
            | "timestamp"
            | "timestamptz"
            | "json"
            | "jsonb"
            | "uuid"
    )
}

/// Column list of a page query. Anything without a binary decoding is cast
/// to text and keeps its name.
fn select_list(columns: &[ColumnInfo]) -> String {
    if columns.is_empty() {
        return "*".to_string();
    }
    columns
        .iter()
        .map(|c| {
            let name = quote_ident(&c.name);
            if c.read_as_text {
                format!("{}::text AS {}", name, name)
            } else {
                name
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[rustfmt::skip]
const LIST_TABLES: &str = concat!(
    "SELECT table_name::text ",
    "FROM   information_schema.tables ",
    "WHERE  table_schema = $1::text ",
    "AND    table_type = 'BASE TABLE' ",
    "ORDER  BY table_name"
);

#[rustfmt::skip]
const COLUMNS: &str = concat!(
    "SELECT c.column_name::text, ",
           "c.data_type IN ('smallint', 'integer', 'bigint'), ",
           "COALESCE(pk.single, false), ",
           "COALESCE(c.column_default LIKE 'nextval(%' OR c.is_identity = 'YES', false), ",
           "c.udt_name::text ",
    "FROM   information_schema.columns c ",
    "LEFT   JOIN ( ",
        "SELECT kcu.column_name, ",
               "COUNT(*) OVER (PARTITION BY tc.constraint_name) = 1 AS single ",
        "FROM   information_schema.table_constraints tc ",
        "JOIN   information_schema.key_column_usage kcu ",
        "ON     kcu.constraint_name = tc.constraint_name ",
        "AND    kcu.table_schema = tc.table_schema ",
        "AND    kcu.table_name = tc.table_name ",
        "WHERE  tc.constraint_type = 'PRIMARY KEY' ",
        "AND    tc.table_schema = $1::text ",
        "AND    tc.table_name = $2::text ",
    ") pk ON pk.column_name = c.column_name ",
    "WHERE  c.table_schema = $1::text ",
    "AND    c.table_name = $2::text ",
    "ORDER  BY c.ordinal_position"
);

#[async_trait::async_trait]
impl TableSource for Client {
    async fn list_tables(&self) -> Result<Vec<String>> {
        self.query(LIST_TABLES, &[&SCHEMA])
            .await
            .map_err(query_error)?
            .iter()
            .map(|row| row.try_get::<_, String>(0).map_err(query_error))
            .collect()
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table_ref(table));
        let count: i64 = self
            .query_one(&sql, &[])
            .await
            .and_then(|row| row.try_get(0))
            .map_err(query_error)?;
        Ok(count.max(0) as u64)
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.query(COLUMNS, &[&SCHEMA, &table])
            .await
            .map_err(query_error)?
            .iter()
            .map(|row| {
                let udt_name: String = row.try_get(4).map_err(query_error)?;
                Ok(ColumnInfo {
                    name: row.try_get(0).map_err(query_error)?,
                    integer: row.try_get(1).map_err(query_error)?,
                    primary_key: row.try_get(2).map_err(query_error)?,
                    auto_increment: row.try_get(3).map_err(query_error)?,
                    read_as_text: !decoded_natively(&udt_name),
                })
            })
            .collect()
    }

    async fn fetch(
        &self,
        table: &str,
        columns: &[ColumnInfo],
        request: &PageRequest<'_>,
    ) -> Result<Page> {
        let from = table_ref(table);
        let select = select_list(columns);
        let (statement, rows) = match *request {
            PageRequest::After {
                column,
                after: Some(after),
                limit,
            } => {
                let key = quote_ident(column);
                let sql = format!(
                    "SELECT {} FROM {} WHERE {} > $1::bigint ORDER BY {} LIMIT $2",
                    select, from, key, key
                );
                let statement = self.prepare(&sql).await.map_err(query_error)?;
                let rows = self
                    .query(&statement, &[&after, &(limit as i64)])
                    .await
                    .map_err(query_error)?;
                (statement, rows)
            }
            PageRequest::After {
                column,
                after: None,
                limit,
            } => {
                let sql = format!(
                    "SELECT {} FROM {} ORDER BY {} LIMIT $1",
                    select,
                    from,
                    quote_ident(column)
                );
                let statement = self.prepare(&sql).await.map_err(query_error)?;
                let rows = self
                    .query(&statement, &[&(limit as i64)])
                    .await
                    .map_err(query_error)?;
                (statement, rows)
            }
            PageRequest::Offset { offset, limit } => {
                let sql = format!("SELECT {} FROM {} OFFSET $1 LIMIT $2", select, from);
                let statement = self.prepare(&sql).await.map_err(query_error)?;
                let rows = self
                    .query(&statement, &[&(offset as i64), &(limit as i64)])
                    .await
                    .map_err(query_error)?;
                (statement, rows)
            }
        };

        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let rows = rows
            .iter()
            .map(|row| {
                (0..columns.len())
                    .map(|i| row.try_get::<_, SqlValue>(i).map_err(query_error))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Page { columns, rows })
    }
}

type DecodeError = Box<dyn Error + Sync + Send>;

fn take<'a>(buf: &mut &'a [u8], n: usize) -> std::result::Result<&'a [u8], DecodeError> {
    if buf.len() < n {
        return Err("truncated value".into());
    }
    let (head, rest) = buf.split_at(n);
    *buf = rest;
    Ok(head)
}

fn read_u16(buf: &mut &[u8]) -> std::result::Result<u16, DecodeError> {
    let b = take(buf, 2)?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

fn read_i32(buf: &mut &[u8]) -> std::result::Result<i32, DecodeError> {
    let b = take(buf, 4)?;
    Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Exact text of a binary NUMERIC: base-10000 digits, a weight in digits
/// before the point and a display scale in decimal places. No precision cap.
fn numeric_text(raw: &[u8]) -> std::result::Result<String, DecodeError> {
    let mut buf = raw;
    let ndigits = read_u16(&mut buf)? as usize;
    let weight = read_u16(&mut buf)? as i16 as i32;
    let sign = read_u16(&mut buf)?;
    let dscale = read_u16(&mut buf)? as usize;
    match sign {
        0xC000 => return Ok("NaN".into()),
        0xD000 => return Ok("Infinity".into()),
        0xF000 => return Ok("-Infinity".into()),
        _ => {}
    }
    let digits = (0..ndigits)
        .map(|_| read_u16(&mut buf))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let digit = |i: i32| {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == 0x4000 {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&digit(0).to_string());
        for i in 1..=weight {
            text.push_str(&format!("{:04}", digit(i)));
        }
    }
    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }
    Ok(text)
}

/// `infinity` and `-infinity`, stored as the extreme value of the type.
fn infinite_datetime(ty: &Type, raw: &[u8]) -> Option<&'static str> {
    let (max, min) = match *ty {
        Type::DATE => {
            let v = i32::from_be_bytes(raw.try_into().ok()?);
            (v == i32::MAX, v == i32::MIN)
        }
        Type::TIMESTAMP | Type::TIMESTAMPTZ => {
            let v = i64::from_be_bytes(raw.try_into().ok()?);
            (v == i64::MAX, v == i64::MIN)
        }
        _ => return None,
    };
    match (max, min) {
        (true, _) => Some("infinity"),
        (_, true) => Some("-infinity"),
        _ => None,
    }
}

/// Binary array of any dimension. Nested dimensions become nested arrays.
fn decode_array(member: &Type, raw: &[u8]) -> std::result::Result<SqlValue, DecodeError> {
    let mut buf = raw;
    let ndim = read_i32(&mut buf)?;
    let _has_nulls = read_i32(&mut buf)?;
    let _element_oid = read_i32(&mut buf)?;

    let mut dims = Vec::new();
    for _ in 0..ndim.max(0) {
        let len = read_i32(&mut buf)?;
        let _lower_bound = read_i32(&mut buf)?;
        dims.push(usize::try_from(len).unwrap_or(0));
    }

    let total: usize = if dims.is_empty() { 0 } else { dims.iter().product() };
    let mut elements = Vec::with_capacity(total);
    for _ in 0..total {
        let len = read_i32(&mut buf)?;
        let element = match usize::try_from(len) {
            Ok(len) => SqlValue::from_sql(member, take(&mut buf, len)?)?,
            Err(_) => SqlValue::Null,
        };
        elements.push(element);
    }
    Ok(nest(&dims, &mut elements.into_iter()))
}

fn nest<I: Iterator<Item = SqlValue>>(dims: &[usize], values: &mut I) -> SqlValue {
    match dims.split_first() {
        Some((&len, [])) => SqlValue::Array(values.by_ref().take(len).collect()),
        Some((&len, inner)) => SqlValue::Array((0..len).map(|_| nest(inner, values)).collect()),
        None => SqlValue::Array(Vec::new()),
    }
}

impl<'a> FromSql<'a> for SqlValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, DecodeError> {
        if let Some(text) = infinite_datetime(ty, raw) {
            return Ok(SqlValue::Text(text.to_string()));
        }
        let value = match *ty {
            Type::BOOL => SqlValue::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => SqlValue::Int(i16::from_sql(ty, raw)?.into()),
            Type::INT4 => SqlValue::Int(i32::from_sql(ty, raw)?.into()),
            Type::INT8 => SqlValue::Int(i64::from_sql(ty, raw)?),
            Type::OID => SqlValue::Int(u32::from_sql(ty, raw)?.into()),
            Type::FLOAT4 => SqlValue::Float(f32::from_sql(ty, raw)?.into()),
            Type::FLOAT8 => SqlValue::Float(f64::from_sql(ty, raw)?),
            Type::NUMERIC => SqlValue::Numeric(numeric_text(raw)?),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN | Type::XML => {
                SqlValue::Text(std::str::from_utf8(raw)?.to_string())
            }
            Type::BYTEA => SqlValue::Bytes(Vec::<u8>::from_sql(ty, raw)?),
            Type::DATE => SqlValue::Date(chrono::NaiveDate::from_sql(ty, raw)?),
            Type::TIME => SqlValue::Time(chrono::NaiveTime::from_sql(ty, raw)?),
            Type::TIMESTAMP => SqlValue::Timestamp(chrono::NaiveDateTime::from_sql(ty, raw)?),
            Type::TIMESTAMPTZ => {
                SqlValue::TimestampTz(chrono::DateTime::<chrono::Utc>::from_sql(ty, raw)?)
            }
            Type::JSON | Type::JSONB => SqlValue::Json(serde_json::Value::from_sql(ty, raw)?),
            Type::UUID => SqlValue::Text(uuid::Uuid::from_sql(ty, raw)?.to_string()),
            _ => match ty.kind() {
                Kind::Array(member) => decode_array(member, raw)?,
                Kind::Domain(inner) => SqlValue::from_sql(inner, raw)?,
                // Enum labels travel as plain text.
                Kind::Enum(_) => SqlValue::Text(std::str::from_utf8(raw)?.to_string()),
                _ => return Err(format!("no binary decoding for type {}, select it as text", ty).into()),
            },
        };
        Ok(value)
    }

    fn from_sql_null(_: &Type) -> std::result::Result<Self, DecodeError> {
        Ok(SqlValue::Null)
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}
