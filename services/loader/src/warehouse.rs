//! Warehouse writer - recreates the star schema and loads the projections
//!
//! One session, one statement at a time, auto-commit throughout. The session
//! is owned by `create_dimensions_and_fact` and closed on every exit path.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode, Postgres};
use sqlx::{Connection, QueryBuilder};
use tracing::{error, info, warn};

use crate::config::WarehouseSettings;
use crate::frame::{Frame, Row};
use crate::tables::{project_tables, quote_ident, TargetTable, TABLES};

/// Port used when `ACCOUNT` has none.
const DEFAULT_PORT: u16 = 5432;

/// Bind parameters one statement may carry on the wire.
const MAX_BIND_PARAMS: usize = 65_535;

/// Rows shown when an insert fails.
const FAILURE_SAMPLE_ROWS: usize = 3;

/// A warehouse session the loader can drive
#[allow(async_fn_in_trait)]
pub trait Warehouse {
    /// Run one statement with no parameters (DDL, session settings).
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Insert `rows` into `table` as a batch. Missing cells bind as NULL.
    async fn insert_rows(&mut self, table: &str, columns: &[String], rows: &[Row]) -> Result<u64>;

    async fn close(self) -> Result<()>;
}

/// Rows written to one table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableLoad {
    pub table: &'static str,
    pub rows: usize,
}

/// Postgres-wire warehouse session over a single sqlx connection
pub struct PgWarehouse {
    conn: PgConnection,
}

impl PgWarehouse {
    /// Open the one session used for the whole run.
    pub async fn connect(settings: &WarehouseSettings) -> Result<Self> {
        let options = connect_options(settings).context("Failed to connect to warehouse")?;
        let conn = PgConnection::connect_with(&options)
            .await
            .context("Failed to connect to warehouse")?;

        let mut session = Self { conn };

        if let Some(role) = &settings.role {
            let set_role = format!("SET ROLE {}", quote_ident(role));
            if let Err(e) = session.execute(&set_role).await {
                if let Err(close_err) = session.close().await {
                    warn!(error = %close_err, "failed to close warehouse session");
                }
                return Err(e);
            }
        }

        info!("warehouse session open");
        Ok(session)
    }
}

/// Session options built from the settings alone.
///
/// Host, port, user, password and database are always set here, so `PG*`
/// variables never fill them, and `~/.pgpass` is never read. A missing
/// connection setting is an error rather than a silent fallback.
fn connect_options(settings: &WarehouseSettings) -> Result<PgConnectOptions> {
    let account = required(&settings.account, "ACCOUNT")?;
    let user = required(&settings.user, "USER")?;
    let password = required(&settings.password, "PASSWORD")?;
    let database = required(&settings.database, "DATABASE")?;

    let (host, port) = split_account(account);
    let mut options = PgConnectOptions::new_without_pgpass()
        .host(host)
        .port(port.unwrap_or(DEFAULT_PORT))
        .username(user)
        .password(password)
        .database(database)
        .ssl_mode(PgSslMode::Prefer)
        .application_name("loader");

    if let Some(schema) = &settings.schema {
        options = options.options([("search_path", quote_ident(schema))]);
    }
    if let Some(warehouse) = &settings.warehouse {
        options = options.options([("cluster", warehouse.as_str())]);
    }
    Ok(options)
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value.as_deref().with_context(|| format!("{} is not set", name))
}

/// `host` or `host:port`.
fn split_account(account: &str) -> (&str, Option<u16>) {
    match account.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (account, None),
        },
        None => (account, None),
    }
}

impl Warehouse for PgWarehouse {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql)
            .execute(&mut self.conn)
            .await
            .with_context(|| format!("Statement failed: {}", sql))?;
        Ok(())
    }

    async fn insert_rows(&mut self, table: &str, columns: &[String], rows: &[Row]) -> Result<u64> {
        let per_statement = (MAX_BIND_PARAMS / columns.len().max(1)).max(1);
        let mut inserted = 0;

        for chunk in rows.chunks(per_statement) {
            let mut qb: QueryBuilder<'_, Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({}) ", table, columns.join(", ")));
            qb.push_values(chunk, |mut b, row| {
                for cell in row {
                    b.push_bind(cell.clone());
                }
            });

            let result = qb.build().persistent(false).execute(&mut self.conn).await?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    async fn close(self) -> Result<()> {
        self.conn
            .close()
            .await
            .context("Failed to close warehouse session")?;
        info!("warehouse session closed");
        Ok(())
    }
}

/// Drop and recreate every target table. Existing contents are discarded.
pub async fn prepare_schema<W: Warehouse>(session: &mut W, schema: Option<&str>) -> Result<()> {
    for table in TABLES {
        warn!(table = %table.qualified_name(schema), "replacing table");
        for statement in table.replace_statements(schema) {
            session.execute(&statement).await?;
        }
    }
    Ok(())
}

/// Insert one table's projection. Returns the number of rows written.
///
/// Empty input, or input that empties out after null handling, is logged
/// and skipped. A failed insert is logged with a few sample rows and
/// returned as an error.
pub async fn load_table<W: Warehouse>(
    session: &mut W,
    schema: Option<&str>,
    table: &TargetTable,
    rows: Frame,
) -> Result<usize> {
    if rows.is_empty() {
        info!(table = table.name, "no data to insert");
        return Ok(0);
    }

    let rows = table.prepare_rows(rows);
    if rows.is_empty() {
        info!(table = table.name, "no valid data to insert after cleaning");
        return Ok(0);
    }

    let target = table.qualified_name(schema);
    match session.insert_rows(&target, rows.columns(), rows.rows()).await {
        Ok(_) => {
            info!(table = table.name, rows = rows.len(), "rows inserted");
            Ok(rows.len())
        }
        Err(e) => {
            error!(table = table.name, error = %format!("{:#}", e), "insert failed");
            let sample = failure_sample(rows.rows());
            error!(table = table.name, sample = ?sample, "sample of rows in the failed batch");
            Err(e.context(format!("Failed to insert into {}", target)))
        }
    }
}

/// The first few rows of a failed batch, for the error log.
fn failure_sample(rows: &[Row]) -> &[Row] {
    &rows[..rows.len().min(FAILURE_SAMPLE_ROWS)]
}

/// Row counts a live run would insert, without touching a warehouse.
pub fn planned_loads(frame: &Frame) -> Vec<TableLoad> {
    project_tables(frame)
        .into_iter()
        .map(|(table, rows)| TableLoad {
            table: table.name,
            rows: table.prepare_rows(rows).len(),
        })
        .collect()
}

/// Recreate the schema and load every table from the cleaned export.
///
/// Takes ownership of the session and closes it whether or not the load
/// succeeds. The first failing table stops the run.
pub async fn create_dimensions_and_fact<W: Warehouse>(
    mut session: W,
    schema: Option<&str>,
    frame: &Frame,
) -> Result<Vec<TableLoad>> {
    let result = load_all(&mut session, schema, frame).await;
    let closed = session.close().await;

    match (result, closed) {
        (Ok(loads), Ok(())) => {
            info!(tables = loads.len(), "tables and data loaded into the warehouse");
            Ok(loads)
        }
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!(error = %close_err, "failed to close warehouse session");
            Err(e)
        }
    }
}

async fn load_all<W: Warehouse>(
    session: &mut W,
    schema: Option<&str>,
    frame: &Frame,
) -> Result<Vec<TableLoad>> {
    prepare_schema(session, schema).await?;

    let mut loads = Vec::with_capacity(TABLES.len());
    for (table, rows) in project_tables(frame) {
        let inserted = load_table(session, schema, table, rows).await?;
        loads.push(TableLoad {
            table: table.name,
            rows: inserted,
        });
    }
    Ok(loads)
}
