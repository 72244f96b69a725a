//! Relational storage for tickets and everything a ticket references.
//!
//! Writes go through [`Store::begin`], which hands out a [`Transaction`]
//! scoped to one pooled connection. A transaction that is dropped without
//! [`Transaction::commit`] is rolled back.

/// Text primary key newtype with Postgres `TEXT` mapping.
macro_rules! string_id {
    () => {
        #[derive(
            Clone,
            Debug,
            ::serde::Deserialize,
            ::derive_more::derive::Display,
            Eq,
            Hash,
            Ord,
            PartialEq,
            PartialOrd,
            ::serde::Serialize,
        )]
        #[serde(transparent)]
        pub struct Id(String);

        impl Id {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for Id {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl ::tokio_postgres::types::FromSql<'_> for Id {
            ::tokio_postgres::types::accepts!(TEXT, VARCHAR);

            fn from_sql(
                ty: &::tokio_postgres::types::Type,
                raw: &[u8],
            ) -> Result<Self, Box<dyn ::std::error::Error + Sync + Send>> {
                <String as ::tokio_postgres::types::FromSql>::from_sql(ty, raw)
                    .map(Self)
            }
        }

        impl ::tokio_postgres::types::ToSql for Id {
            ::tokio_postgres::types::accepts!(TEXT, VARCHAR);

            ::tokio_postgres::types::to_sql_checked!();

            fn to_sql(
                &self,
                ty: &::tokio_postgres::types::Type,
                out: &mut ::tokio_postgres::types::private::BytesMut,
            ) -> Result<
                ::tokio_postgres::types::IsNull,
                Box<dyn ::std::error::Error + Sync + Send>,
            > {
                ::tokio_postgres::types::ToSql::to_sql(&self.0, ty, out)
            }
        }
    };
}

/// `INT2` mapping for a `#[repr(u8)]` enum deriving `TryFromRepr`.
macro_rules! smallint_enum {
    ($ty:ident, $invalid:literal) => {
        impl ::tokio_postgres::types::FromSql<'_> for $ty {
            ::tokio_postgres::types::accepts!(INT2);

            fn from_sql(
                ty: &::tokio_postgres::types::Type,
                raw: &[u8],
            ) -> Result<Self, Box<dyn ::std::error::Error + Sync + Send>> {
                let repr =
                    <i16 as ::tokio_postgres::types::FromSql>::from_sql(ty, raw)?;
                let repr = u8::try_from(repr)?;
                let value = Self::try_from(repr).map_err(|_| $invalid)?;
                Ok(value)
            }
        }

        impl ::tokio_postgres::types::ToSql for $ty {
            ::tokio_postgres::types::accepts!(INT2);

            ::tokio_postgres::types::to_sql_checked!();

            fn to_sql(
                &self,
                ty: &::tokio_postgres::types::Type,
                out: &mut ::tokio_postgres::types::private::BytesMut,
            ) -> Result<
                ::tokio_postgres::types::IsNull,
                Box<dyn ::std::error::Error + Sync + Send>,
            > {
                let repr = i16::from((*self) as u8);
                ::tokio_postgres::types::ToSql::to_sql(&repr, ty, out)
            }
        }
    };
}

pub mod customer;
pub mod device;
pub mod line_item;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
mod metrics;
pub mod ticket;

use async_trait::async_trait;
use bb8_postgres::PostgresConnectionManager;
use derive_more::derive::{Display, Error};
use tokio::runtime;
use tokio_postgres::{error::SqlState, NoTls};
use tracing::{info, warn};

use crate::config;

pub use self::{
    customer::Customer, device::Device, line_item::LineItem, ticket::Ticket,
};

type Manager = PostgresConnectionManager<NoTls>;

type Connection = bb8::PooledConnection<'static, Manager>;

const SCHEMA: &str = include_str!("schema.sql");

#[derive(Debug, Display, Error)]
pub enum Error {
    #[display("connection pool: {_0}")]
    Pool(#[error(not(source))] String),

    #[display("duplicate key violates `{_0}`")]
    UniqueViolation(#[error(not(source))] String),

    #[display("missing referenced row for `{_0}`")]
    ForeignKeyViolation(#[error(not(source))] String),

    #[display("{_0}")]
    Postgres(#[error(source)] tokio_postgres::Error),

    #[display("storage fault: {_0}")]
    Fault(#[error(not(source))] String),
}

impl From<tokio_postgres::Error> for Error {
    fn from(e: tokio_postgres::Error) -> Self {
        let code = e.code().cloned();
        let constraint = e
            .as_db_error()
            .and_then(|db| db.constraint())
            .map(str::to_owned)
            .unwrap_or_default();

        match code {
            Some(SqlState::UNIQUE_VIOLATION) => Self::UniqueViolation(constraint),
            Some(SqlState::FOREIGN_KEY_VIOLATION) => {
                Self::ForeignKeyViolation(constraint)
            }
            _ => Self::Postgres(e),
        }
    }
}

impl From<bb8::RunError<tokio_postgres::Error>> for Error {
    fn from(e: bb8::RunError<tokio_postgres::Error>) -> Self {
        match e {
            bb8::RunError::User(e) => e.into(),
            bb8::RunError::TimedOut => {
                Self::Pool("timed out waiting for a connection".into())
            }
        }
    }
}

/// Source of transactional write scopes.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, Error>;
}

/// Write scope over the four ticket tables.
///
/// Nothing written through a transaction is visible to others until
/// [`commit`](Self::commit) succeeds.
#[async_trait]
pub trait Transaction: Send {
    async fn insert_customer(&mut self, customer: &Customer) -> Result<(), Error>;

    async fn insert_device(&mut self, device: &Device) -> Result<(), Error>;

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<(), Error>;

    async fn insert_line_item(&mut self, item: &LineItem) -> Result<(), Error>;

    async fn commit(self: Box<Self>) -> Result<(), Error>;

    async fn rollback(self: Box<Self>) -> Result<(), Error>;
}

/// Bounded pool of Postgres connections shared by all request handlers.
#[derive(Clone)]
pub struct Pool(bb8::Pool<Manager>);

pub async fn connect(config: &config::Db) -> Result<Pool, Error> {
    let manager = Manager::new_from_stringlike(&config.url, NoTls)?;
    let pool = bb8::Pool::builder()
        .max_size(config.max_size)
        .min_idle(config.min_idle)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .connection_timeout(config.connection_timeout)
        .build(manager)
        .await?;

    info!(max_size = config.max_size, "database pool initialized");
    Ok(Pool(pool))
}

impl Pool {
    /// Creates missing tables and indexes. Safe to run on every start.
    pub async fn bootstrap_schema(&self) -> Result<(), Error> {
        self.0.get().await?.batch_execute(SCHEMA).await?;
        info!("database schema verified");
        Ok(())
    }
}

#[async_trait]
impl Store for Pool {
    async fn begin(&self) -> Result<Box<dyn Transaction>, Error> {
        let conn = self.0.get_owned().await?;
        conn.batch_execute("BEGIN ISOLATION LEVEL READ COMMITTED")
            .await?;
        Ok(Box::new(PgTransaction { conn: Some(conn) }))
    }
}

pub struct PgTransaction {
    /// `None` once committed or rolled back.
    conn: Option<Connection>,
}

impl PgTransaction {
    fn client(&self) -> Result<&tokio_postgres::Client, Error> {
        self.conn
            .as_deref()
            .ok_or_else(|| Error::Fault("transaction already finished".into()))
    }

    async fn finish(mut self, sql: &str) -> Result<(), Error> {
        let conn = self.conn.take().ok_or_else(|| {
            Error::Fault("transaction already finished".into())
        })?;
        conn.batch_execute(sql).await?;
        Ok(())
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn insert_customer(&mut self, customer: &Customer) -> Result<(), Error> {
        customer::insert(self.client()?, customer).await
    }

    async fn insert_device(&mut self, device: &Device) -> Result<(), Error> {
        device::insert(self.client()?, device).await
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<(), Error> {
        ticket::insert(self.client()?, ticket).await
    }

    async fn insert_line_item(&mut self, item: &LineItem) -> Result<(), Error> {
        line_item::insert(self.client()?, item).await
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        (*self).finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<(), Error> {
        (*self).finish("ROLLBACK").await
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        // The connection only goes back to the pool once the rollback ran.
        match runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = conn.batch_execute("ROLLBACK").await {
                        warn!(error = %e, "failed to roll back abandoned transaction");
                    }
                });
            }
            Err(_) => {
                warn!("abandoned transaction dropped outside of a runtime");
            }
        }
    }
}
