//! Dashboard metrics computed by concurrent, independent sub-queries.
//!
//! [`Aggregator::collect`] spawns one task per [`Metric`] and merges the
//! readings by metric as they arrive, so completion order never matters.
//! The first failing sub-query aborts the others and fails the whole call.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use derive_more::derive::{Display, Error};
use rust_decimal::Decimal;
use time::{OffsetDateTime, UtcOffset};
use tokio::task::{JoinError, JoinSet};
use tracing::warn;

use crate::db;

#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum Metric {
    #[display("open orders")]
    OpenOrders,

    #[display("ready for delivery")]
    ReadyForDelivery,

    #[display("revenue year to date")]
    RevenueYearToDate,
}

impl Metric {
    pub const ALL: [Self; 3] =
        [Self::OpenOrders, Self::ReadyForDelivery, Self::RevenueYearToDate];
}

/// Read-only queries backing the dashboard.
#[async_trait]
pub trait Source: Send + Sync {
    /// Tickets neither ready for delivery nor collected.
    async fn count_open_orders(&self) -> Result<u64, db::Error>;

    async fn count_ready_for_delivery(&self) -> Result<u64, db::Error>;

    /// Sum of `total_cost` over collected tickets created this calendar year.
    async fn revenue_year_to_date(&self) -> Result<Decimal, db::Error>;
}

/// Midnight of January 1st, UTC, of the year `now` falls in.
///
/// Revenue year to date counts tickets created at or after this instant.
pub fn start_of_year(now: OffsetDateTime) -> OffsetDateTime {
    let date = now.to_offset(UtcOffset::UTC).date();
    let first = date - time::Duration::days(i64::from(date.ordinal()) - 1);
    first.midnight().assume_utc()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Metrics {
    pub open_orders: u64,
    pub ready_for_delivery: u64,
    pub revenue_ytd: Decimal,
}

#[derive(Debug, Display, Error)]
pub enum Error {
    #[display("failed to compute {metric}")]
    Query { metric: Metric, source: db::Error },

    #[display("metric task did not finish: {_0}")]
    Task(#[error(source)] JoinError),

    #[display("no reading for {_0}")]
    Incomplete(#[error(not(source))] Metric),

    #[display("metrics not ready within {_0:?}")]
    Timeout(#[error(not(source))] Duration),
}

#[derive(Clone, Copy, Debug)]
enum Reading {
    OpenOrders(u64),
    ReadyForDelivery(u64),
    RevenueYearToDate(Decimal),
}

async fn read(source: &dyn Source, metric: Metric) -> Result<Reading, db::Error> {
    Ok(match metric {
        Metric::OpenOrders => Reading::OpenOrders(source.count_open_orders().await?),
        Metric::ReadyForDelivery => {
            Reading::ReadyForDelivery(source.count_ready_for_delivery().await?)
        }
        Metric::RevenueYearToDate => {
            Reading::RevenueYearToDate(source.revenue_year_to_date().await?)
        }
    })
}

#[derive(Default)]
struct Merged {
    open_orders: Option<u64>,
    ready_for_delivery: Option<u64>,
    revenue_ytd: Option<Decimal>,
}

impl Merged {
    fn record(&mut self, reading: Reading) {
        match reading {
            Reading::OpenOrders(n) => self.open_orders = Some(n),
            Reading::ReadyForDelivery(n) => self.ready_for_delivery = Some(n),
            Reading::RevenueYearToDate(v) => self.revenue_ytd = Some(v),
        }
    }

    fn finish(self) -> Result<Metrics, Error> {
        Ok(Metrics {
            open_orders: self
                .open_orders
                .ok_or(Error::Incomplete(Metric::OpenOrders))?,
            ready_for_delivery: self
                .ready_for_delivery
                .ok_or(Error::Incomplete(Metric::ReadyForDelivery))?,
            revenue_ytd: self
                .revenue_ytd
                .ok_or(Error::Incomplete(Metric::RevenueYearToDate))?,
        })
    }
}

pub struct Aggregator {
    source: Arc<dyn Source>,
    deadline: Duration,
}

impl Aggregator {
    pub fn new(source: Arc<dyn Source>, deadline: Duration) -> Self {
        Self { source, deadline }
    }

    pub async fn collect(&self) -> Result<Metrics, Error> {
        tokio::time::timeout(self.deadline, self.fan_out())
            .await
            .map_err(|_| {
                warn!(deadline = ?self.deadline, "metrics deadline exceeded");
                Error::Timeout(self.deadline)
            })?
    }

    async fn fan_out(&self) -> Result<Metrics, Error> {
        // Dropping the set aborts whatever is still running.
        let mut tasks = JoinSet::new();
        for metric in Metric::ALL {
            let source = Arc::clone(&self.source);
            tasks.spawn(async move {
                read(source.as_ref(), metric).await.map_err(|e| (metric, e))
            });
        }

        let mut merged = Merged::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(reading)) => merged.record(reading),
                Ok(Err((metric, source))) => {
                    warn!(%metric, error = %source, "metric query failed");
                    return Err(Error::Query { metric, source });
                }
                Err(e) => {
                    warn!(error = %e, "metric task panicked or was cancelled");
                    return Err(Error::Task(e));
                }
            }
        }
        merged.finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::sleep;

    use super::*;

    /// Source answering with fixed values after per-metric delays.
    struct Scripted {
        delays: [u64; 3],
        failing: Option<Metric>,
        panicking: bool,
        finished: AtomicUsize,
    }

    impl Scripted {
        fn new(delays: [u64; 3]) -> Self {
            Self {
                delays,
                failing: None,
                panicking: false,
                finished: AtomicUsize::new(0),
            }
        }

        async fn answer<T>(&self, metric: Metric, value: T) -> Result<T, db::Error> {
            let delay = match metric {
                Metric::OpenOrders => self.delays[0],
                Metric::ReadyForDelivery => self.delays[1],
                Metric::RevenueYearToDate => self.delays[2],
            };
            sleep(Duration::from_millis(delay)).await;
            if self.panicking && metric == Metric::ReadyForDelivery {
                panic!("sub-query blew up");
            }
            if self.failing == Some(metric) {
                return Err(db::Error::Fault(format!("{metric} unavailable")));
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    }

    #[async_trait]
    impl Source for Scripted {
        async fn count_open_orders(&self) -> Result<u64, db::Error> {
            self.answer(Metric::OpenOrders, 150).await
        }

        async fn count_ready_for_delivery(&self) -> Result<u64, db::Error> {
            self.answer(Metric::ReadyForDelivery, 35).await
        }

        async fn revenue_year_to_date(&self) -> Result<Decimal, db::Error> {
            self.answer(Metric::RevenueYearToDate, Decimal::new(2855075, 2))
                .await
        }
    }

    fn aggregator(source: Arc<Scripted>) -> Aggregator {
        Aggregator::new(source, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn merges_by_metric_regardless_of_completion_order() {
        let revenue_first =
            aggregator(Arc::new(Scripted::new([30, 20, 1]))).collect().await.unwrap();
        let revenue_last =
            aggregator(Arc::new(Scripted::new([1, 10, 30]))).collect().await.unwrap();

        let expected = Metrics {
            open_orders: 150,
            ready_for_delivery: 35,
            revenue_ytd: Decimal::new(2855075, 2),
        };
        assert_eq!(revenue_first, expected);
        assert_eq!(revenue_last, expected);
    }

    #[tokio::test]
    async fn runs_sub_queries_concurrently() {
        let started = tokio::time::Instant::now();
        aggregator(Arc::new(Scripted::new([150, 150, 150])))
            .collect()
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn fails_fast_and_aborts_the_rest() {
        let source = Arc::new(Scripted {
            failing: Some(Metric::OpenOrders),
            ..Scripted::new([1, 200, 200])
        });

        let err = aggregator(Arc::clone(&source)).collect().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Query {
                metric: Metric::OpenOrders,
                ..
            }
        ));

        sleep(Duration::from_millis(300)).await;
        assert_eq!(source.finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reports_panicked_sub_query() {
        let source = Arc::new(Scripted {
            panicking: true,
            ..Scripted::new([1, 1, 1])
        });

        let err = aggregator(source).collect().await.unwrap_err();
        assert!(matches!(err, Error::Task(_)));
    }

    #[tokio::test]
    async fn times_out_as_a_whole() {
        let source = Arc::new(Scripted::new([1, 1, 500]));
        let err = Aggregator::new(source, Duration::from_millis(50))
            .collect()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn year_starts_at_utc_midnight_on_january_first() {
        use time::macros::datetime;

        assert_eq!(
            start_of_year(datetime!(2026-10-17 13:45 UTC)),
            datetime!(2026-01-01 0:00 UTC)
        );
        // Still New Year's Eve in UTC.
        assert_eq!(
            start_of_year(datetime!(2027-01-01 02:00 +05:00)),
            datetime!(2026-01-01 0:00 UTC)
        );
        assert_eq!(
            start_of_year(datetime!(2026-01-01 0:00 UTC)),
            datetime!(2026-01-01 0:00 UTC)
        );
    }

    #[test]
    fn missing_reading_is_incomplete() {
        let mut merged = Merged::default();
        merged.record(Reading::OpenOrders(1));
        merged.record(Reading::RevenueYearToDate(Decimal::ZERO));
        assert!(matches!(
            merged.finish(),
            Err(Error::Incomplete(Metric::ReadyForDelivery))
        ));
    }
}
