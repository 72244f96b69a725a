use async_trait::async_trait;
use rust_decimal::Decimal;

use time::OffsetDateTime;

use crate::metrics::{start_of_year, Source};

use super::{ticket::Status, Error, Pool};

#[async_trait]
impl Source for Pool {
    async fn count_open_orders(&self) -> Result<u64, Error> {
        const SQL: &str = "\
            SELECT COUNT(*) FROM tickets \
            WHERE status NOT IN ($1, $2)";
        let count = self
            .0
            .get()
            .await?
            .query_one(SQL, &[&Status::ReadyForDelivery, &Status::Collected])
            .await?
            .get::<_, i64>(0);
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn count_ready_for_delivery(&self) -> Result<u64, Error> {
        const SQL: &str = "SELECT COUNT(*) FROM tickets WHERE status = $1";
        let count = self
            .0
            .get()
            .await?
            .query_one(SQL, &[&Status::ReadyForDelivery])
            .await?
            .get::<_, i64>(0);
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn revenue_year_to_date(&self) -> Result<Decimal, Error> {
        const SQL: &str = "\
            SELECT COALESCE(SUM(total_cost), 0) FROM tickets \
            WHERE status = $1 \
              AND created_at >= $2";
        Ok(self
            .0
            .get()
            .await?
            .query_one(
                SQL,
                &[&Status::Collected, &start_of_year(OffsetDateTime::now_utc())],
            )
            .await?
            .get::<_, Decimal>(0))
    }
}
