use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio_postgres::Client;

use super::{ticket, Error};

string_id!();

/// One billable service or part on a ticket.
///
/// `final_price` is derived from `rate` and `discount_percent` by the
/// pricing engine and rounded to the currency's minor unit.
#[derive(Clone, Debug)]
pub struct LineItem {
    pub id: Id,
    pub ticket_id: ticket::Id,

    /// 1-based position within the ticket.
    pub position: usize,

    pub service_name: String,
    pub rate: Decimal,
    pub discount_percent: Decimal,
    pub final_price: Decimal,
    pub created_at: OffsetDateTime,
}

pub(super) async fn insert(client: &Client, item: &LineItem) -> Result<(), Error> {
    const SQL: &str = "\
        INSERT INTO line_items (id, ticket_id, position, service_name, rate, \
                                discount_percent, final_price, created_at) \
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)";

    let position = i32::try_from(item.position)
        .map_err(|_| Error::Fault(format!("line item {} out of range", item.position)))?;

    client
        .execute(
            SQL,
            &[
                &item.id,
                &item.ticket_id,
                &position,
                &item.service_name,
                &item.rate,
                &item.discount_percent,
                &item.final_price,
                &item.created_at,
            ],
        )
        .await?;
    Ok(())
}
