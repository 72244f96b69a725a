use time::OffsetDateTime;
use tokio_postgres::Client;

use super::Error;

string_id!();

#[derive(Clone, Debug)]
pub struct Customer {
    pub id: Id,
    pub name: String,
    pub email: Option<String>,
    pub phone: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub created_at: OffsetDateTime,
}

pub(super) async fn insert(
    client: &Client,
    customer: &Customer,
) -> Result<(), Error> {
    const SQL: &str = "\
        INSERT INTO customers (id, name, email, phone, \
                               address, city, state, zip, created_at) \
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)";

    client
        .execute(
            SQL,
            &[
                &customer.id,
                &customer.name,
                &customer.email,
                &customer.phone,
                &customer.address,
                &customer.city,
                &customer.state,
                &customer.zip,
                &customer.created_at,
            ],
        )
        .await?;
    Ok(())
}
