use time::{Date, OffsetDateTime};
use tokio_postgres::Client;

use super::{customer, Error};

string_id!();

/// Equipment handed in by a customer.
#[derive(Clone, Debug)]
pub struct Device {
    pub id: Id,
    pub customer_id: customer::Id,

    /// Laptop, desktop, printer and so on.
    pub kind: String,

    pub brand: String,
    pub model: Option<String>,
    pub serial_no: Option<String>,

    /// Unlock code left by the customer, if any.
    pub password: Option<String>,

    pub accessories: Vec<String>,
    pub under_warranty: bool,
    pub warranty_no: Option<String>,
    pub warranty_exp_date: Option<Date>,
    pub created_at: OffsetDateTime,
}

pub(super) async fn insert(client: &Client, device: &Device) -> Result<(), Error> {
    const SQL: &str = "\
        INSERT INTO device_details (id, customer_id, type, brand, model, \
                                    serial_no, password, accessories, \
                                    under_warranty, warranty_no, \
                                    warranty_exp_date, created_at) \
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)";

    client
        .execute(
            SQL,
            &[
                &device.id,
                &device.customer_id,
                &device.kind,
                &device.brand,
                &device.model,
                &device.serial_no,
                &device.password,
                &device.accessories,
                &device.under_warranty,
                &device.warranty_no,
                &device.warranty_exp_date,
                &device.created_at,
            ],
        )
        .await?;
    Ok(())
}
