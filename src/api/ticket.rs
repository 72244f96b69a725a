use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pricing;

pub use crate::db::ticket::{BackupConsent, Id, Kind, Status};

/// Ticket creation payload.
///
/// Only `ticket` is structurally required; missing customer and device
/// fields are reported by validation.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTicket {
    #[serde(default)]
    pub customer: Customer,

    #[serde(default)]
    pub device: Device,

    pub ticket: Details,

    #[serde(default)]
    pub line_items: Vec<LineItem>,

    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Device {
    #[serde(rename = "type")]
    pub kind: String,
    pub brand: String,
    pub model: String,
    pub serial_no: String,
    pub password: String,
    pub accessories: Vec<String>,
    pub under_warranty: bool,
    pub warranty_no: String,

    /// `YYYY-MM-DD`.
    pub warranty_exp_date: String,
}

/// `type` and `dataBackup` have no default and must be sent.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Details {
    #[serde(rename = "type")]
    pub kind: Kind,

    #[serde(default)]
    pub engineer_id: String,

    #[serde(default)]
    pub issue_description: String,

    pub data_backup: BackupConsent,

    /// `YYYY-MM-DD`.
    #[serde(default)]
    pub expected_delivery_date: String,
}

/// Rates and discounts are read leniently: anything non-numeric is zero.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LineItem {
    #[serde(alias = "serviceName")]
    pub name: String,

    #[serde(deserialize_with = "pricing::deserialize_lenient")]
    pub rate: Decimal,

    #[serde(alias = "discount", deserialize_with = "pricing::deserialize_lenient")]
    pub discount_percent: Decimal,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Created {
    pub ticket_id: Id,
    pub customer_name: String,
    pub status: Status,
    pub subtotal: Decimal,
    pub total_discount: Decimal,
    pub total_cost: Decimal,
}
