use derive_more::derive::Display;
use enum_utils::TryFromRepr;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use tokio_postgres::Client;

use super::{customer, device, Error};

string_id!();

/// Repair job header.
#[derive(Clone, Debug)]
pub struct Ticket {
    pub id: Id,
    pub customer_id: customer::Id,
    pub device_id: device::Id,
    pub assigned_engineer_id: Option<String>,
    pub kind: Kind,
    pub issue_description: String,
    pub data_backup: BackupConsent,
    pub expected_delivery_date: Option<Date>,
    pub status: Status,
    pub subtotal: Decimal,
    pub total_discount: Decimal,

    /// `subtotal - total_discount`.
    pub total_cost: Decimal,

    pub created_by: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub last_updated_by: String,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    TryFromRepr,
)]
#[repr(u8)]
pub enum Status {
    /// Device received, nobody looked at it yet.
    #[display("New Order")]
    #[serde(rename = "New Order")]
    NewOrder = 1,

    /// Engineer is diagnosing the fault.
    #[display("Diagnostics")]
    #[serde(rename = "Diagnostics")]
    Diagnostics = 2,

    /// Repair is under way.
    #[display("In Progress")]
    #[serde(rename = "In Progress")]
    InProgress = 3,

    /// Repair is done and the customer may pick the device up.
    #[display("Ready for Delivery")]
    #[serde(rename = "Ready for Delivery")]
    ReadyForDelivery = 4,

    /// Device handed back and paid for.
    #[display("Collected")]
    #[serde(rename = "Collected")]
    Collected = 5,
}

impl Status {
    pub const ALL: [Self; 5] = [
        Self::NewOrder,
        Self::Diagnostics,
        Self::InProgress,
        Self::ReadyForDelivery,
        Self::Collected,
    ];

    /// Whether the ticket still counts as an open order.
    pub fn is_open(self) -> bool {
        !matches!(self, Self::ReadyForDelivery | Self::Collected)
    }
}

smallint_enum!(Status, "invalid status");

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    Eq,
    PartialEq,
    Serialize,
    TryFromRepr,
)]
#[repr(u8)]
pub enum Kind {
    #[display("Diagnostics Call")]
    #[serde(rename = "Diagnostics Call")]
    DiagnosticsCall = 1,

    #[display("Service Call")]
    #[serde(rename = "Service Call")]
    ServiceCall = 2,
}

smallint_enum!(Kind, "invalid ticket type");

/// What the customer agreed to regarding their data.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    Eq,
    PartialEq,
    Serialize,
    TryFromRepr,
)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum BackupConsent {
    /// Customer already backed up their data.
    #[display("backed_up")]
    BackedUp = 1,

    /// No backup wanted; the shop is not liable for data loss.
    #[display("no_backup_no_service")]
    NoBackupNoService = 2,

    /// Shop takes a backup before servicing.
    #[display("request_backup")]
    RequestBackup = 3,
}

smallint_enum!(BackupConsent, "invalid backup consent");

pub(super) async fn insert(client: &Client, ticket: &Ticket) -> Result<(), Error> {
    const SQL: &str = "\
        INSERT INTO tickets (id, customer_id, device_id, \
                             assigned_engineer_id, ticket_type, \
                             issue_description, data_backup, \
                             expected_delivery_date, status, \
                             subtotal, total_discount, total_cost, \
                             created_by, created_at, updated_at, \
                             last_updated_by) \
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, \
                $9, $10, $11, $12, $13, $14, $15, $16)";

    client
        .execute(
            SQL,
            &[
                &ticket.id,
                &ticket.customer_id,
                &ticket.device_id,
                &ticket.assigned_engineer_id,
                &ticket.kind,
                &ticket.issue_description,
                &ticket.data_backup,
                &ticket.expected_delivery_date,
                &ticket.status,
                &ticket.subtotal,
                &ticket.total_discount,
                &ticket.total_cost,
                &ticket.created_by,
                &ticket.created_at,
                &ticket.updated_at,
                &ticket.last_updated_by,
            ],
        )
        .await?;
    Ok(())
}
