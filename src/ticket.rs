//! Atomic creation of a ticket together with its customer, device and line
//! items.
//!
//! [`Writer::create`] writes all four entities inside one transaction in
//! foreign-key order (customer, device, ticket, line items). Any failure,
//! including the deadline running out, rolls the whole scope back, so a
//! failed call leaves nothing behind and may be retried as is.

use std::{sync::Arc, time::Duration};

use derive_more::derive::{Display, Error, From};
use time::{macros::format_description, Date, OffsetDateTime};
use tracing::{info, warn};

use crate::{api, db, id, pricing};

/// Recorded as creator when the request names nobody.
pub const DEFAULT_CREATED_BY: &str = "ADMIN-001";

/// Input rejected before anything is written.
#[derive(Clone, Copy, Debug, Display, Eq, Error, PartialEq)]
pub enum Invalid {
    #[display("customer name is required")]
    MissingCustomerName,

    #[display("customer phone is required")]
    MissingCustomerPhone,

    #[display("issue description is required")]
    MissingIssueDescription,

    #[display("at least one line item is required")]
    NoLineItems,
}

/// Insert step of the creation transaction.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Stage {
    #[display("begin")]
    Begin,

    #[display("customer")]
    Customer,

    #[display("device")]
    Device,

    #[display("ticket")]
    Ticket,

    /// 1-based position of the item.
    #[display("line item {_0}")]
    LineItem(usize),

    #[display("commit")]
    Commit,
}

#[derive(Debug, Display, Error, From)]
pub enum Error {
    #[display("invalid ticket: {_0}")]
    #[from]
    Validation(Invalid),

    #[display("{stage} conflicts with an existing row")]
    Conflict { stage: Stage, source: db::Error },

    #[display("failed to persist {stage}")]
    Persistence { stage: Stage, source: db::Error },

    #[display("ticket was not persisted within {_0:?}")]
    Timeout(#[error(not(source))] Duration),
}

impl Error {
    fn at(stage: Stage) -> impl FnOnce(db::Error) -> Self {
        move |source| match source {
            db::Error::UniqueViolation(_) => Self::Conflict { stage, source },
            source => Self::Persistence { stage, source },
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Conflict { stage, .. } | Self::Persistence { stage, .. } => {
                Some(*stage)
            }
            Self::Validation(_) | Self::Timeout(_) => None,
        }
    }
}

/// Validated ticket creation request.
#[derive(Clone, Debug)]
pub struct NewTicket {
    pub customer: NewCustomer,
    pub device: NewDevice,
    pub kind: db::ticket::Kind,
    pub assigned_engineer_id: Option<String>,
    pub issue_description: String,
    pub data_backup: db::ticket::BackupConsent,
    pub expected_delivery_date: Option<Date>,
    pub lines: Vec<pricing::LineInput>,
    pub created_by: String,
}

#[derive(Clone, Debug)]
pub struct NewCustomer {
    pub name: String,
    pub email: Option<String>,
    pub phone: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NewDevice {
    pub kind: String,
    pub brand: String,
    pub model: Option<String>,
    pub serial_no: Option<String>,
    pub password: Option<String>,
    pub accessories: Vec<String>,
    pub under_warranty: bool,
    pub warranty_no: Option<String>,
    pub warranty_exp_date: Option<Date>,
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

/// Parses `YYYY-MM-DD`, treating anything else as absent.
fn parse_date(value: &str) -> Option<Date> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]")).ok()
}

impl TryFrom<api::NewTicket> for NewTicket {
    type Error = Invalid;

    fn try_from(input: api::NewTicket) -> Result<Self, Self::Error> {
        let api::NewTicket {
            customer,
            device,
            ticket,
            line_items,
            created_by,
        } = input;

        let name =
            non_empty(customer.name).ok_or(Invalid::MissingCustomerName)?;
        let phone =
            non_empty(customer.phone).ok_or(Invalid::MissingCustomerPhone)?;
        let issue_description = non_empty(ticket.issue_description)
            .ok_or(Invalid::MissingIssueDescription)?;
        if line_items.is_empty() {
            return Err(Invalid::NoLineItems);
        }

        Ok(Self {
            customer: NewCustomer {
                name,
                email: non_empty(customer.email),
                phone,
                address: non_empty(customer.address),
                city: non_empty(customer.city),
                state: non_empty(customer.state),
                zip: non_empty(customer.zip),
            },
            device: NewDevice {
                kind: device.kind.trim().to_owned(),
                brand: device.brand.trim().to_owned(),
                model: non_empty(device.model),
                serial_no: non_empty(device.serial_no),
                password: non_empty(device.password),
                accessories: device
                    .accessories
                    .into_iter()
                    .filter_map(non_empty)
                    .collect(),
                under_warranty: device.under_warranty,
                warranty_no: non_empty(device.warranty_no),
                warranty_exp_date: parse_date(&device.warranty_exp_date),
            },
            kind: ticket.kind,
            assigned_engineer_id: non_empty(ticket.engineer_id),
            issue_description,
            data_backup: ticket.data_backup,
            expected_delivery_date: parse_date(&ticket.expected_delivery_date),
            lines: line_items
                .into_iter()
                .map(|item| pricing::LineInput {
                    service_name: item.name.trim().to_owned(),
                    rate: item.rate,
                    discount_percent: item.discount_percent,
                })
                .collect(),
            created_by: created_by
                .and_then(non_empty)
                .unwrap_or_else(|| DEFAULT_CREATED_BY.to_owned()),
        })
    }
}

/// Rows of one ticket, in insertion order.
struct Aggregate {
    customer: db::Customer,
    device: db::Device,
    ticket: db::Ticket,
    items: Vec<db::LineItem>,
}

pub struct Writer {
    store: Arc<dyn db::Store>,
    ids: id::Generator,
    deadline: Duration,
}

impl Writer {
    pub fn new(store: Arc<dyn db::Store>, deadline: Duration) -> Self {
        Self {
            store,
            ids: id::Generator::new(),
            deadline,
        }
    }

    /// Persists the ticket and everything it references as one unit.
    ///
    /// Returns the committed ticket header.
    pub async fn create(&self, ticket: NewTicket) -> Result<db::Ticket, Error> {
        if ticket.lines.is_empty() {
            return Err(Invalid::NoLineItems.into());
        }

        let aggregate = self.assemble(ticket, OffsetDateTime::now_utc());

        tokio::time::timeout(self.deadline, self.persist(&aggregate))
            .await
            .map_err(|_| {
                warn!(
                    ticket = %aggregate.ticket.id,
                    deadline = ?self.deadline,
                    "ticket creation timed out, rolled back",
                );
                Error::Timeout(self.deadline)
            })??;

        info!(
            ticket = %aggregate.ticket.id,
            customer = %aggregate.customer.id,
            device = %aggregate.device.id,
            items = aggregate.items.len(),
            total = %aggregate.ticket.total_cost,
            "ticket created",
        );
        Ok(aggregate.ticket)
    }

    fn assemble(&self, input: NewTicket, now: OffsetDateTime) -> Aggregate {
        let customer_id =
            db::customer::Id::from(self.ids.next(id::Kind::Customer));
        let device_id = db::device::Id::from(self.ids.next(id::Kind::Device));
        let ticket_id = db::ticket::Id::from(self.ids.next(id::Kind::Ticket));

        let quote = pricing::quote(&input.lines).rounded();
        let totals = quote.totals;

        let items = quote
            .lines
            .into_iter()
            .enumerate()
            .map(|(i, line)| {
                let position = i + 1;
                db::LineItem {
                    id: id::line_item(ticket_id.as_str(), position).into(),
                    ticket_id: ticket_id.clone(),
                    position,
                    service_name: line.service_name,
                    rate: line.rate,
                    discount_percent: line.discount_percent,
                    final_price: line.final_price,
                    created_at: now,
                }
            })
            .collect();

        let NewTicket {
            customer,
            device,
            kind,
            assigned_engineer_id,
            issue_description,
            data_backup,
            expected_delivery_date,
            created_by,
            ..
        } = input;

        Aggregate {
            customer: db::Customer {
                id: customer_id.clone(),
                name: customer.name,
                email: customer.email,
                phone: customer.phone,
                address: customer.address,
                city: customer.city,
                state: customer.state,
                zip: customer.zip,
                created_at: now,
            },
            device: db::Device {
                id: device_id.clone(),
                customer_id: customer_id.clone(),
                kind: device.kind,
                brand: device.brand,
                model: device.model,
                serial_no: device.serial_no,
                password: device.password,
                accessories: device.accessories,
                under_warranty: device.under_warranty,
                warranty_no: device.warranty_no,
                warranty_exp_date: device.warranty_exp_date,
                created_at: now,
            },
            ticket: db::Ticket {
                id: ticket_id,
                customer_id,
                device_id,
                assigned_engineer_id,
                kind,
                issue_description,
                data_backup,
                expected_delivery_date,
                status: db::ticket::Status::NewOrder,
                subtotal: totals.subtotal,
                total_discount: totals.total_discount,
                total_cost: totals.grand_total,
                last_updated_by: created_by.clone(),
                created_by,
                created_at: now,
                updated_at: now,
            },
            items,
        }
    }

    async fn persist(&self, aggregate: &Aggregate) -> Result<(), Error> {
        let mut tx = self.store.begin().await.map_err(Error::at(Stage::Begin))?;

        match insert_all(tx.as_mut(), aggregate).await {
            Ok(()) => tx.commit().await.map_err(Error::at(Stage::Commit)),
            Err(e) => {
                warn!(
                    ticket = %aggregate.ticket.id,
                    error = %e,
                    "rolling back ticket creation",
                );
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

async fn insert_all(
    tx: &mut dyn db::Transaction,
    aggregate: &Aggregate,
) -> Result<(), Error> {
    tx.insert_customer(&aggregate.customer)
        .await
        .map_err(Error::at(Stage::Customer))?;
    tx.insert_device(&aggregate.device)
        .await
        .map_err(Error::at(Stage::Device))?;
    tx.insert_ticket(&aggregate.ticket)
        .await
        .map_err(Error::at(Stage::Ticket))?;
    for item in &aggregate.items {
        tx.insert_line_item(item)
            .await
            .map_err(Error::at(Stage::LineItem(item.position)))?;
    }
    Ok(())
}
