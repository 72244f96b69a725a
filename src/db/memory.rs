//! In-process [`Store`] and metrics [`Source`] for tests.
//!
//! Transactions buffer their rows and merge them into the shared tables on
//! commit, enforcing the same keys as the Postgres schema. Faults and delays
//! can be scripted per store to exercise rollback and deadline paths.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::time::sleep;

use crate::metrics::{start_of_year, Metric, Source};

use super::{
    customer, device, line_item, ticket, Customer, Device, Error, LineItem,
    Store, Ticket, Transaction,
};

#[derive(Clone, Debug, Default)]
pub struct Tables {
    pub customers: BTreeMap<customer::Id, Customer>,
    pub devices: BTreeMap<device::Id, Device>,
    pub tickets: BTreeMap<ticket::Id, Ticket>,
    pub line_items: BTreeMap<line_item::Id, LineItem>,
}

impl Tables {
    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
            && self.devices.is_empty()
            && self.tickets.is_empty()
            && self.line_items.is_empty()
    }

    /// Line items of a ticket ordered by position.
    pub fn items_of(&self, ticket: &ticket::Id) -> Vec<&LineItem> {
        let mut items = self
            .line_items
            .values()
            .filter(|item| &item.ticket_id == ticket)
            .collect::<Vec<_>>();
        items.sort_by_key(|item| item.position);
        items
    }
}

/// How a scripted write fails.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Fault {
    /// Connection dropped mid-transaction.
    Broken,

    /// Key already taken.
    Duplicate,
}

impl Fault {
    fn into_error(self, what: &str) -> Error {
        match self {
            Self::Broken => Error::Fault(format!("connection lost writing {what}")),
            Self::Duplicate => Error::UniqueViolation(format!("{what}_pkey")),
        }
    }
}

#[derive(Default)]
struct Script {
    /// 1-based write index within a transaction, consumed when it fires.
    write_fault: Option<(usize, Fault)>,
    commit_fault: bool,
    write_delay: Option<Duration>,
    metric_delays: HashMap<Metric, Duration>,
    failing_metrics: HashSet<Metric>,
}

#[derive(Default)]
struct Inner {
    tables: Mutex<Tables>,
    script: Mutex<Script>,
}

#[derive(Clone, Default)]
pub struct MemoryStore(Arc<Inner>);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything committed so far.
    pub fn snapshot(&self) -> Tables {
        lock(&self.0.tables).clone()
    }

    /// Makes the `step`-th write of the next transaction reaching it fail.
    pub fn fail_write(&self, step: usize, fault: Fault) {
        lock(&self.0.script).write_fault = Some((step, fault));
    }

    /// Makes the next commit fail.
    pub fn fail_commit(&self) {
        lock(&self.0.script).commit_fault = true;
    }

    /// Delays every write by `delay`.
    pub fn stall_writes(&self, delay: Duration) {
        lock(&self.0.script).write_delay = Some(delay);
    }

    pub fn delay_metric(&self, metric: Metric, delay: Duration) {
        lock(&self.0.script).metric_delays.insert(metric, delay);
    }

    pub fn fail_metric(&self, metric: Metric) {
        lock(&self.0.script).failing_metrics.insert(metric);
    }

    /// Edits a committed ticket in place, standing in for the status-update
    /// path. Returns `false` if there is no such ticket.
    pub fn update_ticket(
        &self,
        id: &ticket::Id,
        edit: impl FnOnce(&mut Ticket),
    ) -> bool {
        lock(&self.0.tables).tickets.get_mut(id).map(edit).is_some()
    }

    async fn before_metric(&self, metric: Metric) -> Result<(), Error> {
        let (delay, failing) = {
            let script = lock(&self.0.script);
            (
                script.metric_delays.get(&metric).copied(),
                script.failing_metrics.contains(&metric),
            )
        };
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        if failing {
            return Err(Error::Fault(format!("{metric} query failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, Error> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            pending: Tables::default(),
            writes: 0,
        }))
    }
}

pub struct MemoryTransaction {
    store: MemoryStore,
    pending: Tables,
    writes: usize,
}

impl MemoryTransaction {
    async fn step(&mut self, what: &str) -> Result<(), Error> {
        self.writes += 1;
        let (delay, fault) = {
            let mut script = lock(&self.store.0.script);
            let fault = match script.write_fault {
                Some((step, fault)) if step == self.writes => {
                    script.write_fault = None;
                    Some(fault)
                }
                _ => None,
            };
            (script.write_delay, fault)
        };
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        match fault {
            Some(fault) => Err(fault.into_error(what)),
            None => Ok(()),
        }
    }

    fn committed(&self) -> MutexGuard<'_, Tables> {
        lock(&self.store.0.tables)
    }
}

fn taken<K: Ord, V>(committed: &BTreeMap<K, V>, pending: &BTreeMap<K, V>, key: &K) -> bool {
    committed.contains_key(key) || pending.contains_key(key)
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn insert_customer(&mut self, customer: &Customer) -> Result<(), Error> {
        self.step("customers").await?;
        if taken(&self.committed().customers, &self.pending.customers, &customer.id) {
            return Err(Error::UniqueViolation("customers_pkey".into()));
        }
        self.pending
            .customers
            .insert(customer.id.clone(), customer.clone());
        Ok(())
    }

    async fn insert_device(&mut self, device: &Device) -> Result<(), Error> {
        self.step("device_details").await?;
        if taken(&self.committed().devices, &self.pending.devices, &device.id) {
            return Err(Error::UniqueViolation("device_details_pkey".into()));
        }
        if !taken(
            &self.committed().customers,
            &self.pending.customers,
            &device.customer_id,
        ) {
            return Err(Error::ForeignKeyViolation(
                "device_details_customer_id_fkey".into(),
            ));
        }
        self.pending.devices.insert(device.id.clone(), device.clone());
        Ok(())
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<(), Error> {
        self.step("tickets").await?;
        if taken(&self.committed().tickets, &self.pending.tickets, &ticket.id) {
            return Err(Error::UniqueViolation("tickets_pkey".into()));
        }
        if !taken(
            &self.committed().customers,
            &self.pending.customers,
            &ticket.customer_id,
        ) {
            return Err(Error::ForeignKeyViolation(
                "tickets_customer_id_fkey".into(),
            ));
        }
        if !taken(&self.committed().devices, &self.pending.devices, &ticket.device_id)
        {
            return Err(Error::ForeignKeyViolation("tickets_device_id_fkey".into()));
        }
        self.pending.tickets.insert(ticket.id.clone(), ticket.clone());
        Ok(())
    }

    async fn insert_line_item(&mut self, item: &LineItem) -> Result<(), Error> {
        self.step("line_items").await?;
        if taken(&self.committed().line_items, &self.pending.line_items, &item.id) {
            return Err(Error::UniqueViolation("line_items_pkey".into()));
        }
        if !taken(&self.committed().tickets, &self.pending.tickets, &item.ticket_id) {
            return Err(Error::ForeignKeyViolation(
                "line_items_ticket_id_fkey".into(),
            ));
        }
        self.pending.line_items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        let fault = std::mem::take(&mut lock(&self.store.0.script).commit_fault);
        if fault {
            return Err(Error::Fault("connection lost during commit".into()));
        }

        let Self { store, pending, .. } = *self;
        let mut tables = lock(&store.0.tables);
        let clash = pending.customers.keys().any(|k| tables.customers.contains_key(k))
            || pending.devices.keys().any(|k| tables.devices.contains_key(k))
            || pending.tickets.keys().any(|k| tables.tickets.contains_key(k))
            || pending
                .line_items
                .keys()
                .any(|k| tables.line_items.contains_key(k));
        if clash {
            return Err(Error::UniqueViolation("concurrent insert".into()));
        }

        tables.customers.extend(pending.customers);
        tables.devices.extend(pending.devices);
        tables.tickets.extend(pending.tickets);
        tables.line_items.extend(pending.line_items);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), Error> {
        Ok(())
    }
}

#[async_trait]
impl Source for MemoryStore {
    async fn count_open_orders(&self) -> Result<u64, Error> {
        self.before_metric(Metric::OpenOrders).await?;
        let tables = lock(&self.0.tables);
        Ok(tables.tickets.values().filter(|t| t.status.is_open()).count() as u64)
    }

    async fn count_ready_for_delivery(&self) -> Result<u64, Error> {
        self.before_metric(Metric::ReadyForDelivery).await?;
        let tables = lock(&self.0.tables);
        Ok(tables
            .tickets
            .values()
            .filter(|t| t.status == ticket::Status::ReadyForDelivery)
            .count() as u64)
    }

    async fn revenue_year_to_date(&self) -> Result<Decimal, Error> {
        self.before_metric(Metric::RevenueYearToDate).await?;
        let since = start_of_year(OffsetDateTime::now_utc());
        let tables = lock(&self.0.tables);
        Ok(tables
            .tickets
            .values()
            .filter(|t| {
                t.status == ticket::Status::Collected && t.created_at >= since
            })
            .map(|t| t.total_cost)
            .sum())
    }
}
