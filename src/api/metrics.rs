use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::metrics;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub open_orders: u64,
    pub ready_for_delivery: u64,

    #[serde(rename = "revenueYTD")]
    pub revenue_ytd: Decimal,
}

impl From<metrics::Metrics> for Metrics {
    fn from(m: metrics::Metrics) -> Self {
        Self {
            open_orders: m.open_orders,
            ready_for_delivery: m.ready_for_delivery,
            revenue_ytd: m.revenue_ytd,
        }
    }
}
