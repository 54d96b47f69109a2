mod delta;
mod types;
mod version;

pub use delta::{item_values, DeltaValue, UsageDelta};
pub use types::{
    Directionality, Domain, Energy, GroupPeriodTotal, GroupTotals, GroupUsage, InsufficientData,
    ItemUsage, PeriodResult, PowerPeriod, Sample, TankagePeriod, TankageTotals, UsageSnapshot,
};
pub use version::{is_supported, MIN_SUPPORTED_SCHEMA_VERSION, SCHEMA_VERSION};
