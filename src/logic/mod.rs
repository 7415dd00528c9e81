pub mod catalog;
pub mod change_feed;
pub mod lifecycle;
pub mod mapper;
pub mod patch;

pub use catalog::Catalog;
pub use change_feed::{Change, ChangeFeed, Sequence, StateChange};
pub use lifecycle::StabilityReport;
pub use patch::{translate, KeyWrite, PlannedWrite, WritePlan};
