//! Domain records shared by the caches, the expander, and the storage layer.

pub mod computation;
pub mod events;
pub mod group;
pub mod keys;
pub mod lock;
pub mod tsid;

pub use computation::{CompParm, DbComputation, ParmDirection, ParmTransform};
pub use events::{ChangeNotification, DependencyEdge, NotificationKind};
pub use group::{PartFilter, SubgroupRelation, TsGroup};
pub use keys::{AppKey, CompKey, DataTypeKey, DependsKeyColumn, GroupKey, SiteKey, TsKey};
pub use lock::ProcessLock;
pub use tsid::{TimeSeriesId, TsidPart};
