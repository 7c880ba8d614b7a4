//! # sift-core: the data model of sift
//!
//! Every component of the query engine speaks in terms of three shapes:
//!
//! - [`Field`]: a typed, possibly-invalid value held by a record.
//! - [`Record`]: one row of data: named fields plus the raw message text.
//! - [`DisplayResults`]: the view a pipeline run produces: the event list,
//!   an optional table and an optional chart.
//!
//! The [`merge`] module holds the ordering primitives the cache and the
//! orchestration engine rely on: records flow through the system sorted by
//! descending `_time`, and batches from several sources are combined with a
//! stable k-way merge.

pub mod field;
pub mod merge;
pub mod record;
pub mod results;

pub use field::{Field, FieldValue};
pub use merge::{kway_merge_desc, merge_sorted_desc, sort_desc};
pub use record::{Record, SOURCE_FIELD, TIME_FIELD};
pub use results::{ChartPoint, ChartView, DisplayResults, Series, TableView};
