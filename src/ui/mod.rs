pub mod icons;
pub mod output;
pub mod progress;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{
    batch_summary, dim, error, header, muted, section, status, success, summary_row, warn,
};
pub use progress::IngestProgress;
pub use table::{records_table, schema_table, stats_table};
pub use theme::{theme, Theme};
