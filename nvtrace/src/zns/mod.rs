//! Zoned namespace support: report decoding and the report session

pub mod report;
pub mod session;

pub use report::{ZoneAttributes, ZoneDescriptor, ZoneReport, ZoneState, ZoneType};
pub use session::{report_page_len, ReportState, ZoneReportSession, REPORT_BUFFER_SIZE};
