//! Remote service clients

pub mod profile_client;
pub mod report_client;

pub use profile_client::{interpret_profile_response, ProfileClient, ProfileSource};
pub use report_client::{
    normalize_identity, parse_reports, Report, ReportClient, ReportSource, ReportType,
};
