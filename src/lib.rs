pub mod container;
pub mod diff;
pub mod env;
pub mod github;
pub mod output;
pub mod retry;
pub mod suites;

mod image_suite;
mod owners_suite;
mod registry_suite;
mod release_suite;
mod report_suite;
mod verifier_suite;

pub use image_suite::{ImageBuildOptions, ImageBuildReport, SmokeChart, SmokeReport};
pub use owners_suite::{GateOutcome, OWNERS_FILE, OwnersGateOptions};
pub use registry_suite::{
    AUTH_TOKEN_VAR, DEFAULT_LINK_TAG, LinkOutcome, TagRegistry, TagRegistryOptions, TagUnresolved,
};
pub use release_suite::{
    AssetEntry, DEFAULT_BINARY_PATH, DEFAULT_VERSION_FILE, ReleaseAssetOptions, ReleaseCheck,
    ReleaseCheckOptions, ReleaseContent, VersionInfo, only_version_file_modified, release_body,
    release_update_needed,
};
pub use report_suite::{
    Annotation, DEFAULT_VOLATILE_ANNOTATIONS, DEFAULT_VOLATILE_METADATA, Discrepancy,
    ReportCompareOptions, ReportComparison, ReportInfo, compare_reports,
};
pub use verifier_suite::{
    ChartLocation, DEFAULT_IMAGE, DEFAULT_IMAGE_TAG, VERIFIER_BINARY, VerifierFailure,
    VerifierInvocation, VerifyReportHead, parse_report_head,
};
