//! Distribution: package directory creation and upload to the model hub

mod package;
mod upload;

pub use package::{create_package, render_model_card, PackageReport, CONFIG_FILE_NAME, DEFAULT_PACKAGE_DIR};
pub use upload::{
    upload, CommandOutcome, HubCli, LogoStatus, ProcessHubCli, UploadReport, UploadRequest, DEFAULT_INCLUDE,
    DEFAULT_REPO_NAME,
};
