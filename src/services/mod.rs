//! Services a site can chain instead of proxying.
//!
//! - `version.rs`: build information on `/_debug/version`
//! - `redirect.rs`: static redirects for exact paths
//! - `goget.rs`: vanity import metadata

pub mod goget;
pub mod redirect;
pub mod version;

pub use goget::GoImportService;
pub use redirect::{RedirectError, RedirectService};
pub use version::VersionService;

use crate::config::ServiceConfig;
use crate::routing::matcher::Responder;

/// Instantiate a configured service.
pub fn build(config: &ServiceConfig) -> Result<Box<dyn Responder>, RedirectError> {
    Ok(match config {
        ServiceConfig::Version => Box::new(VersionService::new()),
        ServiceConfig::Redirect {
            target,
            status,
            paths,
        } => Box::new(RedirectService::new(target, *status, paths)?),
        ServiceConfig::GoImport { imports } => Box::new(GoImportService::new(imports.clone())),
    })
}
