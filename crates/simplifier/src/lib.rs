//! Lexplain Simplifier
//!
//! Turns a file path or raw text into a simplified rendition:
//! 1. Stages raw text into a temp file
//! 2. Runs the simplifier behind the `Simplifier` port
//! 3. Reconciles the result into the document stores

pub mod errors;
pub mod process;
pub mod processor;
pub mod runner;
pub mod staging;

pub use errors::SimplifyError;
pub use process::ProcessSimplifier;
pub use processor::{Phase, SimplificationService, SimplifyInput, SimplifyRequest};
pub use runner::{Simplifier, SimplifierOutput};
pub use staging::{StagedInput, Stager};

use lexplain_common::config::AppConfig;
use lexplain_common::store::{DocumentStores, LocalMetadataStore};
use std::sync::Arc;

/// Build the service from configuration with the external process adapter
pub fn from_config(
    config: &AppConfig,
    stores: DocumentStores,
    local: Option<Arc<LocalMetadataStore>>,
) -> SimplificationService {
    let simplifier = ProcessSimplifier::new(
        config.simplifier.interpreter.clone(),
        config.simplifier.script_path.clone(),
    );
    SimplificationService::new(
        Arc::new(simplifier),
        Stager::new(config.scratch_dir()),
        stores,
        local,
    )
}
