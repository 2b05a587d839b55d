//! Dependency injection support for ena-undo

use std::sync::Arc;

use ena_common::di::{ServiceEntry, ServiceFactory};
use tracing::error;

use crate::{UndoConfig, UndoManager};

inventory::submit! {
    ServiceFactory::new("undo", create_undo_services)
}

fn create_undo_services() -> Vec<ServiceEntry> {
    let config = match UndoConfig::load(None) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid undo configuration, skipping undo services");
            return Vec::new();
        }
    };

    match UndoManager::open(config) {
        Ok(manager) => vec![ServiceEntry::new::<UndoManager>(Arc::new(manager))],
        Err(e) => {
            error!(error = %e, "Failed to open undo history, skipping undo services");
            Vec::new()
        }
    }
}
