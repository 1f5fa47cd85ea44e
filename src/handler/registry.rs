use std::sync::Arc;

use crate::handler::JobHandler;
use crate::types::JobRecord;

/// The set of handlers available to a worker, registered at startup.
///
/// Dispatch is polymorphic over the job record: the first handler whose
/// [`JobHandler::supports`] returns true wins, in registration order. A job
/// no registered handler supports is a deployment gap, handled by the
/// executor as a fatal configuration error.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.push(handler);
    }

    /// First registered handler supporting the job.
    pub fn resolve(&self, job: &JobRecord) -> Option<Arc<dyn JobHandler>> {
        self.handlers.iter().find(|h| h.supports(job)).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
