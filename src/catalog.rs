//! Material descriptions used to annotate validation failures.
use std::collections::HashMap;

/// Read-only material descriptions. Only used to make validation failures
/// readable, never to decide anything.
pub trait Catalog: Send + Sync {
    fn describe(&self, material: &str) -> Option<String>;
}

impl Catalog for HashMap<String, String> {
    fn describe(&self, material: &str) -> Option<String> {
        self.get(material).cloned()
    }
}

/// Catalog that knows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCatalog;

impl Catalog for NoCatalog {
    fn describe(&self, _: &str) -> Option<String> {
        None
    }
}
