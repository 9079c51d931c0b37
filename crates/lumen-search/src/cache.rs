//! Cache of compiled extraction expressions, keyed by resource type and
//! parameter code.

use dashmap::DashMap;
use lumen_core::path::PathExpression;
use lumen_core::Result;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct CompiledParamCache {
    compiled: DashMap<(String, String), Arc<PathExpression>>,
}

impl CompiledParamCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the compiled expression for `(resource_type, code)`,
    /// compiling it on first use. The entry API keeps compilation
    /// at most once per key even under concurrent lookups.
    pub fn get_or_compile(
        &self,
        resource_type: &str,
        code: &str,
        expression: &str,
    ) -> Result<Arc<PathExpression>> {
        let key = (resource_type.to_string(), code.to_string());
        if let Some(existing) = self.compiled.get(&key) {
            return Ok(existing.clone());
        }
        let compiled = Arc::new(PathExpression::parse(expression)?);
        Ok(self
            .compiled
            .entry(key)
            .or_insert_with(|| compiled)
            .clone())
    }

    /// Drops cached expressions for one resource type, or the whole
    /// cache when no type is given. Used when definitions change.
    pub fn invalidate(&self, resource_type: Option<&str>) {
        match resource_type {
            Some(rt) => self.compiled.retain(|(key_rt, _), _| key_rt != rt),
            None => self.compiled.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_once_and_reuses() {
        let cache = CompiledParamCache::new();
        let first = cache
            .get_or_compile("Patient", "name", "Patient.name.family")
            .unwrap();
        let second = cache
            .get_or_compile("Patient", "name", "Patient.name.family")
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalid_expression_is_not_cached() {
        let cache = CompiledParamCache::new();
        assert!(cache.get_or_compile("Patient", "bad", "").is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidation_by_type() {
        let cache = CompiledParamCache::new();
        cache
            .get_or_compile("Patient", "name", "Patient.name")
            .unwrap();
        cache
            .get_or_compile("Observation", "code", "Observation.code")
            .unwrap();
        cache.invalidate(Some("Patient"));
        assert_eq!(cache.len(), 1);
        cache.invalidate(None);
        assert!(cache.is_empty());
    }
}
