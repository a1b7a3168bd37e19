use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("skill execution failed: {0}")]
    ExecutionFailed(String),
}

/// An invocable capability. Opaque to the router — only the name,
/// description, and slot list are ever shown to the LLM, never the
/// implementation.
#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// Slot names the skill cannot run without (e.g. "location").
    fn required_slots(&self) -> &[String];
    /// String-in, string-out contract.
    async fn execute(&self, input: &str) -> Result<String, SkillError>;
}

/// What the router shows the LLM about a skill.
#[derive(Debug, Clone, Serialize)]
pub struct SkillDescriptor {
    pub name: String,
    pub description: String,
    pub required_slots: Vec<String>,
}

/// Process-wide skill registry with a cached descriptor snapshot. The
/// snapshot is invalidated only when the registry changes, so routing never
/// rebuilds the list per call.
#[derive(Default)]
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, Arc<dyn Skill>>>,
    snapshot: RwLock<Arc<Vec<SkillDescriptor>>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, skill: Arc<dyn Skill>) {
        let name = skill.name().to_string();
        info!(skill = %name, "registering skill");
        self.skills.write().unwrap().insert(name, skill);
        self.rebuild_snapshot();
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.skills.write().unwrap().remove(name).is_some();
        if removed {
            self.rebuild_snapshot();
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.read().unwrap().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.skills.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached descriptor list. The same `Arc` is returned until the
    /// registry changes.
    pub fn descriptors(&self) -> Arc<Vec<SkillDescriptor>> {
        self.snapshot.read().unwrap().clone()
    }

    fn rebuild_snapshot(&self) {
        let skills = self.skills.read().unwrap();
        let mut list: Vec<SkillDescriptor> = skills
            .values()
            .map(|s| SkillDescriptor {
                name: s.name().to_string(),
                description: s.description().to_string(),
                required_slots: s.required_slots().to_vec(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        *self.snapshot.write().unwrap() = Arc::new(list);
    }
}

/// Adapter turning a plain async closure into a [`Skill`]. Keeps skill
/// wiring terse in the binary and in tests.
pub struct FnSkill<F> {
    name: String,
    description: String,
    required_slots: Vec<String>,
    handler: F,
}

impl<F, Fut> FnSkill<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<String, SkillError>> + Send,
{
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        required_slots: Vec<String>,
        handler: F,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required_slots,
            handler,
        }
    }
}

#[async_trait]
impl<F, Fut> Skill for FnSkill<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<String, SkillError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn required_slots(&self) -> &[String] {
        &self.required_slots
    }

    async fn execute(&self, input: &str) -> Result<String, SkillError> {
        (self.handler)(input.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather_skill() -> Arc<dyn Skill> {
        Arc::new(FnSkill::new(
            "weather",
            "weather query for a given location",
            vec!["location".to_string()],
            |input| async move { Ok(format!("sunny in {input}")) },
        ))
    }

    #[tokio::test]
    async fn registered_skill_executes() {
        let registry = SkillRegistry::new();
        registry.register(weather_skill());

        let skill = registry.get("weather").unwrap();
        let out = skill.execute("Beijing").await.unwrap();
        assert_eq!(out, "sunny in Beijing");
    }

    #[test]
    fn descriptor_snapshot_is_cached_until_change() {
        let registry = SkillRegistry::new();
        registry.register(weather_skill());

        let first = registry.descriptors();
        let second = registry.descriptors();
        assert!(Arc::ptr_eq(&first, &second));

        registry.unregister("weather");
        let third = registry.descriptors();
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(third.is_empty());
    }

    #[test]
    fn descriptors_are_sorted_by_name() {
        let registry = SkillRegistry::new();
        registry.register(Arc::new(FnSkill::new(
            "zeta",
            "last",
            vec![],
            |_| async move { Ok(String::new()) },
        )));
        registry.register(weather_skill());

        let descriptors = registry.descriptors();
        let names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["weather", "zeta"]);
    }
}
