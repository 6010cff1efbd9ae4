//! Skill registry — two-phase prompt enrichment.
//!
//! Phase 1 (always): a bulleted listing of name + description for every
//! visible skill. Phase 2 (on demand): the full instructions of every
//! activated skill. Skills with `disable_model_invocation` appear in
//! neither phase.

use crate::error::{DuplicateSkillError, UnknownSkillError};

/// A named bundle of additional instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub disable_model_invocation: bool,
}

impl Skill {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            instructions: instructions.into(),
            disable_model_invocation: false,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.disable_model_invocation = true;
        self
    }
}

/// Registry of skills plus their activation state.
#[derive(Debug, Default)]
pub struct SkillRegistry {
    skills: Vec<Skill>,
    /// Activation order; instructions are injected in this order.
    active: Vec<String>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, skill: Skill) -> Result<(), DuplicateSkillError> {
        if self.skills.iter().any(|s| s.name == skill.name) {
            return Err(DuplicateSkillError { name: skill.name });
        }
        tracing::debug!(skill = %skill.name, "skill registered");
        self.skills.push(skill);
        Ok(())
    }

    pub fn activate(&mut self, name: &str) -> Result<(), UnknownSkillError> {
        if !self.skills.iter().any(|s| s.name == name) {
            return Err(UnknownSkillError {
                name: name.to_string(),
            });
        }
        if !self.active.iter().any(|n| n == name) {
            self.active.push(name.to_string());
        }
        Ok(())
    }

    pub fn deactivate(&mut self, name: &str) {
        self.active.retain(|n| n != name);
    }

    pub fn list(&self) -> &[Skill] {
        &self.skills
    }

    pub fn get(&self, name: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.name == name)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.iter().any(|n| n == name)
    }

    /// Fold the skill catalogue into the system prompt.
    ///
    /// An empty registry returns `base_prompt` unchanged. Otherwise the
    /// visible-skill listing is appended, followed by the instructions of
    /// every activated skill behind a `---` separator.
    pub fn compose(&self, base_prompt: &str) -> String {
        if self.skills.is_empty() {
            return base_prompt.to_string();
        }

        let visible: Vec<&Skill> = self
            .skills
            .iter()
            .filter(|s| !s.disable_model_invocation)
            .collect();

        let mut prompt = base_prompt.to_string();

        if !visible.is_empty() {
            prompt.push_str("\nAvailable skills:\n");
            let listing: Vec<String> = visible
                .iter()
                .map(|s| format!("- {}: {}", s.name, s.description))
                .collect();
            prompt.push_str(&listing.join("\n"));
        }

        let activated: Vec<&Skill> = self
            .active
            .iter()
            .filter_map(|name| self.get(name))
            .filter(|s| !s.disable_model_invocation)
            .collect();

        if !activated.is_empty() {
            prompt.push_str("\n---\n");
            let instructions: Vec<&str> =
                activated.iter().map(|s| s.instructions.as_str()).collect();
            prompt.push_str(&instructions.join("\n"));
        }

        prompt
    }
}
